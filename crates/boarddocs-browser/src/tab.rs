//! Reuse of an already open tab on the target site

use std::sync::Arc;

use boarddocs_core::{Result, ScrapeError};
use tracing::{debug, info};
use url::Url;

use crate::page::{RemoteBrowser, RemotePage};

/// A tab picked by [`find_or_open_tab`]
pub struct LocatedTab {
    pub page: Arc<dyn RemotePage>,
    /// False when the tab was already open before this run
    pub created: bool,
}

/// Root of `target`: scheme, host and port with path `/`, no query or fragment
pub fn site_root(target: &str) -> Result<String> {
    let mut url = Url::parse(target)
        .map_err(|e| ScrapeError::Parse(format!("Invalid site URL {}: {}", target, e)))?;
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

/// Return a tab already on `target`'s site, or open a blank one
///
/// The browser does not say which tab has focus, so the most recently opened
/// match wins.
pub async fn find_or_open_tab(browser: &dyn RemoteBrowser, target: &str) -> Result<LocatedTab> {
    let root = site_root(target)?;

    let existing = browser
        .tabs()?
        .into_iter()
        .filter(|page| {
            let url = page.url();
            let matches = url.starts_with(&root);
            if !matches {
                debug!("Skipping tab at {}", url);
            }
            matches
        })
        .last();

    match existing {
        Some(page) => {
            info!("Reusing open tab at {}", page.url());
            Ok(LocatedTab {
                page,
                created: false,
            })
        }
        None => {
            info!("No open tab on {}; opening a new one", root);
            Ok(LocatedTab {
                page: browser.new_tab().await?,
                created: true,
            })
        }
    }
}
