//! Ownership of the browser connection and the crawled tab
//!
//! A browser this process launched is shut down when the crawl ends. A
//! browser it attached to belongs to someone else: the connection is dropped
//! and the browser keeps running for its other clients. Tabs follow the same
//! rule: only a tab opened by this run is closed by it.

use std::sync::Arc;
use std::time::Duration;

use boarddocs_core::{BrowserSettings, Result, ScrapeError};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::chrome::ChromeBrowser;
use crate::page::{RemoteBrowser, RemotePage};
use crate::tab::LocatedTab;

/// How the browser connection was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// This process started the browser
    Launched,
    /// Connected to a browser that was already running
    Attached,
}

/// A browser connection with its release policy
pub struct BrowserConnection {
    browser: Arc<dyn RemoteBrowser>,
    mode: ConnectionMode,
}

impl BrowserConnection {
    pub fn new(browser: Arc<dyn RemoteBrowser>, mode: ConnectionMode) -> Self {
        Self { browser, mode }
    }

    /// Launch a local Chrome/Chromium
    pub fn launch(settings: &BrowserSettings) -> Result<Self> {
        let browser = ChromeBrowser::launch(settings)?;
        Ok(Self::new(Arc::new(browser), ConnectionMode::Launched))
    }

    /// Attach to a browser started with `--remote-debugging-port`
    ///
    /// `endpoint` is either the `ws://` URL the browser printed or its
    /// `http://host:port` DevTools address.
    pub async fn attach(endpoint: &str, idle_timeout: Duration) -> Result<Self> {
        let ws_url = resolve_ws_endpoint(endpoint).await?;
        let browser = ChromeBrowser::connect(&ws_url, idle_timeout)?;
        Ok(Self::new(Arc::new(browser), ConnectionMode::Attached))
    }

    pub fn browser(&self) -> &dyn RemoteBrowser {
        self.browser.as_ref()
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Release the connection: terminate a launched browser, disconnect from
    /// an attached one
    pub async fn close(self) -> Result<()> {
        match self.mode {
            ConnectionMode::Launched => {
                info!("Closing launched browser");
                self.browser.terminate().await
            }
            ConnectionMode::Attached => {
                info!("Disconnecting from browser");
                self.browser.disconnect();
                Ok(())
            }
        }
    }
}

/// A tab together with whether closing it is this run's job
pub struct PageHandle {
    page: Arc<dyn RemotePage>,
    owned: bool,
}

impl PageHandle {
    pub fn new(page: Arc<dyn RemotePage>, owned: bool) -> Self {
        Self { page, owned }
    }

    pub fn page(&self) -> &Arc<dyn RemotePage> {
        &self.page
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Close the tab if this run opened it; a pre-existing tab is left alone
    pub async fn close(self) -> Result<()> {
        if self.owned {
            debug!("Closing page");
            self.page.close().await
        } else {
            debug!("Leaving pre-existing page open");
            Ok(())
        }
    }
}

impl From<LocatedTab> for PageHandle {
    fn from(tab: LocatedTab) -> Self {
        Self::new(tab.page, tab.created)
    }
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Turn a DevTools address into the browser's websocket URL
pub async fn resolve_ws_endpoint(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint)
        .map_err(|e| ScrapeError::Parse(format!("Invalid browser endpoint {}: {}", endpoint, e)))?;

    match url.scheme() {
        "ws" | "wss" => Ok(endpoint.to_string()),
        "http" | "https" => {
            let version_url = url
                .join("/json/version")
                .map_err(|e| ScrapeError::Parse(format!("Invalid browser endpoint {}: {}", endpoint, e)))?;
            debug!("Resolving websocket endpoint via {}", version_url);

            let info: VersionInfo = reqwest::get(version_url.as_str())
                .await
                .map_err(|e| ScrapeError::Browser(format!("Failed to query {}: {}", version_url, e)))?
                .error_for_status()
                .map_err(|e| ScrapeError::Browser(format!("Failed to query {}: {}", version_url, e)))?
                .json()
                .await
                .map_err(|e| {
                    ScrapeError::Browser(format!("Unexpected response from {}: {}", version_url, e))
                })?;

            Ok(info.web_socket_debugger_url)
        }
        other => Err(ScrapeError::Parse(format!(
            "Unsupported browser endpoint scheme '{}' in {}",
            other, endpoint
        ))),
    }
}
