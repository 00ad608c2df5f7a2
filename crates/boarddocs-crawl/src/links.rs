//! Attachment descriptors

use boarddocs_core::{Link, Result, ScrapeError};
use tracing::warn;
use url::Url;

use crate::site::RawLink;

/// File name an attachment is saved under: the decoded last path segment
///
/// `https://host/files/ABC/$file/Board%20Minutes.pdf` becomes
/// `Board Minutes.pdf`.
pub fn attachment_filename(href: &str) -> Result<String> {
    let url = Url::parse(href)
        .map_err(|e| ScrapeError::Parse(format!("Invalid attachment URL {}: {}", href, e)))?;

    let segment = url
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or_default();
    let decoded = urlencoding::decode(segment)
        .map_err(|e| ScrapeError::Parse(format!("Undecodable attachment name in {}: {}", href, e)))?;

    // A decoded %2F is still a path separator on disk
    let filename = decoded.rsplit(['/', '\\']).next().unwrap_or_default().to_string();
    if filename.is_empty() || filename == "." || filename == ".." {
        return Err(ScrapeError::Parse(format!("No file name in attachment URL {}", href)));
    }
    Ok(filename)
}

/// Agenda and link numbering without surrounding space or a trailing `.`
pub fn trim_order(order: &str) -> String {
    let order = order.trim();
    order.strip_suffix('.').unwrap_or(order).to_string()
}

/// Normalize a link read from the item pane
///
/// A link whose href yields no file name is kept with an empty `filename`.
pub fn to_link(raw: RawLink) -> Link {
    let filename = attachment_filename(&raw.href).unwrap_or_else(|e| {
        warn!("Keeping attachment {:?} without a file name: {}", raw.text, e);
        String::new()
    });
    let order = raw.order.as_deref().map(trim_order);

    Link {
        order,
        unique: raw.unique,
        href: raw.href,
        text: raw.text,
        filename,
    }
}
