//! Attachment downloads

use std::path::{Path, PathBuf};

use boarddocs_core::{Result, ScrapeError};
use reqwest::{Client, Response};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Streams attachments to disk
///
/// A download is written next to its target with a `.part` suffix and
/// renamed when complete, so an interrupted run never leaves a truncated
/// file that a later run would mistake for a finished one.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("boarddocs-archiver/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScrapeError::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Fetch `url` into `path`, creating parent directories; returns the byte count
    pub async fn download(&self, url: &str, path: &Path) -> Result<u64> {
        info!("Downloading {} to {}", url, path.display());

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::Http(format!("Request for {} failed: {}", url, e)))?
            .error_for_status()
            .map_err(|e| ScrapeError::Http(format!("Download of {} failed: {}", url, e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let part_path = part_path(path);
        let result = match write_part(&mut response, url, &part_path).await {
            Ok(written) => fs::rename(&part_path, path)
                .await
                .map(|_| written)
                .map_err(ScrapeError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(written) => {
                debug!("Wrote {} bytes to {}", written, path.display());
                Ok(written)
            }
            Err(e) => {
                match fs::remove_file(&part_path).await {
                    Err(cleanup) if cleanup.kind() != std::io::ErrorKind::NotFound => {
                        warn!("Could not remove {}: {}", part_path.display(), cleanup);
                    }
                    _ => {}
                }
                Err(e)
            }
        }
    }
}

/// Stream the response body into `part_path`
async fn write_part(response: &mut Response, url: &str, part_path: &Path) -> Result<u64> {
    let mut file = fs::File::create(part_path).await?;
    let mut written = 0u64;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ScrapeError::Http(format!("Download of {} interrupted: {}", url, e)))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
