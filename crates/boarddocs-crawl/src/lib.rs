//! Crawl workflow for the BoardDocs archiver
//!
//! [`Crawler`] walks the meetings tab of a BoardDocs site: every year in the
//! accordion, every meeting in a year, every item on a meeting's agenda. It
//! writes what it finds through a [`boarddocs_store::ManifestStore`] and,
//! when asked, downloads item attachments.
//!
//! The page structure this depends on lives in [`site`].

pub mod action;
pub mod download;
pub mod links;
pub mod retry;
pub mod site;
pub mod workflow;

pub use action::OnceAction;
pub use download::Downloader;
pub use links::attachment_filename;
pub use retry::RetryPolicy;
pub use workflow::{CrawlOptions, CrawlSummary, Crawler};
