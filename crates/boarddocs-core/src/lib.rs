//! # boarddocs-core
//!
//! Core types for the BoardDocs meeting archiver.
//!
//! The archiver drives a remote browser through a BoardDocs site and keeps
//! what it finds in a directory tree of JSON manifests:
//!
//! - `<meetingSlug>/meeting.json` holds a [`MeetingManifest`]
//! - `<meetingSlug>/<itemSlug>/item.json` holds an [`ItemManifest`]
//! - attachments sit next to the item manifest that lists them
//!
//! The manifests double as a resumability cache, so every type here is keyed
//! by slugs derived deterministically from scraped fields (see [`slug`]).

mod config;
mod error;
mod schema;
pub mod slug;
mod types;

pub use config::{
    BrowserSettings, RetrySettings, ScraperConfig, TimingSettings, CONFIG_FILE_NAME, DEFAULT_SITE_URL,
};
pub use error::{Result, ScrapeError};
pub use schema::{FieldPath, Schema, Violations};
pub use slug::{DateRange, MeetingTitle};
pub use types::*;
