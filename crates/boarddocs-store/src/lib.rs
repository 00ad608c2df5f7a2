//! Manifest storage for the BoardDocs archiver
//!
//! Scraped meetings and items are kept as pretty-printed JSON under a
//! directory tree keyed by slug. The tree is both the archive and the
//! resumability cache: a rerun reads what is already there and only scrapes
//! what is missing.
//!
//! # Example Usage
//!
//! ```no_run
//! use boarddocs_store::ManifestStore;
//!
//! # async fn example() -> boarddocs_core::Result<()> {
//! let store = ManifestStore::new("archive");
//! match store.cached_meeting("2024-03-05-regular-meeting").await? {
//!     Some(meeting) => println!("{} items already scraped", meeting.item_count()),
//!     None => println!("needs scraping"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod manifest_io;
pub mod store;

pub use manifest_io::{exists, read_manifest, write_manifest};
pub use store::{ManifestStore, ITEM_FILE, MEETING_FILE};
