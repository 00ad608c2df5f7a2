//! Browser control for the BoardDocs archiver
//!
//! This crate drives a Chrome tab over the DevTools protocol and decides when
//! a single-page app has finished reacting to a click.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use boarddocs_browser::{find_or_open_tab, BrowserConnection, PageHandle, RequestTracker};
//! use boarddocs_core::BrowserSettings;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> boarddocs_core::Result<()> {
//!     let connection = BrowserConnection::launch(&BrowserSettings::default())?;
//!     let handle = PageHandle::from(
//!         find_or_open_tab(connection.browser(), "https://go.boarddocs.com/").await?,
//!     );
//!
//!     let tracker = RequestTracker::new(handle.page().clone(), "home")?;
//!     handle.page().navigate("https://go.boarddocs.com/").await?;
//!     tracker.wait(Duration::from_secs(30)).await?;
//!     tracker.close();
//!
//!     handle.close().await?;
//!     connection.close().await
//! }
//! ```
//!
//! # Architecture
//!
//! - [`page`]: the [`RemotePage`] and [`RemoteBrowser`] seams
//! - [`chrome`]: `headless_chrome` implementations of those seams
//! - [`tracker`]: network settle detection
//! - [`tab`]: reuse of an already open tab
//! - [`connection`]: launch or attach, and matching cleanup

pub mod chrome;
pub mod connection;
pub mod page;
pub mod tab;
pub mod tracker;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use chrome::{ChromeBrowser, ChromePage};
pub use connection::{resolve_ws_endpoint, BrowserConnection, ConnectionMode, PageHandle};
pub use page::{
    RemoteBrowser, RemotePage, RequestEvent, RequestId, RequestListener, Subscription, TrackedRequest,
};
pub use tab::{find_or_open_tab, site_root, LocatedTab};
pub use tracker::{OnceRequestTracker, RequestTracker, TrackerState};
