//! The remote page and browser capabilities the archiver drives
//!
//! Everything above this module talks to the browser through [`RemotePage`]
//! and [`RemoteBrowser`]; the `headless_chrome` implementations live in
//! [`crate::chrome`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use boarddocs_core::Result;
use serde_json::Value;

/// Identity of one in-flight request, unique per request on a page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A request as announced by the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRequest {
    pub id: RequestId,
    pub method: String,
    pub url: String,
    pub post_data: Option<String>,
}

/// Request lifecycle notification emitted by a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    Started(TrackedRequest),
    Finished {
        id: RequestId,
        status: Option<u16>,
    },
    Failed {
        id: RequestId,
        error: String,
    },
}

impl RequestEvent {
    pub fn id(&self) -> &RequestId {
        match self {
            RequestEvent::Started(request) => &request.id,
            RequestEvent::Finished { id, .. } | RequestEvent::Failed { id, .. } => id,
        }
    }
}

/// Callback receiving a page's request notifications
///
/// Called from whatever thread the browser connection delivers events on,
/// so it must only hand the event off.
pub type RequestListener = Arc<dyn Fn(RequestEvent) + Send + Sync>;

/// Handle for removing a listener added with [`RemotePage::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(pub u64);

/// One browser tab
#[async_trait]
pub trait RemotePage: Send + Sync {
    /// Current URL of the tab
    fn url(&self) -> String;

    async fn navigate(&self, url: &str) -> Result<()>;

    /// Activate the tab; clicks are ignored by background tabs
    async fn bring_to_front(&self) -> Result<()>;

    /// Evaluate a script and return its JSON value
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Round-trip through the page's microtask queue
    ///
    /// When this returns, notifications for requests started by earlier
    /// interactions have been delivered to listeners.
    async fn yield_to_page(&self) -> Result<()>;

    /// Click the first element matching `selector`, scrolling it into view
    async fn click(&self, selector: &str) -> Result<()>;

    /// Whether the first element matching `selector` is rendered
    async fn is_visible(&self, selector: &str) -> Result<bool>;

    /// Wait until `selector` matches, failing with
    /// [`boarddocs_core::ScrapeError::SelectorTimeout`]
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Register a request listener
    fn subscribe(&self, listener: RequestListener) -> Result<Subscription>;

    /// Remove a listener; unknown subscriptions are ignored
    fn unsubscribe(&self, subscription: Subscription) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A browser process reachable over DevTools
#[async_trait]
pub trait RemoteBrowser: Send + Sync {
    /// Open tabs in the order the browser reports them, oldest first
    fn tabs(&self) -> Result<Vec<Arc<dyn RemotePage>>>;

    async fn new_tab(&self) -> Result<Arc<dyn RemotePage>>;

    /// Shut the browser process down
    async fn terminate(&self) -> Result<()>;

    /// Drop the connection and leave the browser running
    fn disconnect(&self);
}
