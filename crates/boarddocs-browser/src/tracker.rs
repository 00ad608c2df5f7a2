//! Network settle detection for one page
//!
//! A click on a single-page app does not navigate; it mutates the DOM and
//! fires background requests. [`RequestTracker`] watches those requests and
//! answers one question: has everything the last interaction started
//! finished?
//!
//! Each tracker owns a mailbox task. The page listener, `wait`, timeout
//! expiry, and `close` all post messages to it, so every state transition
//! happens in arrival order on one task:
//!
//! ```text
//! Idle --wait--> Armed --live set drained--> Settled
//!   |              |
//!   |              +--deadline--> TimedOut
//!   +---------------------------------------> Closed (from any state)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boarddocs_core::{Result, ScrapeError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, error, warn, Instrument};

use crate::page::{RemotePage, RequestEvent, RequestId, RequestListener, Subscription, TrackedRequest};

/// Lifecycle of a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Listening, nobody waiting yet
    Idle,
    /// At least one waiter is blocked on in-flight requests
    Armed,
    /// The live set drained while waiters were pending
    Settled,
    /// A waiter's deadline passed first
    TimedOut,
    /// Listener removed; no further notifications are applied
    Closed,
}

enum Message {
    Page(RequestEvent),
    Wait(oneshot::Sender<Result<()>>),
    Expire(oneshot::Sender<Vec<String>>),
    Pending(oneshot::Sender<Vec<String>>),
    Close,
}

/// State owned by the mailbox task
struct Mailbox {
    name: String,
    live: Vec<TrackedRequest>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    fault: Option<String>,
    state: watch::Sender<TrackerState>,
}

impl Mailbox {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = inbox.recv().await {
            match message {
                Message::Page(event) => self.on_event(event),
                Message::Wait(reply) => self.on_wait(reply),
                Message::Expire(reply) => {
                    self.state.send_replace(TrackerState::TimedOut);
                    let _ = reply.send(self.urls());
                }
                Message::Pending(reply) => {
                    let _ = reply.send(self.urls());
                }
                Message::Close => break,
            }
        }
        // Dropping pending replies wakes their waiters with a closed error
        self.waiters.clear();
        self.state.send_replace(TrackerState::Closed);
        debug!(abandoned = self.live.len(), "closed");
    }

    fn on_event(&mut self, event: RequestEvent) {
        match event {
            RequestEvent::Started(request) => {
                if self.live.iter().any(|r| r.id == request.id) {
                    error!(id = %request.id, url = %request.url, "duplicate request notification");
                    self.fail(format!("{}: duplicate request {}", self.name, request.url));
                    return;
                }
                debug!(
                    method = %request.method,
                    url = %request.url,
                    post_data = request.post_data.as_deref().unwrap_or(""),
                    in_flight = self.live.len() + 1,
                    "Detected request"
                );
                self.live.push(request);
            }
            RequestEvent::Finished { id, status } => {
                if let Some(request) = self.complete(&id) {
                    debug!(
                        method = %request.method,
                        url = %request.url,
                        status = ?status,
                        remaining = self.live.len(),
                        "Request completed"
                    );
                }
                self.settle_if_idle();
            }
            RequestEvent::Failed { id, error } => {
                if let Some(request) = self.complete(&id) {
                    debug!(
                        method = %request.method,
                        url = %request.url,
                        error = %error,
                        remaining = self.live.len(),
                        "Request failed"
                    );
                }
                self.settle_if_idle();
            }
        }
    }

    fn on_wait(&mut self, reply: oneshot::Sender<Result<()>>) {
        if let Some(fault) = &self.fault {
            let _ = reply.send(Err(ScrapeError::Usage(fault.clone())));
        } else if self.live.is_empty() {
            debug!("resolving right away; no requests in flight");
            self.state.send_replace(TrackerState::Settled);
            let _ = reply.send(Ok(()));
        } else {
            self.state.send_replace(TrackerState::Armed);
            self.waiters.push(reply);
        }
    }

    fn complete(&mut self, id: &RequestId) -> Option<TrackedRequest> {
        let index = self.live.iter().position(|r| &r.id == id)?;
        Some(self.live.remove(index))
    }

    fn settle_if_idle(&mut self) {
        if !self.live.is_empty() || self.waiters.is_empty() {
            return;
        }
        debug!(waiters = self.waiters.len(), "finally resolving");
        self.state.send_replace(TrackerState::Settled);
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn fail(&mut self, fault: String) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ScrapeError::Usage(fault.clone())));
        }
        self.fault = Some(fault);
    }

    fn urls(&self) -> Vec<String> {
        self.live.iter().map(|r| r.url.clone()).collect()
    }
}

/// Tracks in-flight requests on one page and waits for them to settle
///
/// `wait` may be called repeatedly, and concurrently: every waiter pending
/// when the live set drains is released together. The tracker must be
/// closed on every exit path; dropping it closes it.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use boarddocs_browser::{RemotePage, RequestTracker};
///
/// async fn open_agenda(page: Arc<dyn RemotePage>) -> boarddocs_core::Result<()> {
///     let tracker = RequestTracker::new(page.clone(), "agenda")?;
///     page.click("a#btn-view-agenda").await?;
///     let settled = tracker.wait(Duration::from_secs(30)).await;
///     tracker.close();
///     settled
/// }
/// ```
pub struct RequestTracker {
    name: String,
    page: Arc<dyn RemotePage>,
    mailbox: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<TrackerState>,
    subscription: Mutex<Option<Subscription>>,
    closed: AtomicBool,
}

impl RequestTracker {
    /// Start tracking requests on `page`
    ///
    /// Must be called within a Tokio runtime. The mailbox task runs in a
    /// `request_tracker` span nested under the caller's current span.
    pub fn new(page: Arc<dyn RemotePage>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(TrackerState::Idle);

        let forward = mailbox.clone();
        let listener: RequestListener = Arc::new(move |event: RequestEvent| {
            // The receiver is gone once the tracker closed; late events are dropped
            let _ = forward.send(Message::Page(event));
        });
        let subscription = page.subscribe(listener)?;

        let span = tracing::debug_span!("request_tracker", name = %name);
        tokio::spawn(
            Mailbox {
                name: name.clone(),
                live: Vec::new(),
                waiters: Vec::new(),
                fault: None,
                state: state_tx,
            }
            .run(inbox)
            .instrument(span),
        );

        Ok(Self {
            name,
            page,
            mailbox,
            state,
            subscription: Mutex::new(Some(subscription)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TrackerState {
        if self.is_closed() {
            TrackerState::Closed
        } else {
            *self.state.borrow()
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until no tracked request is in flight
    ///
    /// Yields to the page first so requests queued by the preceding
    /// interaction are registered before the live set is inspected, and once
    /// more after settling. Fails with [`ScrapeError::Timeout`] naming every
    /// outstanding URL if `timeout` passes first; the tracker stays open.
    pub async fn wait(&self, timeout: Duration) -> Result<()> {
        if self.is_closed() {
            return Err(ScrapeError::Usage(format!(
                "{}: wait called after close",
                self.name
            )));
        }

        let deadline = Instant::now() + timeout;
        match time::timeout_at(deadline, self.settle()).await {
            Ok(settled) => settled?,
            Err(_) => return Err(self.expire().await),
        }

        self.page.yield_to_page().await
    }

    async fn settle(&self) -> Result<()> {
        self.page.yield_to_page().await?;

        let (reply, settled) = oneshot::channel();
        self.send(Message::Wait(reply))?;
        settled.await.map_err(|_| {
            ScrapeError::Usage(format!("{}: closed while waiting", self.name))
        })?
    }

    async fn expire(&self) -> ScrapeError {
        let (reply, pending) = oneshot::channel();
        let pending = match self.send(Message::Expire(reply)) {
            Ok(()) => pending.await.unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        warn!(tracker = %self.name, pending = pending.len(), "timed out waiting for requests");
        ScrapeError::Timeout {
            tracker: self.name.clone(),
            pending,
        }
    }

    /// URLs of the requests currently in flight, oldest first
    pub async fn pending_urls(&self) -> Result<Vec<String>> {
        let (reply, pending) = oneshot::channel();
        self.send(Message::Pending(reply))?;
        pending
            .await
            .map_err(|_| ScrapeError::Usage(format!("{}: tracker is closed", self.name)))
    }

    fn send(&self, message: Message) -> Result<()> {
        self.mailbox
            .send(message)
            .map_err(|_| ScrapeError::Usage(format!("{}: tracker is closed", self.name)))
    }

    /// Remove the page listener and stop the mailbox; idempotent
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let subscription = match self.subscription.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(subscription) = subscription {
            if let Err(e) = self.page.unsubscribe(subscription) {
                warn!(tracker = %self.name, "Failed to remove request listener: {}", e);
            }
        }

        let _ = self.mailbox.send(Message::Close);
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        self.close();
    }
}

/// A [`RequestTracker`] for a single settle point
///
/// Waiting twice is a usage error, whatever the tracker's state.
pub struct OnceRequestTracker {
    inner: RequestTracker,
    used: AtomicBool,
}

impl OnceRequestTracker {
    pub fn new(page: Arc<dyn RemotePage>, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            inner: RequestTracker::new(page, name)?,
            used: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn state(&self) -> TrackerState {
        self.inner.state()
    }

    pub async fn wait(&self, timeout: Duration) -> Result<()> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(ScrapeError::Usage(format!(
                "{}: wait should not be called multiple times",
                self.inner.name()
            )));
        }
        self.inner.wait(timeout).await
    }

    /// Wait once, then close whatever the outcome
    pub async fn wait_and_close(self, timeout: Duration) -> Result<()> {
        let settled = self.wait(timeout).await;
        self.inner.close();
        settled
    }

    pub fn close(&self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{failed, finished, started, FakePage};

    const LONG: Duration = Duration::from_secs(5);

    fn finish_later(page: &Arc<FakePage>, event: RequestEvent, after_ms: u64) {
        let page = page.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(after_ms)).await;
            page.emit(event);
        });
    }

    #[tokio::test]
    async fn test_settles_immediately_when_idle() {
        let page = FakePage::new("https://go.boarddocs.com/");
        let tracker = RequestTracker::new(page.clone(), "idle").unwrap();

        tracker.wait(LONG).await.unwrap();

        assert_eq!(tracker.state(), TrackerState::Settled);
        // Once before inspecting the live set, once after settling
        assert_eq!(page.yields(), 2);
    }

    #[tokio::test]
    async fn test_requests_queued_before_wait_are_seen() {
        let page = FakePage::new("https://go.boarddocs.com/");
        let tracker = RequestTracker::new(page.clone(), "agenda").unwrap();

        page.emit_on_yield(started("1", "https://go.boarddocs.com/BD-GetAgenda"));
        finish_later(&page, finished("1"), 30);

        let begun = std::time::Instant::now();
        tracker.wait(LONG).await.unwrap();

        assert!(begun.elapsed() >= Duration::from_millis(25));
        assert_eq!(tracker.state(), TrackerState::Settled);
    }

    #[tokio::test]
    async fn test_timeout_names_pending_urls() {
        let page = FakePage::new("https://go.boarddocs.com/");
        let tracker = RequestTracker::new(page.clone(), "meeting").unwrap();

        page.emit(started("1", "https://go.boarddocs.com/slow"));
        page.emit(started("2", "https://go.boarddocs.com/fast"));
        page.emit(finished("2"));

        let err = tracker.wait(Duration::from_millis(50)).await.unwrap_err();
        match &err {
            ScrapeError::Timeout { tracker, pending } => {
                assert_eq!(tracker, "meeting");
                assert_eq!(pending, &vec!["https://go.boarddocs.com/slow".to_string()]);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(
            err.to_string(),
            "meeting: timeout waiting for https://go.boarddocs.com/slow"
        );
        assert_eq!(tracker.state(), TrackerState::TimedOut);

        // The tracker stays usable after a timeout
        page.emit(finished("1"));
        tracker.wait(LONG).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_request_counts_as_done() {
        let page = FakePage::new("https://go.boarddocs.com/");
        let tracker = RequestTracker::new(page.clone(), "failing").unwrap();

        page.emit(started("1", "https://go.boarddocs.com/broken"));
        finish_later(&page, failed("1"), 10);

        tracker.wait(LONG).await.unwrap();
        assert!(tracker.pending_urls().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_waiters_resolve_together() {
        let page = FakePage::new("https://go.boarddocs.com/");
        let tracker = RequestTracker::new(page.clone(), "shared").unwrap();

        page.emit(started("1", "https://go.boarddocs.com/a"));
        let (first, second, _) = tokio::join!(tracker.wait(LONG), tracker.wait(LONG), async {
            time::sleep(Duration::from_millis(20)).await;
            page.emit(finished("1"));
        });

        first.unwrap();
        second.unwrap();
        assert_eq!(tracker.state(), TrackerState::Settled);
    }

    #[tokio::test]
    async fn test_unknown_completion_is_ignored() {
        let page = FakePage::new("https://go.boarddocs.com/");
        let tracker = RequestTracker::new(page.clone(), "stray").unwrap();

        page.emit(finished("never-started"));
        page.emit(started("1", "https://go.boarddocs.com/a"));

        assert_eq!(
            tracker.pending_urls().await.unwrap(),
            vec!["https://go.boarddocs.com/a".to_string()]
        );
    }

    #[tokio::test]
    async fn test_duplicate_start_faults_tracker() {
        let page = FakePage::new("https://go.boarddocs.com/");
        let tracker = RequestTracker::new(page.clone(), "dup").unwrap();

        page.emit(started("1", "https://go.boarddocs.com/a"));
        page.emit(started("1", "https://go.boarddocs.com/a"));

        let err = tracker.wait(LONG).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Usage(_)), "got {:?}", err);
        assert_eq!(tracker.pending_urls().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_unsubscribes() {
        let page = FakePage::new("https://go.boarddocs.com/");
        let tracker = RequestTracker::new(page.clone(), "closing").unwrap();
        assert_eq!(page.listener_count(), 1);

        tracker.close();
        tracker.close();

        assert_eq!(page.listener_count(), 0);
        assert!(tracker.is_closed());
        assert_eq!(tracker.state(), TrackerState::Closed);

        let err = tracker.wait(LONG).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Usage(_)));
    }

    #[tokio::test]
    async fn test_close_releases_pending_waiter() {
        let page = FakePage::new("https://go.boarddocs.com/");
        let tracker = RequestTracker::new(page.clone(), "abandoned").unwrap();

        page.emit(started("1", "https://go.boarddocs.com/a"));
        let (waited, _) = tokio::join!(tracker.wait(LONG), async {
            time::sleep(Duration::from_millis(20)).await;
            tracker.close();
        });

        assert!(matches!(waited, Err(ScrapeError::Usage(_))));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let page = FakePage::new("https://go.boarddocs.com/");
        {
            let _tracker = RequestTracker::new(page.clone(), "scoped").unwrap();
            assert_eq!(page.listener_count(), 1);
        }
        assert_eq!(page.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_click_requests_delivered_on_yield() {
        let page = FakePage::new("https://go.boarddocs.com/");
        page.on_click(
            "#btn-view-agenda",
            vec![started("7", "https://go.boarddocs.com/BD-GetAgenda")],
        );
        let tracker = RequestTracker::new(page.clone(), "click").unwrap();

        page.click("#btn-view-agenda").await.unwrap();
        assert!(tracker.pending_urls().await.unwrap().is_empty());

        let err = tracker.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(err.to_string().contains("BD-GetAgenda"));
    }

    #[tokio::test]
    async fn test_once_tracker_rejects_second_wait() {
        let page = FakePage::new("https://go.boarddocs.com/");
        let tracker = OnceRequestTracker::new(page.clone(), "once").unwrap();

        tracker.wait(LONG).await.unwrap();
        let err = tracker.wait(LONG).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Usage(_)));
    }

    #[tokio::test]
    async fn test_wait_and_close_closes_on_timeout() {
        let page = FakePage::new("https://go.boarddocs.com/");
        let tracker = OnceRequestTracker::new(page.clone(), "once").unwrap();
        page.emit(started("1", "https://go.boarddocs.com/hung"));

        let err = tracker
            .wait_and_close(Duration::from_millis(30))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(page.listener_count(), 0);
    }
}
