//! In-memory page and browser doubles
//!
//! [`FakePage`] follows the same delivery rules as a real tab: request
//! notifications caused by a click are not delivered during the click but on
//! the next round-trip through the page ([`RemotePage::yield_to_page`]).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use boarddocs_core::{Result, ScrapeError};
use serde_json::Value;

use crate::page::{
    RemoteBrowser, RemotePage, RequestEvent, RequestId, RequestListener, Subscription, TrackedRequest,
};

/// Build a `Started` notification for a GET request
pub fn started(id: &str, url: &str) -> RequestEvent {
    RequestEvent::Started(TrackedRequest {
        id: RequestId::from(id),
        method: "GET".to_string(),
        url: url.to_string(),
        post_data: None,
    })
}

/// Build a `Finished` notification with status 200
pub fn finished(id: &str) -> RequestEvent {
    RequestEvent::Finished {
        id: RequestId::from(id),
        status: Some(200),
    }
}

/// Build a `Failed` notification
pub fn failed(id: &str) -> RequestEvent {
    RequestEvent::Failed {
        id: RequestId::from(id),
        error: "net::ERR_FAILED".to_string(),
    }
}

/// Scripted stand-in for a browser tab
#[derive(Default)]
pub struct FakePage {
    url: Mutex<String>,
    listeners: Mutex<Vec<(Subscription, RequestListener)>>,
    next_subscription: AtomicU64,
    deferred: Mutex<VecDeque<RequestEvent>>,
    click_events: Mutex<HashMap<String, Vec<RequestEvent>>>,
    hidden: Mutex<HashSet<String>>,
    missing: Mutex<HashMap<String, usize>>,
    scripts: Mutex<Vec<(String, Value)>>,
    clicks: Mutex<Vec<String>>,
    navigations: Mutex<Vec<String>>,
    yields: AtomicUsize,
    closed: AtomicBool,
}

impl FakePage {
    pub fn new(url: &str) -> Arc<Self> {
        let page = Self::default();
        *lock(&page.url) = url.to_string();
        Arc::new(page)
    }

    /// Deliver a notification to every listener now
    pub fn emit(&self, event: RequestEvent) {
        let listeners: Vec<RequestListener> =
            lock(&self.listeners).iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(event.clone());
        }
    }

    /// Deliver a notification on the next yield
    pub fn emit_on_yield(&self, event: RequestEvent) {
        lock(&self.deferred).push_back(event);
    }

    /// Notifications queued whenever `selector` is clicked
    pub fn on_click(&self, selector: &str, events: Vec<RequestEvent>) {
        lock(&self.click_events).insert(selector.to_string(), events);
    }

    pub fn set_hidden(&self, selector: &str, hidden: bool) {
        let mut set = lock(&self.hidden);
        if hidden {
            set.insert(selector.to_string());
        } else {
            set.remove(selector);
        }
    }

    /// Make `wait_for_selector` time out `times` times before `selector` shows up
    pub fn missing_for(&self, selector: &str, times: usize) {
        lock(&self.missing).insert(selector.to_string(), times);
    }

    /// Answer scripts containing `fragment` with `value`
    pub fn script_result(&self, fragment: &str, value: Value) {
        lock(&self.scripts).push((fragment.to_string(), value));
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn clicks(&self) -> Vec<String> {
        lock(&self.clicks).clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        lock(&self.navigations).clone()
    }

    pub fn yields(&self) -> usize {
        self.yields.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RemotePage for FakePage {
    fn url(&self) -> String {
        lock(&self.url).clone()
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        lock(&self.navigations).push(url.to_string());
        *lock(&self.url) = url.to_string();
        Ok(())
    }

    async fn bring_to_front(&self) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let scripts = lock(&self.scripts);
        Ok(scripts
            .iter()
            .find(|(fragment, _)| script.contains(fragment.as_str()))
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null))
    }

    async fn yield_to_page(&self) -> Result<()> {
        self.yields.fetch_add(1, Ordering::SeqCst);
        let deferred: Vec<RequestEvent> = lock(&self.deferred).drain(..).collect();
        for event in deferred {
            self.emit(event);
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        lock(&self.clicks).push(selector.to_string());
        if let Some(events) = lock(&self.click_events).get(selector) {
            lock(&self.deferred).extend(events.iter().cloned());
        }
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        Ok(!lock(&self.hidden).contains(selector))
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let mut missing = lock(&self.missing);
        match missing.get_mut(selector) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ScrapeError::SelectorTimeout {
                    selector: selector.to_string(),
                    timeout,
                })
            }
            _ => Ok(()),
        }
    }

    fn subscribe(&self, listener: RequestListener) -> Result<Subscription> {
        let subscription = Subscription(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push((subscription, listener));
        Ok(subscription)
    }

    fn unsubscribe(&self, subscription: Subscription) -> Result<()> {
        lock(&self.listeners).retain(|(s, _)| *s != subscription);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Stand-in for a browser with a fixed list of tabs
#[derive(Default)]
pub struct FakeBrowser {
    tabs: Mutex<Vec<Arc<FakePage>>>,
    terminated: AtomicBool,
    disconnected: AtomicBool,
}

impl FakeBrowser {
    pub fn with_tabs(urls: &[&str]) -> Self {
        let browser = Self::default();
        lock(&browser.tabs).extend(urls.iter().map(|url| FakePage::new(url)));
        browser
    }

    pub fn tab_count(&self) -> usize {
        lock(&self.tabs).len()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteBrowser for FakeBrowser {
    fn tabs(&self) -> Result<Vec<Arc<dyn RemotePage>>> {
        Ok(lock(&self.tabs)
            .iter()
            .map(|page| page.clone() as Arc<dyn RemotePage>)
            .collect())
    }

    async fn new_tab(&self) -> Result<Arc<dyn RemotePage>> {
        let page = FakePage::new("about:blank");
        lock(&self.tabs).push(page.clone());
        Ok(page)
    }

    async fn terminate(&self) -> Result<()> {
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}
