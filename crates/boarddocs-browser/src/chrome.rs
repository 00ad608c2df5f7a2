//! `headless_chrome` implementations of the remote page and browser

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use boarddocs_core::{BrowserSettings, Result, ScrapeError};
use headless_chrome::browser::tab::EventListener;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::Network;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::page::{
    RemoteBrowser, RemotePage, RequestEvent, RequestId, RequestListener, Subscription, TrackedRequest,
};

type CdpListener = dyn EventListener<Event> + Send + Sync;

/// Prefix of the per-page binding that acknowledges a yield
const YIELD_BINDING: &str = "__boarddocsYield";

/// How long a yield may take to come back through the event stream
const YIELD_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_BINDING: AtomicU64 = AtomicU64::new(0);

/// Script that calls the yield binding with `token` after one trip
/// through the page's microtask queue
fn yield_script(binding: &str, token: u64) -> String {
    format!(
        "(async () => {{ await Promise.resolve(); window[{}]({}); }})()",
        Value::from(binding),
        Value::from(token.to_string())
    )
}

/// Token carried by a yield binding call
///
/// On the document that was current when the binding was added the payload
/// is the bare token. Documents loaded later wrap the call and send
/// `{"name", "seq", "args": [token]}` instead.
fn yield_token(payload: &str) -> Option<u64> {
    if let Ok(token) = payload.parse() {
        return Some(token);
    }
    let wrapped: Value = serde_json::from_str(payload).ok()?;
    wrapped.get("args")?.get(0)?.as_str()?.parse().ok()
}

fn browser_error(context: &str, e: impl std::fmt::Display) -> ScrapeError {
    ScrapeError::Browser(format!("{}: {}", context, e))
}

/// A Chrome tab driven over the DevTools protocol
pub struct ChromePage {
    tab: Arc<Tab>,
    listeners: Mutex<HashMap<Subscription, Weak<CdpListener>>>,
    next_subscription: AtomicU64,
    network_enabled: AtomicBool,
    yield_binding: String,
    yield_installed: AtomicBool,
    next_yield: AtomicU64,
    /// Highest yield token seen on the tab's event thread
    yields_seen: Arc<watch::Sender<u64>>,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self {
            tab,
            listeners: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
            network_enabled: AtomicBool::new(false),
            yield_binding: format!(
                "{}{}",
                YIELD_BINDING,
                NEXT_BINDING.fetch_add(1, Ordering::SeqCst)
            ),
            yield_installed: AtomicBool::new(false),
            next_yield: AtomicU64::new(0),
            yields_seen: Arc::new(watch::channel(0).0),
        }
    }

    /// Get reference to the underlying tab
    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    fn enable_network(&self) -> Result<()> {
        if self.network_enabled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Every Network.enable parameter is optional
        let enable: Network::Enable = serde_json::from_value(Value::Object(Default::default()))?;
        self.tab
            .call_method(enable)
            .map_err(|e| browser_error("Failed to enable network events", e))?;
        Ok(())
    }

    /// Expose the binding whose calls mark the end of a yield
    ///
    /// Binding calls arrive on the same per-tab event thread as network
    /// events, after every event the page emitted before the call. The
    /// binding stays registered for the life of the tab: the event thread
    /// panics on calls to a binding it no longer knows.
    fn install_yield_binding(&self) -> Result<()> {
        if self.yield_installed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let seen = Arc::clone(&self.yields_seen);
        self.tab
            .expose_function(
                &self.yield_binding,
                Arc::new(move |payload: Value| {
                    if let Some(token) = payload.as_str().and_then(yield_token) {
                        seen.send_modify(|highest| *highest = (*highest).max(token));
                    }
                }),
            )
            .map_err(|e| {
                self.yield_installed.store(false, Ordering::SeqCst);
                browser_error("Failed to expose yield binding", e)
            })?;
        self.tab
            .enable_runtime()
            .map_err(|e| browser_error("Failed to enable runtime events", e))?;
        Ok(())
    }
}

/// Map a DevTools event onto a request notification
///
/// Redirect hops reuse the request id of the original request, so they are
/// folded into it rather than reported as new requests.
fn translate(event: &Event, statuses: &Mutex<HashMap<String, u16>>) -> Option<RequestEvent> {
    match event {
        Event::NetworkRequestWillBeSent(e) => {
            if e.params.redirect_response.is_some() {
                return None;
            }
            let request = &e.params.request;
            Some(RequestEvent::Started(TrackedRequest {
                id: RequestId(e.params.request_id.clone()),
                method: request.method.clone(),
                url: request.url.clone(),
                post_data: request.post_data.clone(),
            }))
        }
        Event::NetworkResponseReceived(e) => {
            if let Ok(mut statuses) = statuses.lock() {
                statuses.insert(e.params.request_id.clone(), e.params.response.status as u16);
            }
            None
        }
        Event::NetworkLoadingFinished(e) => {
            let status = statuses
                .lock()
                .ok()
                .and_then(|mut statuses| statuses.remove(&e.params.request_id));
            Some(RequestEvent::Finished {
                id: RequestId(e.params.request_id.clone()),
                status,
            })
        }
        Event::NetworkLoadingFailed(e) => {
            if let Ok(mut statuses) = statuses.lock() {
                statuses.remove(&e.params.request_id);
            }
            Some(RequestEvent::Failed {
                id: RequestId(e.params.request_id.clone()),
                error: e.params.error_text.clone(),
            })
        }
        _ => None,
    }
}

#[async_trait]
impl RemotePage for ChromePage {
    fn url(&self) -> String {
        self.tab.get_url()
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        debug!("Navigating to {}", url);

        self.tab
            .navigate_to(url)
            .map_err(|e| browser_error(&format!("Failed to navigate to {}", url), e))?;

        // Wait for navigation to complete
        self.tab
            .wait_until_navigated()
            .map_err(|e| browser_error(&format!("Navigation timeout for {}", url), e))?;

        info!("Successfully navigated to {}", url);
        Ok(())
    }

    async fn bring_to_front(&self) -> Result<()> {
        self.tab
            .bring_to_front()
            .map_err(|e| browser_error("Failed to activate tab", e))?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let result = self
            .tab
            .evaluate(script, true)
            .map_err(|e| browser_error("JavaScript evaluation failed", e))?;

        Ok(result.value.unwrap_or(Value::Null))
    }

    async fn yield_to_page(&self) -> Result<()> {
        self.install_yield_binding()?;

        let token = self.next_yield.fetch_add(1, Ordering::SeqCst) + 1;
        let mut seen = self.yields_seen.subscribe();
        self.tab
            .evaluate(&yield_script(&self.yield_binding, token), true)
            .map_err(|e| browser_error("Failed to yield to page", e))?;

        // The evaluate reply can overtake events still queued for listeners
        let acknowledged =
            tokio::time::timeout(YIELD_TIMEOUT, seen.wait_for(|highest| *highest >= token))
                .await
                .map(|received| received.is_ok());
        match acknowledged {
            Ok(true) => Ok(()),
            Ok(false) => Err(ScrapeError::Browser("yield binding dropped".to_string())),
            Err(_) => Err(ScrapeError::Browser(format!(
                "Yield {} was not acknowledged within {:?}",
                token, YIELD_TIMEOUT
            ))),
        }
    }

    async fn click(&self, selector: &str) -> Result<()> {
        debug!("Clicking {}", selector);
        self.tab
            .find_element(selector)
            .map_err(|e| browser_error(&format!("Element not found: {}", selector), e))?
            .click()
            .map_err(|e| browser_error(&format!("Failed to click {}", selector), e))?;
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return !!el && el.offsetParent !== null; }})()",
            serde_json::to_string(selector)?
        );
        Ok(self.evaluate(&script).await?.as_bool().unwrap_or(false))
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        debug!("Waiting for element: {} (timeout: {:?})", selector, timeout);

        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map_err(|_e| ScrapeError::SelectorTimeout {
                selector: selector.to_string(),
                timeout,
            })?;

        Ok(())
    }

    fn subscribe(&self, listener: RequestListener) -> Result<Subscription> {
        self.enable_network()?;

        let statuses = Mutex::new(HashMap::new());
        let handler: Arc<CdpListener> = Arc::new(move |event: &Event| {
            if let Some(request_event) = translate(event, &statuses) {
                listener(request_event);
            }
        });
        let weak = self
            .tab
            .add_event_listener(handler)
            .map_err(|e| browser_error("Failed to add event listener", e))?;

        let subscription = Subscription(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .map_err(|_| ScrapeError::Browser("listener registry poisoned".to_string()))?
            .insert(subscription, weak);
        Ok(subscription)
    }

    fn unsubscribe(&self, subscription: Subscription) -> Result<()> {
        let weak = self
            .listeners
            .lock()
            .map_err(|_| ScrapeError::Browser("listener registry poisoned".to_string()))?
            .remove(&subscription);
        if let Some(weak) = weak {
            self.tab
                .remove_event_listener(&weak)
                .map_err(|e| browser_error("Failed to remove event listener", e))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.tab
            .close(true)
            .map_err(|e| browser_error("Failed to close tab", e))?;
        Ok(())
    }
}

/// A Chrome process, launched or attached
pub struct ChromeBrowser {
    browser: Mutex<Option<Browser>>,
}

impl ChromeBrowser {
    /// Launch a new browser instance
    pub fn launch(settings: &BrowserSettings) -> Result<Self> {
        info!(
            "Launching browser (headless: {}, executable: {:?})",
            settings.headless, settings.executable
        );

        let window_size = settings.window_width.zip(settings.window_height);
        let launch_options = LaunchOptions::default_builder()
            .headless(settings.headless)
            .path(settings.executable.clone())
            .window_size(window_size)
            .idle_browser_timeout(settings.idle_timeout())
            .build()
            .map_err(|e| browser_error("Failed to launch browser", e))?;

        let browser =
            Browser::new(launch_options).map_err(|e| browser_error("Failed to launch browser", e))?;

        info!("Browser launched successfully");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
        })
    }

    /// Connect to an existing browser instance by its websocket URL
    pub fn connect(ws_url: &str, idle_timeout: Duration) -> Result<Self> {
        info!("Connecting to existing browser at {}", ws_url);

        let browser = Browser::connect_with_timeout(ws_url.to_string(), idle_timeout)
            .map_err(|e| browser_error("Failed to connect to browser", e))?;

        info!("Connected to browser successfully");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
        })
    }

    fn with_browser<T>(&self, f: impl FnOnce(&Browser) -> Result<T>) -> Result<T> {
        let guard = self
            .browser
            .lock()
            .map_err(|_| ScrapeError::Browser("browser handle poisoned".to_string()))?;
        match guard.as_ref() {
            Some(browser) => f(browser),
            None => Err(ScrapeError::Browser("browser connection already released".to_string())),
        }
    }

    fn release(&self) -> Option<Browser> {
        match self.browser.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl RemoteBrowser for ChromeBrowser {
    fn tabs(&self) -> Result<Vec<Arc<dyn RemotePage>>> {
        self.with_browser(|browser| {
            // Tabs opened before we attached are only known once registered
            browser.register_missing_tabs();
            let tabs = browser
                .get_tabs()
                .lock()
                .map_err(|_| ScrapeError::Browser("tab list poisoned".to_string()))?;
            Ok(tabs
                .iter()
                .map(|tab| Arc::new(ChromePage::new(tab.clone())) as Arc<dyn RemotePage>)
                .collect())
        })
    }

    async fn new_tab(&self) -> Result<Arc<dyn RemotePage>> {
        self.with_browser(|browser| {
            let tab = browser
                .new_tab()
                .map_err(|e| browser_error("Failed to create tab", e))?;
            Ok(Arc::new(ChromePage::new(tab)) as Arc<dyn RemotePage>)
        })
    }

    async fn terminate(&self) -> Result<()> {
        // Dropping a launched browser kills its process
        if let Some(browser) = self.release() {
            drop(browser);
            debug!("Browser process terminated");
        }
        Ok(())
    }

    fn disconnect(&self) {
        if let Some(browser) = self.release() {
            drop(browser);
            debug!("Browser connection dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(url: &str) -> Value {
        json!({
            "url": url,
            "method": "POST",
            "headers": {},
            "postData": "id=1",
            "initialPriority": "High",
            "referrerPolicy": "no-referrer"
        })
    }

    fn response(url: &str, status: u16) -> Value {
        json!({
            "url": url,
            "status": status,
            "statusText": "",
            "headers": {},
            "mimeType": "text/html",
            "charset": "",
            "connectionReused": false,
            "connectionId": 0,
            "encodedDataLength": 0,
            "securityState": "neutral"
        })
    }

    fn will_be_sent(id: &str, url: &str, redirect: Option<Value>) -> Event {
        let mut params = json!({
            "requestId": id,
            "loaderId": "L1",
            "documentURL": "https://go.boarddocs.com/ca/sfusd/Board.nsf/Public",
            "request": request(url),
            "timestamp": 1.0,
            "wallTime": 1.0,
            "initiator": { "type": "script" },
            "redirectHasExtraInfo": false,
            "type": "XHR"
        });
        if let Some(redirect) = redirect {
            params["redirectResponse"] = redirect;
        }
        event("Network.requestWillBeSent", params)
    }

    fn response_received(id: &str, status: u16) -> Event {
        event(
            "Network.responseReceived",
            json!({
                "requestId": id,
                "loaderId": "L1",
                "timestamp": 2.0,
                "type": "XHR",
                "response": response("https://x/agenda", status),
                "hasExtraInfo": false
            }),
        )
    }

    fn loading_finished(id: &str) -> Event {
        event(
            "Network.loadingFinished",
            json!({ "requestId": id, "timestamp": 3.0, "encodedDataLength": 10 }),
        )
    }

    fn loading_failed(id: &str) -> Event {
        event(
            "Network.loadingFailed",
            json!({
                "requestId": id,
                "timestamp": 3.0,
                "type": "XHR",
                "errorText": "net::ERR_ABORTED"
            }),
        )
    }

    fn event(method: &str, params: Value) -> Event {
        serde_json::from_value(json!({ "method": method, "params": params })).unwrap()
    }

    #[test]
    fn test_translate_request_started() {
        let statuses = Mutex::new(HashMap::new());
        let translated = translate(&will_be_sent("7.1", "https://x/agenda", None), &statuses);

        assert_eq!(
            translated,
            Some(RequestEvent::Started(TrackedRequest {
                id: RequestId::from("7.1"),
                method: "POST".to_string(),
                url: "https://x/agenda".to_string(),
                post_data: Some("id=1".to_string()),
            }))
        );
    }

    #[test]
    fn test_translate_redirect_folded_into_original() {
        let statuses = Mutex::new(HashMap::new());
        let hop = will_be_sent("7.1", "https://x/moved", Some(response("https://x/agenda", 302)));

        assert_eq!(translate(&hop, &statuses), None);
        assert_eq!(
            translate(&loading_finished("7.1"), &statuses),
            Some(RequestEvent::Finished {
                id: RequestId::from("7.1"),
                status: None,
            })
        );
    }

    #[test]
    fn test_translate_status_carried_to_finished() {
        let statuses = Mutex::new(HashMap::new());

        assert_eq!(translate(&response_received("7.2", 404), &statuses), None);
        assert_eq!(
            translate(&loading_finished("7.2"), &statuses),
            Some(RequestEvent::Finished {
                id: RequestId::from("7.2"),
                status: Some(404),
            })
        );
        assert!(statuses.lock().unwrap().is_empty());
    }

    #[test]
    fn test_translate_failure_clears_status() {
        let statuses = Mutex::new(HashMap::new());
        translate(&response_received("7.3", 200), &statuses);

        assert_eq!(
            translate(&loading_failed("7.3"), &statuses),
            Some(RequestEvent::Failed {
                id: RequestId::from("7.3"),
                error: "net::ERR_ABORTED".to_string(),
            })
        );
        assert!(statuses.lock().unwrap().is_empty());
    }

    #[test]
    fn test_translate_ignores_other_events() {
        let statuses = Mutex::new(HashMap::new());
        let other = event(
            "Runtime.bindingCalled",
            json!({ "name": "f", "payload": "1", "executionContextId": 1 }),
        );
        assert_eq!(translate(&other, &statuses), None);
    }

    #[test]
    fn test_yield_token_bare_and_wrapped() {
        assert_eq!(yield_token("12"), Some(12));
        assert_eq!(
            yield_token(r#"{"name":"__boarddocsYield0","seq":3,"args":["12"]}"#),
            Some(12)
        );
        assert_eq!(yield_token("not a token"), None);
        assert_eq!(yield_token(r#"{"args":[]}"#), None);
    }

    #[test]
    fn test_yield_script_calls_binding() {
        let script = yield_script("__boarddocsYield4", 9);
        assert_eq!(
            script,
            r#"(async () => { await Promise.resolve(); window["__boarddocsYield4"]("9"); })()"#
        );
    }
}
