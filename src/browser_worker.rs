//! Single headless-browser worker (C4): a long-lived actor that services
//! JS-heavy providers serially via an inbox channel (SPEC_FULL.md §4.2, §9
//! "browser worker as a singleton").
//!
//! Callers never touch the `Browser`/`Page` directly; they send a
//! [`BrowserRequest`] over the inbox and await the reply on a oneshot
//! channel, the same request/response shape the donor's `runtime::channel`
//! module formalizes for other actors in this crate.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, ErrorReason, EventRequestPaused, FailRequestParams, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, GetResponseBodyParams, ResourceType};
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::browser_setup::launch_browser;
use crate::error::FetchError;

const ABORTED_RESOURCE_TYPES: [&str; 4] = ["image", "media", "font", "stylesheet"];
const ANALYTICS_HOST_HINTS: [&str; 4] = ["google-analytics.com", "googletagmanager.com", "doubleclick.net", "facebook.net"];

const TABLE_POLL_ATTEMPTS: u32 = 8;
const TABLE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const JSON_WAIT_SECS: u64 = 7;

pub struct BrowserRequest {
    pub url: String,
    pub timeout: Duration,
    /// CSS selector that marks the target table row having rendered.
    pub row_selector: String,
    /// Skip the table-poll/JSON-intercept branches and return the
    /// rendered DOM directly. Used for the Provider-M secondary fetch
    /// (SPEC_FULL.md §4.4), which wants the surrounding page text rather
    /// than the split table.
    pub prefer_raw_html: bool,
}

struct Job {
    req: BrowserRequest,
    reply: oneshot::Sender<Result<String, FetchError>>,
}

/// Actor handle. Cloning is cheap: the inbox sender is swapped in place
/// behind a lock on restart, so every clone keeps reaching the live task.
#[derive(Clone)]
pub struct BrowserWorkerHandle {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    inbox: Mutex<mpsc::Sender<Job>>,
    task: Mutex<JoinHandle<()>>,
    chrome_path: Option<std::path::PathBuf>,
}

static WORKER: once_cell::sync::OnceCell<BrowserWorkerHandle> = once_cell::sync::OnceCell::new();

impl BrowserWorkerHandle {
    /// Lazily-initialized global accessor. Health-checks the worker's
    /// underlying task and restarts it if it has died.
    pub async fn global(chrome_path: Option<std::path::PathBuf>) -> BrowserWorkerHandle {
        let handle = WORKER
            .get_or_init(|| BrowserWorkerHandle::spawn(chrome_path.clone()))
            .clone();
        handle.ensure_alive().await;
        handle
    }

    fn spawn(chrome_path: Option<std::path::PathBuf>) -> BrowserWorkerHandle {
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(run_worker_loop(chrome_path.clone(), rx));
        BrowserWorkerHandle {
            inner: Arc::new(WorkerInner {
                inbox: Mutex::new(tx),
                task: Mutex::new(task),
                chrome_path,
            }),
        }
    }

    async fn ensure_alive(&self) {
        let mut task_guard = self.inner.task.lock().await;
        if !task_guard.is_finished() {
            return;
        }
        warn!("browser worker task is dead, restarting");
        let (tx, rx) = mpsc::channel(64);
        *task_guard = tokio::spawn(run_worker_loop(self.inner.chrome_path.clone(), rx));
        *self.inner.inbox.lock().await = tx;
    }

    /// Submit a request to the worker and await its reply.
    pub async fn request(&self, req: BrowserRequest) -> Result<String, FetchError> {
        let url = req.url.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        let sender = self.inner.inbox.lock().await.clone();
        sender
            .send(Job { req, reply: reply_tx })
            .await
            .map_err(|_| FetchError::Browser { url: url.clone(), message: "browser worker inbox closed".into() })?;
        reply_rx
            .await
            .map_err(|_| FetchError::Browser { url, message: "browser worker dropped the reply channel".into() })?
    }
}

async fn run_worker_loop(chrome_path: Option<std::path::PathBuf>, mut rx: mpsc::Receiver<Job>) {
    let (browser, _handler_task, _profile_dir) = match launch_browser(true, chrome_path).await {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "failed to launch browser worker");
            // Drain and fail every request rather than hang forever.
            while let Some(job) = rx.recv().await {
                let _ = job.reply.send(Err(FetchError::Browser {
                    url: job.req.url,
                    message: format!("browser launch failed: {e}"),
                }));
            }
            return;
        }
    };

    while let Some(job) = rx.recv().await {
        let result = service_request(&browser, &job.req).await;
        let _ = job.reply.send(result);
    }
}

async fn service_request(browser: &chromiumoxide::Browser, req: &BrowserRequest) -> Result<String, FetchError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| FetchError::Browser { url: req.url.clone(), message: e.to_string() })?;

    if let Err(e) = configure_resource_blocking(&page).await {
        debug!(error = %e, "resource blocking setup failed, continuing without it");
    }

    let nav_timeout = req.timeout.max(Duration::from_secs(12));

    let goto = tokio::time::timeout(nav_timeout, page.goto(&req.url)).await;
    match goto {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(FetchError::Browser { url: req.url.clone(), message: e.to_string() }),
        Err(_) => return Err(FetchError::Timeout { url: req.url.clone(), timeout_secs: nav_timeout.as_secs() }),
    }

    // Best-effort DOM-content-loaded wait; a slow or never-quiescing page
    // shouldn't abort the whole request, since the table-poll below still
    // has a chance to find rendered content.
    let _ = tokio::time::timeout(nav_timeout, page.wait_for_navigation()).await;

    // Best-effort network-idle wait, bounded to ~70% of the timeout.
    let idle_budget = Duration::from_millis((nav_timeout.as_millis() as u64 * 7) / 10);
    let _ = tokio::time::timeout(idle_budget, wait_network_idle(&page)).await;

    if req.prefer_raw_html {
        return page
            .content()
            .await
            .map_err(|e| FetchError::Browser { url: req.url.clone(), message: e.to_string() });
    }

    for _ in 0..TABLE_POLL_ATTEMPTS {
        if page.find_element(&req.row_selector).await.is_ok() {
            return page
                .content()
                .await
                .map_err(|e| FetchError::Browser { url: req.url.clone(), message: e.to_string() });
        }
        tokio::time::sleep(TABLE_POLL_INTERVAL).await;
    }

    if let Some(json) = wait_for_json_response(&page, Duration::from_secs(JSON_WAIT_SECS)).await {
        return Ok(format!("JSON::{json}"));
    }

    page.content()
        .await
        .map_err(|e| FetchError::Browser { url: req.url.clone(), message: e.to_string() })
}

/// Best-effort CDP network-idle approximation: poll until no new response
/// events arrive for a short quiet window.
async fn wait_network_idle(page: &Page) -> Result<(), FetchError> {
    let Ok(mut events) = page.event_listener::<EventResponseReceived>().await else {
        return Ok(());
    };
    let quiet = Duration::from_millis(500);
    loop {
        match tokio::time::timeout(quiet, events.next()).await {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return Ok(()),
        }
    }
}

/// Await any XHR/fetch response whose content-type contains `json`, whose
/// URL ends `.json`, or whose path contains `/api/`, then pull its body via
/// a `Network.getResponseBody` round trip keyed by the event's request id.
async fn wait_for_json_response(page: &Page, budget: Duration) -> Option<String> {
    let mut events = page.event_listener::<EventResponseReceived>().await.ok()?;
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let event = tokio::time::timeout(remaining, events.next()).await.ok()??;
        let resp = &event.response;
        let is_json_ct = resp.mime_type.to_lowercase().contains("json");
        let url = resp.url.clone();
        if !(is_json_ct || url.ends_with(".json") || url.contains("/api/")) {
            continue;
        }
        let Ok(body_resp) = page.execute(GetResponseBodyParams::new(event.request_id.clone())).await else {
            continue;
        };
        let body = &body_resp.result.body;
        let decoded = if body_resp.result.base64_encoded {
            base64::engine::general_purpose::STANDARD
                .decode(body)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        } else {
            Some(body.clone())
        };
        if let Some(text) = decoded {
            return Some(text);
        }
    }
}

/// Enable the CDP `Fetch` domain for the resource types in
/// [`ABORTED_RESOURCE_TYPES`] and spawn a task that fails matching requests
/// (and any request to a host in [`ANALYTICS_HOST_HINTS`]) while letting
/// everything else continue unmodified (SPEC_FULL.md §4.2). Best-effort:
/// this only speeds up rendering, so the caller swallows setup failures.
async fn configure_resource_blocking(page: &Page) -> Result<(), FetchError> {
    let patterns: Vec<RequestPattern> = ABORTED_RESOURCE_TYPES
        .iter()
        .filter_map(|rt| resource_type_for(rt))
        .map(|resource_type| RequestPattern::builder().resource_type(resource_type).build())
        .collect();

    page.execute(EnableParams::builder().patterns(patterns).build())
        .await
        .map_err(|e| FetchError::Browser { url: String::new(), message: e.to_string() })?;

    let mut events = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|e| FetchError::Browser { url: String::new(), message: e.to_string() })?;
    let page = page.clone();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let request_id = event.request_id.clone();
            let blocked = event
                .resource_type
                .as_ref()
                .is_some_and(|rt| matches!(rt, ResourceType::Image | ResourceType::Media | ResourceType::Font | ResourceType::Stylesheet))
                || ANALYTICS_HOST_HINTS.iter().any(|host| event.request.url.contains(host));

            let outcome = if blocked {
                page.execute(FailRequestParams::new(request_id, ErrorReason::BlockedByClient)).await.map(drop)
            } else {
                page.execute(ContinueRequestParams::new(request_id)).await.map(drop)
            };
            if let Err(e) = outcome {
                debug!(error = %e, "fetch continue/fail request error");
            }
        }
    });
    Ok(())
}

fn resource_type_for(name: &str) -> Option<ResourceType> {
    match name {
        "image" => Some(ResourceType::Image),
        "media" => Some(ResourceType::Media),
        "font" => Some(ResourceType::Font),
        "stylesheet" => Some(ResourceType::Stylesheet),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_resource_types_match_spec_set() {
        assert_eq!(ABORTED_RESOURCE_TYPES, ["image", "media", "font", "stylesheet"]);
    }

    #[test]
    fn resource_type_for_covers_every_aborted_type_and_rejects_others() {
        for name in ABORTED_RESOURCE_TYPES {
            assert!(resource_type_for(name).is_some());
        }
        assert!(resource_type_for("document").is_none());
    }
}
