//! Fetcher (C5): combines the HTTP transport and the browser worker behind a
//! short-lived response cache, routing each request to whichever transport
//! the host needs, and following one JS/meta-refresh interstitial redirect
//! per plain-HTTP fetch (SPEC_FULL.md §4.3).

use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::browser_worker::{BrowserRequest, BrowserWorkerHandle};
use crate::config::CrawlerConfig;
use crate::error::FetchError;
use crate::transport::{self, Transport};

/// Hosts tried on the browser worker before falling through to plain HTTP.
const BROWSER_FIRST_HOSTS: [&str; 3] = ["myresult.co.kr", "spct.co.kr", "smartchip.co.kr"];

/// Selector the browser worker polls for to decide a split table rendered.
/// Generic enough to match any of the three providers' result tables.
const TABLE_ROW_SELECTOR: &str = "table tr, .table-row.ant-row";

/// Timeout for the one-shot redirect re-fetch, independent of the primary
/// fetch's own timeout (mirrors `fetch_html_follow_js_redirect`'s default).
const REDIRECT_REFETCH_TIMEOUT: Duration = Duration::from_secs(15);

static JS_HREF_REDIRECT_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)location\.href\s*=\s*"([^"]+)""#).expect("valid regex"));
static META_REFRESH_URL_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)url\s*=\s*([^;]+)").expect("valid regex"));

/// Find a JS `location.href = "..."` assignment or a
/// `<meta http-equiv="refresh" content="N;url=...">` redirect target in an
/// already-fetched page (SPEC_FULL.md §4.3, ported from
/// `fetch_html_follow_js_redirect`). Returns the raw (unresolved) target.
fn find_redirect_target(body: &str) -> Option<String> {
    if let Some(target) = JS_HREF_REDIRECT_RX.captures(body).and_then(|c| c.get(1)) {
        return Some(target.as_str().to_string());
    }
    let Ok(sel) = Selector::parse(r#"meta[http-equiv]"#) else {
        return None;
    };
    let document = Html::parse_document(body);
    for el in document.select(&sel) {
        let is_refresh = el.value().attr("http-equiv").is_some_and(|v| v.eq_ignore_ascii_case("refresh"));
        if !is_refresh {
            continue;
        }
        if let Some(content) = el.value().attr("content")
            && let Some(target) = META_REFRESH_URL_RX.captures(content).and_then(|c| c.get(1))
        {
            return Some(target.as_str().trim().trim_matches(['\'', '"']).to_string());
        }
    }
    None
}

#[derive(Hash, Eq, PartialEq, Clone)]
struct CacheKey {
    url: String,
    timeout_ms: u64,
    verify: bool,
}

struct CacheEntry {
    body: String,
    inserted_at: Instant,
}

pub struct Fetcher {
    cache: DashMap<CacheKey, CacheEntry>,
    cache_ttl: Duration,
    config: CrawlerConfig,
}

impl Fetcher {
    #[must_use]
    pub fn new(config: CrawlerConfig) -> Self {
        let cache_ttl = Duration::from_secs(config.cache_ttl_secs);
        Self { cache: DashMap::new(), cache_ttl, config }
    }

    /// Fetch `url`, consulting the TTL cache first. `verify` overrides the
    /// config's per-host TLS policy when set explicitly.
    pub async fn fetch(&self, url: &str, timeout: Duration, verify: Option<bool>) -> Result<String, FetchError> {
        let url = transport::promote_scheme(url);
        let host = Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_default();
        let verify = verify.unwrap_or_else(|| self.config.verify_for_host(&host));

        let key = CacheKey { url: url.clone(), timeout_ms: timeout.as_millis() as u64, verify };
        if let Some(entry) = self.cache.get(&key)
            && entry.inserted_at.elapsed() < self.cache_ttl
        {
            return Ok(entry.body.clone());
        }

        let body = self.fetch_uncached(&url, &host, timeout, verify).await?;
        self.cache.insert(key, CacheEntry { body: body.clone(), inserted_at: Instant::now() });
        Ok(body)
    }

    async fn fetch_uncached(&self, url: &str, host: &str, timeout: Duration, verify: bool) -> Result<String, FetchError> {
        if BROWSER_FIRST_HOSTS.iter().any(|h| host.contains(h)) {
            match self.fetch_via_browser(url, timeout).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    tracing::debug!(error = %e, url, "browser worker failed, falling back to HTTP transport");
                }
            }
        }
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let busted = transport::bust_cache(url, now);
        let (body, final_url) = Transport::global(&self.config).get(&busted, timeout, verify).await?;
        Ok(self.follow_redirect_if_present(&body, &final_url, verify).await)
    }

    /// If `body` carries a JS `location.href` assignment or a meta-refresh
    /// tag, resolve the target against `base_url` and re-fetch it once with
    /// a `Referer` header set to `base_url` (SPEC_FULL.md §4.3). Falls back
    /// to the original `body` whenever no redirect is found, the target
    /// doesn't resolve, or the re-fetch itself fails.
    async fn follow_redirect_if_present(&self, body: &str, base_url: &str, verify: bool) -> String {
        let Some(target) = find_redirect_target(body) else {
            return body.to_string();
        };
        let resolved = Url::parse(base_url)
            .ok()
            .and_then(|base| base.join(&target).ok())
            .map(|u| u.to_string())
            .unwrap_or(target);

        match Transport::global(&self.config)
            .get_with_referer(&resolved, REDIRECT_REFETCH_TIMEOUT, verify, Some(base_url))
            .await
        {
            Ok((redirected_body, _)) => redirected_body,
            Err(e) => {
                tracing::debug!(error = %e, url = resolved, "redirect re-fetch failed, keeping original body");
                body.to_string()
            }
        }
    }

    async fn fetch_via_browser(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let worker = BrowserWorkerHandle::global(self.config.chrome_path.clone()).await;
        worker
            .request(BrowserRequest {
                url: url.to_string(),
                timeout,
                row_selector: TABLE_ROW_SELECTOR.to_string(),
                prefer_raw_html: false,
            })
            .await
    }

    /// Re-fetch `url` for its rendered DOM rather than the split table or
    /// intercepted JSON (SPEC_FULL.md §4.4 Provider-M secondary fetch).
    /// Always goes through the browser worker and never touches the
    /// response cache, since it serves a different purpose than the
    /// primary fetch of the same URL.
    pub async fn fetch_secondary_html(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let worker = BrowserWorkerHandle::global(self.config.chrome_path.clone()).await;
        worker
            .request(BrowserRequest {
                url: url.to_string(),
                timeout,
                row_selector: TABLE_ROW_SELECTOR.to_string(),
                prefer_raw_html: true,
            })
            .await
    }

    /// Evict all cached entries. Used by tests and by shutdown.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_first_hosts_match_spec_substrings() {
        for host in ["time.myresult.co.kr", "2026.spct.co.kr", "live.smartchip.co.kr"] {
            assert!(BROWSER_FIRST_HOSTS.iter().any(|h| host.contains(h)));
        }
        assert!(!BROWSER_FIRST_HOSTS.iter().any(|h| "example.com".contains(h)));
    }

    #[test]
    fn find_redirect_target_matches_js_location_href() {
        let body = r#"<html><script>location.href = "/final.asp?bib=123";</script></html>"#;
        assert_eq!(find_redirect_target(body).as_deref(), Some("/final.asp?bib=123"));
    }

    #[test]
    fn find_redirect_target_matches_meta_refresh() {
        let body = r#"<html><head><meta http-equiv="refresh" content="0;url=/final.asp?bib=123"></head></html>"#;
        assert_eq!(find_redirect_target(body).as_deref(), Some("/final.asp?bib=123"));
    }

    #[test]
    fn find_redirect_target_none_when_page_has_neither() {
        let body = "<html><body>no redirect here</body></html>";
        assert!(find_redirect_target(body).is_none());
    }

    #[tokio::test]
    async fn fetch_follows_meta_refresh_and_sends_referer() {
        let mut server = mockito::Server::new_async().await;
        let host = server.host_with_port();

        let _interstitial = server
            .mock("GET", "/Expectedrecord_data.asp")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"<html><head><meta http-equiv="refresh" content="0;url=/final.asp"></head></html>"#)
            .create_async()
            .await;
        let _final_page = server
            .mock("GET", "/final.asp")
            .match_header("referer", mockito::Matcher::Regex("Expectedrecord_data".into()))
            .with_status(200)
            .with_body(
                r#"<table class="result-table">
                    <tr><th>POINT</th><th>TIME</th><th>PASS TIME</th><th>PACE</th></tr>
                    <tr><td>5.0km</td><td>00:25:30</td><td>09:25:30</td><td>05:06</td></tr>
                </table>"#,
            )
            .create_async()
            .await;

        let fetcher = Fetcher::new(CrawlerConfig::default());
        let url = format!("http://{host}/Expectedrecord_data.asp?usedata=U&bibno=1");
        let body = fetcher.fetch(&url, Duration::from_secs(5), None).await.expect("fetch succeeds");
        assert!(body.contains("result-table"));
    }
}
