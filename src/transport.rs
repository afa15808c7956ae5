//! Pooled HTTP transport (C3): retry on transient status codes, per-host TLS
//! verification policy, cache-busting, and scheme promotion.

use std::time::Duration;

use encoding_rs::Encoding;
use once_cell::sync::{Lazy, OnceCell};
use rand::Rng;
use regex::bytes::Regex as BytesRegex;
use reqwest::Client;

use crate::config::CrawlerConfig;
use crate::error::FetchError;

const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];
const MAX_RETRIES: u32 = 2;

/// Pooled clients, one per TLS-verification posture. Hosts in the insecure
/// set share `insecure`; everything else shares `verified`. Pool size per
/// client is `2 * max_workers` (SPEC_FULL.md §4.1), set via
/// `pool_max_idle_per_host`.
pub struct Transport {
    verified: Client,
    insecure: Client,
}

static TRANSPORT: OnceCell<Transport> = OnceCell::new();

impl Transport {
    fn build(max_workers: usize, danger_accept_invalid_certs: bool) -> Client {
        Client::builder()
            .user_agent(crate::USER_AGENT)
            .pool_max_idle_per_host(max_workers.max(1) * 2)
            .danger_accept_invalid_certs(danger_accept_invalid_certs)
            .build()
            .expect("reqwest client config is valid")
    }

    fn new(config: &CrawlerConfig) -> Self {
        Self {
            verified: Self::build(config.max_workers, false),
            insecure: Self::build(config.max_workers, true),
        }
    }

    /// Fetch the global pooled transport, initializing it on first use.
    pub fn global(config: &CrawlerConfig) -> &'static Transport {
        TRANSPORT.get_or_init(|| Transport::new(config))
    }

    fn client_for(&self, verify: bool) -> &Client {
        if verify { &self.verified } else { &self.insecure }
    }

    /// GET `url` with up to [`MAX_RETRIES`] retries on [`RETRY_STATUSES`].
    /// `timeout` applies per attempt, not to the whole retry loop. Returns
    /// the decoded body together with the response's final URL (after
    /// following any ordinary HTTP redirects), which callers use as the
    /// base for resolving a JS/meta-refresh redirect target.
    pub async fn get(&self, url: &str, timeout: Duration, verify: bool) -> Result<(String, String), FetchError> {
        self.get_with_referer(url, timeout, verify, None).await
    }

    /// Same as [`Transport::get`] but with an explicit `Referer` header,
    /// used for the one-shot re-fetch after a JS/meta-refresh redirect is
    /// detected (SPEC_FULL.md §4.3).
    pub async fn get_with_referer(
        &self,
        url: &str,
        timeout: Duration,
        verify: bool,
        referer: Option<&str>,
    ) -> Result<(String, String), FetchError> {
        let client = self.client_for(verify);
        let mut attempt = 0;
        loop {
            let mut req = client.get(url).timeout(timeout).header("Accept-Language", "ko,en;q=0.8");
            if let Some(r) = referer {
                req = req.header("Referer", r);
            }
            let result = req.send().await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if RETRY_STATUSES.contains(&status.as_u16()) && attempt < MAX_RETRIES {
                        attempt += 1;
                        tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
                    }
                    let final_url = resp.url().to_string();
                    let bytes = resp
                        .bytes()
                        .await
                        .map_err(|e| FetchError::Transport { url: url.to_string(), source: e })?;
                    return Ok((decode_body(&bytes), final_url));
                }
                Err(e) if e.is_timeout() && attempt >= MAX_RETRIES => {
                    return Err(FetchError::Timeout { url: url.to_string(), timeout_secs: timeout.as_secs() });
                }
                Err(e) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(e) => return Err(FetchError::Transport { url: url.to_string(), source: e }),
            }
        }
    }

    /// GET raw bytes (used by the image downloader, which needs to sniff
    /// content-type and write to disk rather than decode text).
    pub async fn get_bytes(
        &self,
        url: &str,
        timeout: Duration,
        verify: bool,
        referer: Option<&str>,
    ) -> Result<(Vec<u8>, Option<String>), FetchError> {
        let client = self.client_for(verify);
        let mut req = client.get(url).timeout(timeout);
        if let Some(r) = referer {
            req = req.header("Referer", r);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| FetchError::Transport { url: url.to_string(), source: e })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport { url: url.to_string(), source: e })?;
        Ok((bytes.to_vec(), content_type))
    }
}

static META_CHARSET_RX: Lazy<BytesRegex> =
    Lazy::new(|| BytesRegex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([a-zA-Z0-9_-]+)"#).expect("valid regex"));

/// Decode an HTTP body whose `Content-Type` header is bypassed entirely:
/// bodies here are HTML/JSON from Korean timing providers that routinely
/// omit or mis-declare their charset, so the body itself is sniffed instead
/// (mirrors `r.encoding = r.apparent_encoding or r.encoding`). A BOM wins if
/// present; otherwise a `<meta charset=...>` declaration in the first 2KiB
/// is tried; otherwise a lossy UTF-8 decode is the fallback.
fn decode_body(bytes: &[u8]) -> String {
    if let Some((enc, bom_len)) = Encoding::for_bom(bytes) {
        return enc.decode(&bytes[bom_len..]).0.into_owned();
    }
    let scan_window = &bytes[..bytes.len().min(2048)];
    if let Some(label) = META_CHARSET_RX.captures(scan_window).and_then(|c| c.get(1))
        && let Some(enc) = Encoding::for_label(label.as_bytes())
    {
        return enc.decode(bytes).0.into_owned();
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Promote a scheme-less URL to `https://`; leave absolute URLs unchanged.
#[must_use]
pub fn promote_scheme(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else if let Some(stripped) = url.strip_prefix("//") {
        format!("https://{stripped}")
    } else {
        format!("https://{url}")
    }
}

/// Append cache-busting query parameters (`_ts`, `rand`) to `url`. For the
/// Provider-S livephoto endpoint, also synthesize `Submit.x`/`Submit.y`
/// coordinates (SPEC_FULL.md §4.1).
#[must_use]
pub fn bust_cache(url: &str, now_unix: i64) -> String {
    let mut rng = rand::rng();
    let rand_digits: u32 = rng.random_range(0..1_000_000);
    let sep = if url.contains('?') { '&' } else { '?' };
    let mut busted = format!("{url}{sep}_ts={now_unix}&rand={rand_digits:06}");
    if url.ends_with("/return_data_livephoto.asp") || url.contains("/return_data_livephoto.asp?") {
        let submit_x: u32 = rng.random_range(1..=99);
        let submit_y: u32 = rng.random_range(1..=99);
        busted.push_str(&format!("&Submit.x={submit_x}&Submit.y={submit_y}"));
    }
    busted
}
