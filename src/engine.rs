//! Crawler engine (C9): the main tick loop, per-marathon fan-out, batch
//! persistence, and the background image-download queue (SPEC_FULL.md
//! §4.7, §5). Grounded on the donor's `crawl_engine` worker-pool shape —
//! a bounded `buffer_unordered` fan-out joined back on the main loop —
//! generalized from "crawl one URL tree" to "poll N participants". Logs
//! with `log`, matching the donor's `crawl_engine::core` usage.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex};

use crate::config::CrawlerConfig;
use crate::fetcher::Fetcher;
use crate::finish;
use crate::models::{self, Marathon, Participant};
use crate::parsers::{self, AssetKind as ParsedAssetKind, ParsedResult};
use crate::persistence::{self, AssetUpsert, MetaUpdate, SplitUpsert};
use crate::scheduler::Scheduler;
use crate::transport::Transport;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const PROVIDER_M_HOST_HINT: &str = "myresult.co.kr";
const PROVIDER_S_HOST_HINT: &str = "smartchip.co.kr";

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// One participant's result for a tick, ready to be folded into the three
/// batch buffers.
struct FetchOutcome {
    participant_id: i64,
    host: String,
    usedata: String,
    bib: String,
    parsed: ParsedResult,
}

/// A certificate/livephoto download request, handed to the background
/// image workers after a tick's batches are committed.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub host: String,
    pub usedata: String,
    pub bib: String,
    pub image_url: String,
    pub referer: Option<String>,
    pub participant_id: i64,
}

/// Runs the crawler until `shutdown` resolves. Owns the scheduler, fetcher,
/// and image-download queue for the process lifetime.
pub struct Engine {
    pool: SqlitePool,
    config: CrawlerConfig,
    scheduler: Scheduler,
    fetcher: Fetcher,
    image_tx: mpsc::UnboundedSender<DownloadJob>,
    image_workers: Vec<tokio::task::JoinHandle<()>>,
}

impl Engine {
    #[must_use]
    pub fn new(pool: SqlitePool, config: CrawlerConfig) -> Self {
        let scheduler = Scheduler::new(
            config.adaptive,
            Duration::from_secs_f64(config.min_participant_gap_secs),
            Duration::from_secs_f64(config.participant_gap_jitter_secs),
        );
        let fetcher = Fetcher::new(config.clone());
        let (image_tx, image_rx) = mpsc::unbounded_channel();
        let image_rx = Arc::new(Mutex::new(image_rx));
        let mut image_workers = Vec::with_capacity(config.image_workers);
        for id in 0..config.image_workers {
            let pool = pool.clone();
            let config = config.clone();
            let rx = image_rx.clone();
            image_workers.push(tokio::spawn(run_image_worker(id, rx, pool, config)));
        }
        Self { pool, config, scheduler, fetcher, image_tx, image_workers }
    }

    /// Run the ~100ms tick loop until `shutdown` fires, then drain the
    /// image queue with a 5s join bound per worker (SPEC_FULL.md §5).
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.tick_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        log::warn!("tick failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        drop(self.image_tx);
        for worker in self.image_workers {
            let _ = tokio::time::timeout(Duration::from_secs(5), worker).await;
        }
        Ok(())
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let marathons = load_enabled_marathons(&self.pool).await?;
        let today = chrono::Local::now().date_naive();
        for marathon in marathons {
            if marathon.gated_by_event_date(today) {
                continue;
            }
            if !self.scheduler.can_fetch_marathon(marathon.id, marathon.refresh_sec) {
                continue;
            }
            match self.run_marathon_tick(&marathon).await {
                Ok(()) => {
                    self.scheduler.mark_run(marathon.id);
                    self.scheduler.record_success(marathon.id);
                }
                Err(e) => {
                    log::warn!("marathon {} tick failed: {e}", marathon.id);
                    self.scheduler.mark_run(marathon.id);
                    self.scheduler.record_failure(marathon.id);
                }
            }
        }
        Ok(())
    }

    async fn run_marathon_tick(&self, marathon: &Marathon) -> anyhow::Result<()> {
        let participants = load_active_participants(&self.pool, marathon.id).await?;
        if participants.is_empty() {
            return Ok(());
        }

        let host = marathon.host().unwrap_or_default();
        let (serial, parallel): (Vec<_>, Vec<_>) = participants.into_iter().partition(|_| host.contains(PROVIDER_M_HOST_HINT));

        let mut outcomes = Vec::new();
        for participant in &serial {
            if let Some(outcome) = self.process_participant(marathon, participant).await {
                outcomes.push(outcome);
            }
        }

        let parallel_outcomes: Vec<FetchOutcome> = stream::iter(parallel.iter())
            .map(|participant| self.process_participant(marathon, participant))
            .buffer_unordered(self.config.max_workers.max(1))
            .filter_map(|o| async move { o })
            .collect()
            .await;
        outcomes.extend(parallel_outcomes);

        if outcomes.is_empty() {
            return Ok(());
        }

        let (meta_batch, split_batch, asset_batch, download_jobs) = reduce_batches(outcomes);
        persistence::write_batch(&self.pool, &meta_batch, &split_batch, &asset_batch).await?;

        for job in download_jobs {
            let _ = self.image_tx.send(job);
        }
        Ok(())
    }

    async fn process_participant(&self, marathon: &Marathon, participant: &Participant) -> Option<FetchOutcome> {
        if !self.scheduler.can_fetch_participant(participant.id) {
            return None;
        }
        self.scheduler.mark_fetch(participant.id);

        let host = marathon.host().unwrap_or_default();
        let bib = models::normalize_bib(&host, &participant.nameorbibno);

        let body = if host.contains(PROVIDER_S_HOST_HINT) {
            fetch_smartchip_detail(&self.fetcher, &host, &marathon.usedata, &bib, participant.id).await?
        } else {
            let url = models::expand_url_template(&marathon.url_template, &marathon.usedata, &bib);
            match self.fetcher.fetch(&url, HTTP_TIMEOUT, None).await {
                Ok(body) => body,
                Err(e) => {
                    log::debug!("fetch failed for participant {} ({url}): {e}", participant.id);
                    return None;
                }
            }
        };

        let mut parsed = parsers::parse_for_host(&host, &body);
        if host.contains(PROVIDER_M_HOST_HINT)
            && parsers::myresult::needs_secondary_finish_fetch(&parsed, body.starts_with("JSON::"))
        {
            let url = models::expand_url_template(&marathon.url_template, &marathon.usedata, &bib);
            match self.fetcher.fetch_secondary_html(&url, HTTP_TIMEOUT).await {
                Ok(secondary_body) => {
                    let (net_time, pass_clock) = parsers::myresult::extract_finish_stats(&secondary_body);
                    parsers::myresult::append_synthetic_finish(&mut parsed, net_time, pass_clock);
                }
                Err(e) => {
                    log::debug!("secondary finish fetch failed for participant {} ({url}): {e}", participant.id);
                }
            }
        }

        Some(FetchOutcome {
            participant_id: participant.id,
            host,
            usedata: marathon.usedata.clone(),
            bib,
            parsed,
        })
    }
}

/// Provider-S detail-page cascade (SPEC_FULL.md §4.4): try an "in-progress"
/// path then a "finished" path, each on `https://` then `http://`, in that
/// order. The first response with a parseable split table wins; otherwise
/// the first response obtained at all is returned (state
/// `in_progress_no_table`).
async fn fetch_smartchip_detail(fetcher: &Fetcher, host: &str, usedata: &str, bib: &str, participant_id: i64) -> Option<String> {
    let candidates = parsers::smartchip::resolve_detail_urls(host, usedata, bib);
    let mut first_ok = None;
    for url in &candidates {
        match fetcher.fetch(url, HTTP_TIMEOUT, None).await {
            Ok(body) => {
                if parsers::smartchip::has_split_table(&body) {
                    return Some(body);
                }
                if first_ok.is_none() {
                    first_ok = Some(body);
                }
            }
            Err(e) => {
                log::debug!("fetch failed for participant {participant_id} ({url}): {e}");
            }
        }
    }
    first_ok
}

async fn load_enabled_marathons(pool: &SqlitePool) -> Result<Vec<Marathon>, sqlx::Error> {
    let rows = sqlx::query_as::<_, MarathonRow>(
        "SELECT id, name, url_template, usedata, total_km, refresh_sec, enabled, event_date, join_code FROM marathons WHERE enabled = 1;",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(MarathonRow::into_marathon).collect())
}

async fn load_active_participants(pool: &SqlitePool, marathon_id: i64) -> Result<Vec<Participant>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ParticipantRow>(
        "SELECT id, marathon_id, nameorbibno, alias, active, race_label, race_total_km, finish_image_url, finish_image_path FROM participants WHERE marathon_id = ? AND active = 1;",
    )
    .bind(marathon_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(ParticipantRow::into_participant).collect())
}

#[derive(sqlx::FromRow)]
struct MarathonRow {
    id: i64,
    name: String,
    url_template: String,
    usedata: String,
    total_km: f64,
    refresh_sec: i64,
    enabled: bool,
    event_date: Option<String>,
    join_code: String,
}

impl MarathonRow {
    fn into_marathon(self) -> Marathon {
        Marathon {
            id: self.id,
            name: self.name,
            url_template: self.url_template,
            usedata: self.usedata,
            total_km: self.total_km,
            refresh_sec: self.refresh_sec.max(0) as u64,
            enabled: self.enabled,
            event_date: self.event_date.and_then(|s| chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            join_code: self.join_code,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    id: i64,
    marathon_id: i64,
    nameorbibno: String,
    alias: Option<String>,
    active: bool,
    race_label: Option<String>,
    race_total_km: Option<f64>,
    finish_image_url: Option<String>,
    finish_image_path: Option<String>,
}

impl ParticipantRow {
    fn into_participant(self) -> Participant {
        Participant {
            id: self.id,
            marathon_id: self.marathon_id,
            nameorbibno: self.nameorbibno,
            alias: self.alias,
            active: self.active,
            race_label: self.race_label,
            race_total_km: self.race_total_km,
            finish_image_url: self.finish_image_url,
            finish_image_path: self.finish_image_path,
        }
    }
}

/// Fold a tick's fetch outcomes into the three ordered batches plus any
/// certificate download jobs (SPEC_FULL.md §4.7 step 4-6).
fn reduce_batches(outcomes: Vec<FetchOutcome>) -> (Vec<MetaUpdate>, Vec<SplitUpsert>, Vec<AssetUpsert>, Vec<DownloadJob>) {
    let mut meta_batch = Vec::new();
    let mut split_batch = Vec::new();
    let mut asset_batch = Vec::new();
    let mut download_jobs = Vec::new();
    let seen_at = now_unix();

    for outcome in outcomes {
        meta_batch.push(MetaUpdate {
            participant_id: outcome.participant_id,
            race_label: outcome.parsed.race_label.clone(),
            race_total_km: outcome.parsed.race_total_km,
        });

        let splits: Vec<SplitUpsert> = outcome
            .parsed
            .splits
            .iter()
            .map(|s| SplitUpsert {
                participant_id: outcome.participant_id,
                point_label: s.point_label.clone(),
                point_km: s.point_km,
                net_time: s.net_time.clone(),
                pass_clock: s.pass_clock.clone(),
                pace: s.pace.clone(),
                seen_at,
            })
            .collect();

        let mut assets: Vec<AssetUpsert> = outcome
            .parsed
            .assets
            .iter()
            .map(|a| AssetUpsert {
                participant_id: outcome.participant_id,
                kind: convert_asset_kind(a.kind),
                url: a.url.clone(),
                host_hint: a.host.clone().or_else(|| Some(outcome.host.clone())),
                seen_at,
            })
            .collect();

        if assets.is_empty()
            && let Some(inferred) = infer_certificate_url(&outcome.host, &outcome.usedata, &outcome.bib)
        {
            assets.push(AssetUpsert {
                participant_id: outcome.participant_id,
                kind: models::AssetKind::Certificate,
                url: inferred,
                host_hint: Some(outcome.host.clone()),
                seen_at,
            });
        }

        let finished = matches!(
            finish::detect_finish(&as_models_splits(&splits), outcome.parsed.race_total_km),
            finish::FinishState::Finished { .. }
        );
        if finished
            && let Some(cert) = assets.iter().find(|a| a.kind == models::AssetKind::Certificate)
        {
            download_jobs.push(DownloadJob {
                host: outcome.host.clone(),
                usedata: outcome.usedata.clone(),
                bib: outcome.bib.clone(),
                image_url: cert.url.clone(),
                referer: detail_referer(&outcome.host, &outcome.usedata, &outcome.bib),
                participant_id: outcome.participant_id,
            });
        }

        split_batch.extend(splits);
        asset_batch.extend(assets);
    }

    (meta_batch, split_batch, asset_batch, download_jobs)
}

fn as_models_splits(splits: &[SplitUpsert]) -> Vec<crate::models::Split> {
    splits
        .iter()
        .map(|s| crate::models::Split {
            id: 0,
            participant_id: s.participant_id,
            point_label: s.point_label.clone(),
            point_km: s.point_km,
            net_time: s.net_time.clone(),
            pass_clock: s.pass_clock.clone(),
            pace: s.pace.clone(),
            seen_at: s.seen_at,
        })
        .collect()
}

fn convert_asset_kind(kind: ParsedAssetKind) -> models::AssetKind {
    match kind {
        ParsedAssetKind::Certificate => models::AssetKind::Certificate,
        ParsedAssetKind::LivePhoto => models::AssetKind::LivePhoto,
    }
}

/// When no assets were parsed from the page itself, infer a certificate URL
/// from fixed per-provider rules (SPEC_FULL.md §4.7 step 4).
fn infer_certificate_url(host: &str, usedata: &str, bib: &str) -> Option<String> {
    let host_lc = host.to_lowercase();
    if host_lc.contains("myresult.co.kr") {
        Some(format!("https://{host}/upload/certificate/{usedata}/{bib}.jpg"))
    } else if host_lc.contains("smartchip.co.kr") {
        Some(format!("https://{host}/return_data_livephoto.asp?usedata={usedata}&bibno={bib}"))
    } else if host_lc.contains("spct.co.kr") {
        let bib6 = models::zero_pad_bib_if_numeric(bib, 6);
        Some(format!("https://{host}/PhotoResultsJPG/images/{usedata}_{bib6}.jpg"))
    } else {
        None
    }
}

fn detail_referer(host: &str, usedata: &str, bib: &str) -> Option<String> {
    if host.to_lowercase().contains("smartchip.co.kr") {
        Some(format!("https://{host}/Expectedrecord_data.asp?usedata={usedata}&bibno={bib}"))
    } else {
        None
    }
}

/// Background worker draining the image-download queue (SPEC_FULL.md §5):
/// one independent transaction per job, TLS-retry-once-insecure, rejects
/// bodies under 512 bytes, writes via a `.part` temp file then atomic
/// rename.
async fn run_image_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<DownloadJob>>>,
    pool: SqlitePool,
    config: CrawlerConfig,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };

        if let Err(e) = handle_download_job(&pool, &config, &job).await {
            log::warn!("image worker {worker_id} failed for participant {}: {e}", job.participant_id);
        }
    }
}

async fn handle_download_job(pool: &SqlitePool, config: &CrawlerConfig, job: &DownloadJob) -> anyhow::Result<()> {
    if asset_already_downloaded(pool, job.participant_id).await? {
        return Ok(());
    }

    let transport = Transport::global(config);
    let verify = config.verify_for_host(&job.host);
    let result = transport.get_bytes(&job.image_url, HTTP_TIMEOUT, verify, job.referer.as_deref()).await;
    let (bytes, content_type) = match result {
        Ok(ok) => ok,
        Err(_) if verify => {
            transport.get_bytes(&job.image_url, HTTP_TIMEOUT, false, job.referer.as_deref()).await?
        }
        Err(e) => return Err(e.into()),
    };

    if bytes.len() < 512 {
        anyhow::bail!("rejected placeholder image body ({} bytes) for participant {}", bytes.len(), job.participant_id);
    }

    let ext = extension_for(content_type.as_deref(), &job.image_url);
    let bib6 = models::zero_pad_bib_if_numeric(&job.bib, 6);
    let dir = config.cert_dir.join(&job.usedata);
    std::fs::create_dir_all(&dir)?;
    let final_path = dir.join(format!("{}-{}.{}", job.usedata, bib6, ext));
    let part_path = dir.join(format!(".part.{}.{}", job.participant_id, worker_tag()));

    std::fs::write(&part_path, &bytes)?;
    std::fs::rename(&part_path, &final_path)?;

    persistence::set_asset_local_path(pool, job.participant_id, models::AssetKind::Certificate, &final_path.display().to_string()).await?;
    Ok(())
}

fn worker_tag() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

async fn asset_already_downloaded(pool: &SqlitePool, participant_id: i64) -> Result<bool, sqlx::Error> {
    let row: Option<(Option<String>,)> = sqlx::query_as(
        "SELECT local_path FROM assets WHERE participant_id = ? AND kind = 'certificate';",
    )
    .bind(participant_id)
    .fetch_optional(pool)
    .await?;
    Ok(match row {
        Some((Some(path),)) => std::path::Path::new(&path).exists(),
        _ => false,
    })
}

fn extension_for(content_type: Option<&str>, url: &str) -> String {
    if let Some(ct) = content_type {
        if ct.contains("png") {
            return "png".to_string();
        }
        if ct.contains("webp") {
            return "webp".to_string();
        }
        if ct.contains("jpeg") || ct.contains("jpg") {
            return "jpg".to_string();
        }
    }
    let lower = url.to_lowercase();
    for (needle, ext) in [(".png", "png"), (".webp", "webp"), (".jpeg", "jpg"), (".jpg", "jpg")] {
        if lower.contains(needle) {
            return ext.to_string();
        }
    }
    "jpg".to_string()
}

/// URL joins for marathons + participants used by the records view
/// (SPEC_FULL.md §4.9 `[ADD]`): case-insensitive substring filter on name or
/// alias, optional marathon-id filter, then [`crate::records::sort_records`].
pub async fn get_all_records(
    pool: &SqlitePool,
    query: Option<&str>,
    marathon_filter: Option<i64>,
) -> Result<Vec<crate::records::RecordRow>, sqlx::Error> {
    let marathons = load_enabled_marathons(pool).await?;

    let mut rows = Vec::new();
    for marathon in &marathons {
        if let Some(filter_id) = marathon_filter
            && marathon.id != filter_id
        {
            continue;
        }
        let participants = load_active_participants(pool, marathon.id).await?;
        for participant in participants {
            if let Some(q) = query {
                let q = q.to_lowercase();
                let matches_name = participant.nameorbibno.to_lowercase().contains(&q)
                    || participant.alias.as_deref().unwrap_or_default().to_lowercase().contains(&q);
                if !matches_name {
                    continue;
                }
            }
            let splits = load_splits(pool, participant.id).await?;
            let assets = load_assets(pool, participant.id).await?;
            rows.push(crate::records::best_record(&participant, &splits, &assets));
        }
    }
    crate::records::sort_records(&mut rows);
    Ok(rows)
}

async fn load_splits(pool: &SqlitePool, participant_id: i64) -> Result<Vec<crate::models::Split>, sqlx::Error> {
    sqlx::query_as::<_, SplitRow>(
        "SELECT id, participant_id, point_label, point_km, net_time, pass_clock, pace, seen_at FROM splits WHERE participant_id = ? ORDER BY seen_at ASC;",
    )
    .bind(participant_id)
    .fetch_all(pool)
    .await
    .map(|rows| rows.into_iter().map(SplitRow::into_split).collect())
}

async fn load_assets(pool: &SqlitePool, participant_id: i64) -> Result<Vec<crate::models::Asset>, sqlx::Error> {
    let rows: Vec<AssetRow> = sqlx::query_as(
        "SELECT id, participant_id, kind, url, local_path, host_hint, seen_at FROM assets WHERE participant_id = ?;",
    )
    .bind(participant_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().filter_map(AssetRow::into_asset).collect())
}

#[derive(sqlx::FromRow)]
struct SplitRow {
    id: i64,
    participant_id: i64,
    point_label: String,
    point_km: Option<f64>,
    net_time: Option<String>,
    pass_clock: Option<String>,
    pace: Option<String>,
    seen_at: i64,
}

impl SplitRow {
    fn into_split(self) -> crate::models::Split {
        crate::models::Split {
            id: self.id,
            participant_id: self.participant_id,
            point_label: self.point_label,
            point_km: self.point_km,
            net_time: self.net_time,
            pass_clock: self.pass_clock,
            pace: self.pace,
            seen_at: self.seen_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AssetRow {
    id: i64,
    participant_id: i64,
    kind: String,
    url: String,
    local_path: Option<String>,
    host_hint: Option<String>,
    seen_at: i64,
}

impl AssetRow {
    fn into_asset(self) -> Option<crate::models::Asset> {
        let kind = match self.kind.as_str() {
            "certificate" => models::AssetKind::Certificate,
            "livephoto" => models::AssetKind::LivePhoto,
            _ => return None,
        };
        Some(crate::models::Asset {
            id: self.id,
            participant_id: self.participant_id,
            kind,
            url: self.url,
            local_path: self.local_path,
            host_hint: self.host_hint,
            seen_at: self.seen_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlerConfig;
    use crate::parsers::{RawAsset, RawSplit};

    fn outcome(host: &str, splits: Vec<RawSplit>, assets: Vec<RawAsset>, total_km: Option<f64>) -> FetchOutcome {
        FetchOutcome {
            participant_id: 1,
            host: host.to_string(),
            usedata: "2026SEOUL".to_string(),
            bib: "123".to_string(),
            parsed: ParsedResult { splits, summary: Default::default(), assets, race_label: None, race_total_km: total_km },
        }
    }

    #[test]
    fn infer_certificate_url_covers_all_three_providers() {
        assert!(infer_certificate_url("time.myresult.co.kr", "U", "123").unwrap().contains("/upload/certificate/"));
        assert!(infer_certificate_url("live.smartchip.co.kr", "U", "123").unwrap().contains("return_data_livephoto"));
        assert!(infer_certificate_url("time.spct.co.kr", "U", "123").unwrap().contains("PhotoResultsJPG"));
        assert!(infer_certificate_url("example.com", "U", "123").is_none());
    }

    #[test]
    fn reduce_batches_infers_certificate_when_no_assets_parsed() {
        let splits = vec![RawSplit { point_label: "Finish".into(), point_km: Some(21.1), net_time: Some("01:50:00".into()), pass_clock: None, pace: None }];
        let outcomes = vec![outcome("time.spct.co.kr", splits, vec![], Some(21.1))];
        let (_, _, assets, jobs) = reduce_batches(outcomes);
        assert_eq!(assets.len(), 1);
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn smartchip_cascade_skips_tableless_in_progress_page_for_finished_one() {
        let mut server = mockito::Server::new_async().await;
        let host = server.host_with_port();

        let _in_progress = server
            .mock("GET", "/Expectedrecord_data.asp")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html><body>경기 진행중입니다</body></html>")
            .create_async()
            .await;
        let _finished = server
            .mock("GET", "/return_data_livephoto.asp")
            .match_query(mockito::Matcher::Any)
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
        let body = fetch_smartchip_detail(&fetcher, &host, "2026SEOUL", "123", 1)
            .await
            .expect("cascade returns a response");
        assert!(body.contains("result-table"));
    }

    #[tokio::test]
    async fn smartchip_cascade_falls_back_to_first_response_when_no_table_anywhere() {
        let mut server = mockito::Server::new_async().await;
        let host = server.host_with_port();

        let _in_progress = server
            .mock("GET", "/Expectedrecord_data.asp")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html><body>경기 진행중입니다</body></html>")
            .create_async()
            .await;
        let _finished = server
            .mock("GET", "/return_data_livephoto.asp")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html><body>still nothing</body></html>")
            .create_async()
            .await;

        let fetcher = Fetcher::new(CrawlerConfig::default());
        let body = fetch_smartchip_detail(&fetcher, &host, "2026SEOUL", "123", 1)
            .await
            .expect("falls back to the first response obtained");
        assert!(body.contains("진행중"));
    }
}
