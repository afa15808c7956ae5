//! Admission scheduler (C8): per-marathon and per-participant fetch gating,
//! with an adaptive exponential-backoff variant. Grounded on the donor
//! crate's `DashMap`-per-key health tracker shape (`crawl_engine::circuit_breaker`,
//! `crawl_engine::rate_limiter`) but keyed on wall-clock admission rather
//! than a token bucket, per SPEC_FULL.md §4.6.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;

const MIN_MARATHON_INTERVAL_SECS: u64 = 5;
const MAX_BACKOFF_SECS: u64 = 300;

struct MarathonState {
    last_run: Option<Instant>,
    failure_count: u32,
}

struct ParticipantState {
    last_fetch: Instant,
}

/// Holds only in-process state (SPEC_FULL.md §4.6); never persisted.
pub struct Scheduler {
    marathons: DashMap<i64, MarathonState>,
    participants: DashMap<i64, ParticipantState>,
    adaptive: bool,
    min_participant_gap: Duration,
    jitter_max: Duration,
}

impl Scheduler {
    #[must_use]
    pub fn new(adaptive: bool, min_participant_gap: Duration, jitter_max: Duration) -> Self {
        Self {
            marathons: DashMap::new(),
            participants: DashMap::new(),
            adaptive,
            min_participant_gap,
            jitter_max,
        }
    }

    /// Effective minimum interval between runs for `refresh_sec`, taking the
    /// adaptive backoff into account when failures have accumulated.
    fn effective_interval(&self, marathon_id: i64, refresh_sec: u64) -> Duration {
        let base = refresh_sec.max(MIN_MARATHON_INTERVAL_SECS);
        if !self.adaptive {
            return Duration::from_secs(base);
        }
        let failures = self
            .marathons
            .get(&marathon_id)
            .map_or(0, |s| s.failure_count);
        if failures == 0 {
            return Duration::from_secs(base);
        }
        let scaled = base.saturating_mul(1u64 << failures.min(20));
        Duration::from_secs(scaled.min(MAX_BACKOFF_SECS))
    }

    /// Admit iff `now - last_run >= effective_interval`. Does not itself
    /// update `last_run` — callers call [`Scheduler::mark_run`] once the
    /// tick actually executes.
    #[must_use]
    pub fn can_fetch_marathon(&self, marathon_id: i64, refresh_sec: u64) -> bool {
        let interval = self.effective_interval(marathon_id, refresh_sec);
        match self.marathons.get(&marathon_id) {
            Some(state) => match state.last_run {
                Some(last) => last.elapsed() >= interval,
                None => true,
            },
            None => true,
        }
    }

    /// Record that a marathon tick ran, regardless of success/failure
    /// (SPEC_FULL.md §4.6: "success and failure both update `last_run`").
    pub fn mark_run(&self, marathon_id: i64) {
        self.marathons
            .entry(marathon_id)
            .and_modify(|s| s.last_run = Some(Instant::now()))
            .or_insert(MarathonState { last_run: Some(Instant::now()), failure_count: 0 });
    }

    /// Reset a marathon's failure count after a successful tick.
    pub fn record_success(&self, marathon_id: i64) {
        self.marathons
            .entry(marathon_id)
            .and_modify(|s| s.failure_count = 0)
            .or_insert(MarathonState { last_run: None, failure_count: 0 });
    }

    /// Increment a marathon's failure count after a failed tick.
    pub fn record_failure(&self, marathon_id: i64) {
        self.marathons
            .entry(marathon_id)
            .and_modify(|s| s.failure_count += 1)
            .or_insert(MarathonState { last_run: None, failure_count: 1 });
        if self.adaptive {
            log::debug!("marathon {marathon_id} backoff: failure recorded");
        }
    }

    /// Admit iff `now - last_fetch >= min_participant_gap + U(0, jitter)`.
    /// A fresh jitter sample is drawn on every call, spreading thundering
    /// herds across admitted participants (SPEC_FULL.md §4.6, §9).
    pub fn can_fetch_participant(&self, participant_id: i64) -> bool {
        let jitter_secs: f64 = rand::rng().random_range(0.0..=self.jitter_max.as_secs_f64());
        let gap = self.min_participant_gap + Duration::from_secs_f64(jitter_secs);
        match self.participants.get(&participant_id) {
            Some(state) => state.last_fetch.elapsed() >= gap,
            None => true,
        }
    }

    /// Record a participant fetch attempt, gating future admits.
    pub fn mark_fetch(&self, participant_id: i64) {
        self.participants.insert(participant_id, ParticipantState { last_fetch: Instant::now() });
    }
}
