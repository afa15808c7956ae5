//! Adaptive crawler and normalizer for live marathon split-timing providers.
//!
//! The crate is organized around one tick loop ([`engine`]) that admits
//! marathons through a [`scheduler`], fetches each participant's page
//! through a [`fetcher`] (HTTP [`transport`] with a headless-[`browser_worker`]
//! fallback), routes the response through a provider [`parsers`] registry
//! onto one canonical split schema, and writes batched upserts through
//! [`persistence`]. [`finish`] and [`records`] sit downstream of the stored
//! data: finish detection/prediction and the best-record aggregation used
//! by the admin UI.

pub mod browser_setup;
pub mod browser_worker;
pub mod config;
pub mod distance;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod finish;
pub mod models;
pub mod parsers;
pub mod persistence;
pub mod records;
pub mod scheduler;
pub mod time;
pub mod transport;

/// Identifies the crawler as a standard desktop browser to every upstream
/// provider and to the headless browser worker (SPEC_FULL.md §6).
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
