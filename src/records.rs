//! Read-only "best record" aggregation per participant (C12, SPEC_FULL.md
//! §4.9) — used by the admin UI's display list, out of scope here, but the
//! selection and sort logic is part of the core.

use crate::distance;
use crate::models::{Asset, AssetKind, Participant, Split};
use crate::time;

#[derive(Debug, Clone)]
pub struct RecordRow {
    pub participant_id: i64,
    pub name: String,
    pub race_total_km: Option<f64>,
    pub record: Option<String>,
    pub record_secs: Option<i64>,
    pub certificate_path: Option<String>,
}

/// Select one "best" record row for a participant: the last split whose
/// label is a finish label; if none, the absolute last split. The display
/// value falls back to the absolute last row's `net_time` when the chosen
/// row's own `net_time` isn't time-shaped.
#[must_use]
pub fn best_record(participant: &Participant, splits: &[Split], assets: &[Asset]) -> RecordRow {
    let chosen = splits
        .iter()
        .rev()
        .find(|s| distance::is_finish_label(&s.point_label))
        .or_else(|| splits.last());

    let absolute_last = splits.last();

    let record = chosen
        .and_then(|s| s.net_time.clone())
        .filter(|t| time::sec_from_mmss(t).is_some())
        .or_else(|| absolute_last.and_then(|s| s.net_time.clone()));

    let record_secs = record.as_deref().and_then(time::sec_from_mmss);

    let certificate_path = assets
        .iter()
        .filter(|a| a.kind == AssetKind::Certificate)
        .max_by_key(|a| a.seen_at)
        .map(|a| a.local_path.clone().unwrap_or_else(|| a.url.clone()));

    RecordRow {
        participant_id: participant.id,
        name: participant.alias.clone().unwrap_or_else(|| participant.nameorbibno.clone()),
        race_total_km: participant.race_total_km,
        record,
        record_secs,
        certificate_path,
    }
}

/// Sort key: name ascending, distance descending, record-in-seconds
/// ascending (missing records sort last, i.e. treated as `+infinity`).
#[must_use]
pub fn sort_key(row: &RecordRow) -> (String, std::cmp::Reverse<i64>, i64) {
    let distance_key = (row.race_total_km.unwrap_or(0.0) * 1000.0).round() as i64;
    let record_key = row.record_secs.unwrap_or(i64::MAX);
    (row.name.clone(), std::cmp::Reverse(distance_key), record_key)
}

/// Sort a list of rows in place per [`sort_key`].
pub fn sort_records(rows: &mut [RecordRow]) {
    rows.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
}
