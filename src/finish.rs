//! Finish detection and predicted finish time (C11). The net-time clock-gap
//! accumulator used to backfill a `Finish` row's missing `net_time` lives in
//! [`crate::persistence`] as a SQL query against already-persisted splits
//! (SPEC_FULL.md §4.8), not here.

use crate::distance;
use crate::models::Split;
use crate::time;

#[derive(Debug, Clone, PartialEq)]
pub enum FinishState {
    Finished { split_index: usize },
    NotFinished,
}

/// Apply the three-rule finish cascade in order against a participant's
/// splits (already ordered by arrival). `total_km` should be the marathon's
/// snapped total distance, if known.
#[must_use]
pub fn detect_finish(splits: &[Split], total_km: Option<f64>) -> FinishState {
    // Rule 1: any split with a finish-keyword label and a time value.
    if let Some((idx, _)) = splits
        .iter()
        .enumerate()
        .find(|(_, s)| distance::is_finish_label(&s.point_label) && has_any_value(s))
    {
        return FinishState::Finished { split_index: idx };
    }

    // Rule 2: scan in reverse for a split within tolerance of the total.
    if let Some(total) = total_km {
        let snapped = distance::snap_distance(total);
        let tolerance = distance::finish_tolerance_for(snapped);
        for (idx, split) in splits.iter().enumerate().rev() {
            if let Some(km) = split.point_km
                && (snapped - km).abs() <= tolerance
                && has_any_value(split)
            {
                return FinishState::Finished { split_index: idx };
            }
        }
    }

    // Rule 3: last split's progress ratio >= 90%.
    if let (Some(total), Some(last_idx)) = (total_km, splits.len().checked_sub(1)) {
        let last = &splits[last_idx];
        if let Some(km) = last.point_km
            && total > 0.0
            && km / total >= 0.9
            && has_any_value(last)
        {
            return FinishState::Finished { split_index: last_idx };
        }
    }

    FinishState::NotFinished
}

fn has_any_value(split: &Split) -> bool {
    split.net_time.is_some() || split.pass_clock.is_some() || split.pace.is_some()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub finish_net: String,
    pub finish_eta: Option<String>,
}

/// Predict a finish time/ETA from the last split's pace (or the mean pace
/// across all splits that carry one) and the remaining distance.
#[must_use]
pub fn predict_finish(splits: &[Split], total_km: f64) -> Option<Prediction> {
    let last = splits.last()?;
    let last_net_secs = last.net_time.as_deref().and_then(time::sec_from_mmss)?;
    let last_km = last.point_km.unwrap_or(0.0);

    let use_spk = last
        .pace
        .as_deref()
        .and_then(time::sec_from_mmss)
        .map(|s| s as f64)
        .or_else(|| mean_pace_secs_per_km(splits))?;

    let remaining_km = (total_km - last_km).max(0.0);
    let remaining_secs = remaining_km * use_spk;
    let finish_net_secs = last_net_secs + remaining_secs.round() as i64;
    let finish_net = time::format_duration(finish_net_secs);

    let finish_eta = last
        .pass_clock
        .as_deref()
        .and_then(|clock| time::eta_from_clock(clock, remaining_secs.round() as i64));

    Some(Prediction { finish_net, finish_eta })
}

/// Mean seconds-per-km computed from consecutive splits that carry both a
/// `point_km` and a `net_time`.
fn mean_pace_secs_per_km(splits: &[Split]) -> Option<f64> {
    let mut paces = Vec::new();
    let mut prev: Option<(f64, i64)> = None;
    for split in splits {
        let (Some(km), Some(net)) = (split.point_km, split.net_time.as_deref().and_then(time::sec_from_mmss)) else {
            continue;
        };
        if let Some((prev_km, prev_net)) = prev
            && let Some(spk) = time::sec_per_km((net - prev_net) as f64, km - prev_km)
        {
            paces.push(spk);
        }
        prev = Some((km, net));
    }
    if paces.is_empty() {
        None
    } else {
        Some(paces.iter().sum::<f64>() / paces.len() as f64)
    }
}
