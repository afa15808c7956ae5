//! JS-rendered provider parser (SPEC_FULL.md §4.4, "Provider-M"). The DOM
//! may be deferred or the browser worker may hand back the underlying XHR
//! JSON response directly (prefixed `JSON::` by the fetcher); this module
//! handles both shapes.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use crate::distance;
use crate::time;

use super::{AssetKind, ParsedResult, RawAsset, RawSplit};

const LABEL_KEYS: &[&str] = &["구간명", "섹션", "지점", "label", "section"];
const PASS_CLOCK_KEYS: &[&str] = &["통과시간", "시각", "clock", "passtime", "pass_time"];
const ACC_KEYS: &[&str] = &["누적기록", "누적", "acc", "acctime", "total", "cumulative"];

/// Entry point. `body` is either raw HTML, or a `JSON::`-prefixed payload
/// handed back by the browser worker when the table never rendered.
#[must_use]
pub fn parse(body: &str) -> ParsedResult {
    let splits = if let Some(json_body) = body.strip_prefix("JSON::") {
        splits_from_json_str(json_body)
    } else {
        splits_from_html(body)
    };

    let document = Html::parse_document(body);
    let race_total_km = extract_distance(&document, body);
    let assets = extract_assets(&document, body);

    ParsedResult {
        splits,
        assets,
        race_label: race_total_km.map(distance::category_from_km).map(str::to_string),
        race_total_km,
        ..Default::default()
    }
}

/// HTML path: `<tr class="table-row ant-row">` rows with 4 cells in order
/// `{label, pass_clock, segment_time, cumulative_time}` — the cumulative
/// column is the one that maps to `net_time`.
fn splits_from_html(body: &str) -> Vec<RawSplit> {
    let document = Html::parse_document(body);
    let Ok(row_sel) = Selector::parse(".table-row.ant-row") else {
        return Vec::new();
    };
    let Ok(cell_sel) = Selector::parse("td, .ant-row-cell, div") else {
        return Vec::new();
    };

    let mut splits = Vec::new();
    for row in document.select(&row_sel) {
        let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
        if cells.len() < 4 {
            continue;
        }
        let label = distance::clean_text(&cells[0].text().collect::<String>());
        if label.is_empty() {
            continue;
        }
        let pass_clock = distance::clean_text(&cells[1].text().collect::<String>());
        let cumulative = distance::clean_text(&cells[3].text().collect::<String>());
        splits.push(RawSplit {
            point_km: distance::km_from_label(&label),
            point_label: label,
            pass_clock: time::first_time(&pass_clock),
            net_time: time::first_time(&cumulative),
            pace: None,
        });
    }
    splits
}

fn splits_from_json_str(json_body: &str) -> Vec<RawSplit> {
    serde_json::from_str::<Value>(json_body.trim())
        .map(|v| {
            let mut out = Vec::new();
            walk_json(&v, &mut out);
            out
        })
        .unwrap_or_default()
}

/// Recursively walks a decoded JSON tree. At each object, extracts a label
/// from a key matching [`LABEL_KEYS`] (never a key whose lowercased form
/// contains the substring `name`, which rules out generic identity fields
/// like `courseName` that would otherwise false-positive on `section`-ish
/// matching), a `pass_clock` from [`PASS_CLOCK_KEYS`], and an accumulated
/// time from [`ACC_KEYS`].
fn walk_json(value: &Value, out: &mut Vec<RawSplit>) {
    match value {
        Value::Object(map) => {
            if let Some(split) = split_from_object(map) {
                out.push(split);
            }
            for v in map.values() {
                walk_json(v, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_json(item, out);
            }
        }
        _ => {}
    }
}

fn split_from_object(map: &serde_json::Map<String, Value>) -> Option<RawSplit> {
    let label = find_string(map, LABEL_KEYS, true)?;
    let pass_clock = find_string(map, PASS_CLOCK_KEYS, false).as_deref().and_then(time::first_time);
    let net_time = find_string(map, ACC_KEYS, false).as_deref().and_then(time::first_time);
    if pass_clock.is_none() && net_time.is_none() {
        return None;
    }
    Some(RawSplit {
        point_km: distance::km_from_label(&label),
        point_label: label,
        pass_clock,
        net_time,
        pace: None,
    })
}

fn find_string(map: &serde_json::Map<String, Value>, keys: &[&str], reject_name: bool) -> Option<String> {
    for (key, v) in map {
        let lower = key.to_lowercase();
        if reject_name && lower.contains("name") {
            continue;
        }
        if keys.iter().any(|k| key == k || lower == k.to_lowercase()) && let Value::String(s) = v {
            let cleaned = distance::clean_text(s);
            if !cleaned.is_empty() {
                return Some(cleaned);
            }
        }
    }
    None
}

/// Scrape the "대회기록" (race record) statistic and the "도착" (arrival)
/// row out of a page body. The engine calls this on the body of a genuine
/// secondary fetch (SPEC_FULL.md §4.4) issued when the primary JSON tick
/// lacked a `Finish`; this function itself does no I/O (SPEC_FULL.md §5:
/// parsers are pure CPU).
#[must_use]
pub fn extract_finish_stats(body: &str) -> (Option<String>, Option<String>) {
    let document = Html::parse_document(body);
    let mut net_time = None;
    let mut pass_clock = None;

    if let Ok(sel) = Selector::parse("*") {
        for el in document.select(&sel) {
            let text = distance::clean_text(&el.text().collect::<String>());
            if net_time.is_none() && text.contains("대회기록") {
                net_time = time::first_time(&text);
            }
            if pass_clock.is_none() && text.contains("도착") {
                pass_clock = time::first_time(&text);
            }
            if net_time.is_some() && pass_clock.is_some() {
                break;
            }
        }
    }

    (net_time, pass_clock)
}

/// Append a synthetic `Finish` split built from [`extract_finish_stats`],
/// unless neither stat was found.
pub fn append_synthetic_finish(result: &mut ParsedResult, net_time: Option<String>, pass_clock: Option<String>) {
    if net_time.is_some() || pass_clock.is_some() {
        result.splits.push(RawSplit {
            point_label: "Finish".to_string(),
            point_km: None,
            net_time,
            pass_clock,
            pace: None,
        });
    }
}

/// True when the primary parse needs a secondary fetch to recover a
/// `Finish` split (SPEC_FULL.md §4.4): the JSON path produced splits but
/// none of them is a finish line.
#[must_use]
pub fn needs_secondary_finish_fetch(result: &ParsedResult, was_json: bool) -> bool {
    was_json && !result.splits.iter().any(|s| distance::is_finish_label(&s.point_label))
}

fn extract_distance(document: &Html, raw_body: &str) -> Option<f64> {
    if let Ok(sel) = Selector::parse(".race-distance, .course-name")
        && let Some(el) = document.select(&sel).next()
        && let Some(raw) = distance::extract_distance_from_text(&el.text().collect::<String>())
    {
        return Some(distance::snap_distance(raw));
    }
    distance::extract_distance_from_text(raw_body).map(distance::snap_distance)
}

/// Certificate assets: any `img[src]` or `a[href]` containing
/// `/upload/certificate/`.
fn extract_assets(document: &Html, _raw_body: &str) -> Vec<RawAsset> {
    let mut assets = Vec::new();
    if let Ok(sel) = Selector::parse("img[src]") {
        for el in document.select(&sel) {
            if let Some(src) = el.value().attr("src")
                && src.contains("/upload/certificate/")
            {
                assets.push(RawAsset {
                    kind: AssetKind::Certificate,
                    url: src.to_string(),
                    host: None,
                });
            }
        }
    }
    if let Ok(sel) = Selector::parse("a[href]") {
        for el in document.select(&sel) {
            if let Some(href) = el.value().attr("href")
                && href.contains("/upload/certificate/")
            {
                assets.push(RawAsset {
                    kind: AssetKind::Certificate,
                    url: href.to_string(),
                    host: None,
                });
            }
        }
    }
    assets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_html_table_row_cumulative_as_net_time() {
        let html = r#"<tr class="table-row ant-row">
            <td>5km</td><td>09:25:30</td><td>00:05:00</td><td>00:25:30</td>
        </tr>"#;
        let result = parse(html);
        assert_eq!(result.splits.len(), 1);
        assert_eq!(result.splits[0].pass_clock.as_deref(), Some("09:25:30"));
        assert_eq!(result.splits[0].net_time.as_deref(), Some("00:25:30"));
    }

    #[test]
    fn walks_nested_json_with_korean_keys() {
        let json = r#"JSON::{"records":[{"구간명":"5km","통과시간":"09:25:30","누적기록":"00:25:30"}]}"#;
        let result = parse(json);
        assert_eq!(result.splits.len(), 1);
        assert_eq!(result.splits[0].point_label, "5km");
        assert_eq!(result.splits[0].net_time.as_deref(), Some("00:25:30"));
    }

    #[test]
    fn walks_nested_json_with_english_keys() {
        let json = r#"JSON::{"data":{"splits":[{"section":"Finish","passtime":"10:45:00","acctime":"01:45:00"}]}}"#;
        let result = parse(json);
        assert_eq!(result.splits.len(), 1);
        assert!(distance::is_finish_label(&result.splits[0].point_label));
    }

    #[test]
    fn name_suffixed_keys_are_never_treated_as_labels() {
        let json = r#"JSON::{"courseName":"Seoul Marathon","clock":"09:25:30","acc":"00:25:30"}"#;
        let result = parse(json);
        assert!(result.splits.is_empty());
    }

    #[test]
    fn objects_without_a_time_field_are_not_treated_as_splits() {
        let json = r#"JSON::{"meta":{"label":"ignored","count":3}}"#;
        let result = parse(json);
        assert!(result.splits.is_empty());
    }

    #[test]
    fn needs_secondary_finish_fetch_only_for_json_tick_without_finish() {
        let json = r#"JSON::{"rows":[{"label":"5km","clock":"09:00:00","acc":"00:25:00"}]}"#;
        let result = parse(json);
        assert!(needs_secondary_finish_fetch(&result, true));
        assert!(!needs_secondary_finish_fetch(&result, false));

        let html = r#"<tr class="table-row ant-row"><td>Finish</td><td>10:45:00</td><td>0</td><td>01:45:00</td></tr>"#;
        let finished = parse(html);
        assert!(!needs_secondary_finish_fetch(&finished, true));
    }

    #[test]
    fn extract_finish_stats_pulls_race_record_and_arrival_clock() {
        let page = "<div>대회기록 00:52:30</div><div>도착 09:27:30</div>";
        let (net_time, pass_clock) = extract_finish_stats(page);
        assert_eq!(net_time.as_deref(), Some("00:52:30"));
        assert_eq!(pass_clock.as_deref(), Some("09:27:30"));
    }

    #[test]
    fn append_synthetic_finish_is_a_noop_when_neither_stat_found() {
        let mut result = ParsedResult::default();
        append_synthetic_finish(&mut result, None, None);
        assert!(result.splits.is_empty());
    }
}
