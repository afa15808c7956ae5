//! Three-table-format provider parser with in-progress/finished page
//! resolution (SPEC_FULL.md §4.4, "Provider-S").

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::distance;
use crate::time;

use super::{AssetKind, ParsedResult, RawAsset, RawSplit};

static KM_CELL_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\d+(\.\d+)?\s*(km|k)\b").expect("valid regex"));
static RALLYNAME_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)rallyname=([^&]+)").expect("valid regex"));

/// Candidate detail-page paths tried in priority order when `(usedata, bib)`
/// are known: in-progress first, then finished, each on https then http.
/// The caller (fetcher/engine) is responsible for actually requesting these
/// and picking the first that yields [`has_split_table`].
#[must_use]
pub fn resolve_detail_urls(host: &str, usedata: &str, bib: &str) -> Vec<String> {
    let paths = [
        format!("/Expectedrecord_data.asp?usedata={usedata}&bibno={bib}"),
        format!("/return_data_livephoto.asp?usedata={usedata}&bibno={bib}"),
    ];
    let mut urls = Vec::with_capacity(paths.len() * 2);
    for path in paths {
        urls.push(format!("https://{host}{path}"));
        urls.push(format!("http://{host}{path}"));
    }
    urls
}

/// True if `body` contains any of the three recognized split-table shapes.
#[must_use]
pub fn has_split_table(body: &str) -> bool {
    !parse_table(&Html::parse_document(body)).is_empty()
}

#[must_use]
pub fn parse(body: &str) -> ParsedResult {
    let document = Html::parse_document(body);
    let splits = parse_table(&document);
    let assets = extract_assets(&document);
    let race_total_km = extract_and_normalize_distance(&document, &splits);

    ParsedResult {
        splits,
        assets,
        race_label: race_total_km.map(distance::category_from_km).map(str::to_string),
        race_total_km,
        ..Default::default()
    }
}

fn parse_table(document: &Html) -> Vec<RawSplit> {
    let v1 = parse_table_v1(document);
    if !v1.is_empty() {
        return v1;
    }
    let v2 = parse_table_v2(document);
    if !v2.is_empty() {
        return v2;
    }
    parse_table_v3(document)
}

/// v1: `table.result-table`, header row skipped, 4 columns positional:
/// POINT | TIME | PASS TIME | PACE.
fn parse_table_v1(document: &Html) -> Vec<RawSplit> {
    let Ok(table_sel) = Selector::parse("table.result-table") else {
        return Vec::new();
    };
    let Ok(row_sel) = Selector::parse("tr") else {
        return Vec::new();
    };
    let Ok(cell_sel) = Selector::parse("td, th") else {
        return Vec::new();
    };

    let Some(table) = document.select(&table_sel).next() else {
        return Vec::new();
    };

    let mut splits = Vec::new();
    for row in table.select(&row_sel).skip(1) {
        let cells: Vec<String> = row
            .select(&cell_sel)
            .map(|c| distance::clean_text(&c.text().collect::<String>()))
            .collect();
        if cells.len() < 4 || cells[0].is_empty() {
            continue;
        }
        splits.push(RawSplit {
            point_km: distance::km_from_label(&cells[0]),
            point_label: cells[0].clone(),
            net_time: time::first_time(&cells[1]),
            pass_clock: time::first_time(&cells[2]),
            pace: time::first_time(&cells[3]),
        });
    }
    splits
}

/// v2: any table whose header set contains `{POINT, TIME, TIME OF DAY, PACE}`;
/// columns located by header index rather than position.
fn parse_table_v2(document: &Html) -> Vec<RawSplit> {
    let Ok(table_sel) = Selector::parse("table") else {
        return Vec::new();
    };
    let Ok(row_sel) = Selector::parse("tr") else {
        return Vec::new();
    };
    let Ok(cell_sel) = Selector::parse("td, th") else {
        return Vec::new();
    };

    for table in document.select(&table_sel) {
        let mut rows = table.select(&row_sel);
        let Some(header_row) = rows.next() else { continue };
        let headers: Vec<String> = header_row
            .select(&cell_sel)
            .map(|c| distance::clean_text(&c.text().collect::<String>()).to_uppercase())
            .collect();
        let required = ["POINT", "TIME", "TIME OF DAY", "PACE"];
        if !required.iter().all(|r| headers.iter().any(|h| h == r)) {
            continue;
        }
        let idx = |name: &str| headers.iter().position(|h| h == name);
        let (Some(i_point), Some(i_time), Some(i_clock), Some(i_pace)) =
            (idx("POINT"), idx("TIME"), idx("TIME OF DAY"), idx("PACE"))
        else {
            continue;
        };

        let mut splits = Vec::new();
        for row in rows {
            let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
            let get = |i: usize| cells.get(i).map(|c| distance::clean_text(&c.text().collect::<String>()));
            let Some(label) = get(i_point).filter(|s| !s.is_empty()) else { continue };
            splits.push(RawSplit {
                point_km: distance::km_from_label(&label),
                point_label: label,
                net_time: get(i_time).as_deref().and_then(time::first_time),
                pass_clock: get(i_clock).as_deref().and_then(time::first_time),
                pace: get(i_pace).as_deref().and_then(time::first_time),
            });
        }
        if !splits.is_empty() {
            return splits;
        }
    }
    Vec::new()
}

/// v3: rows with >= 4 cells of class `userinfo` whose first cell matches the
/// `\d+(\.\d+)?\s*(km|k)` pattern.
fn parse_table_v3(document: &Html) -> Vec<RawSplit> {
    let Ok(row_sel) = Selector::parse("tr") else {
        return Vec::new();
    };
    let Ok(cell_sel) = Selector::parse("td.userinfo") else {
        return Vec::new();
    };

    let mut splits = Vec::new();
    for row in document.select(&row_sel) {
        let cells: Vec<String> = row
            .select(&cell_sel)
            .map(|c| distance::clean_text(&c.text().collect::<String>()))
            .collect();
        if cells.len() < 4 || !KM_CELL_RX.is_match(&cells[0]) {
            continue;
        }
        splits.push(RawSplit {
            point_km: distance::km_from_label(&cells[0]),
            point_label: cells[0].clone(),
            net_time: time::first_time(&cells[1]),
            pass_clock: time::first_time(&cells[2]),
            pace: time::first_time(&cells[3]),
        });
    }
    splits
}

fn extract_assets(document: &Html) -> Vec<RawAsset> {
    let mut assets = Vec::new();
    if let Ok(sel) = Selector::parse("a[href*='certificate']") {
        for el in document.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                assets.push(RawAsset {
                    kind: AssetKind::Certificate,
                    url: href.to_string(),
                    host: None,
                });
            }
        }
    }
    if let Ok(sel) = Selector::parse("img[src*='livephoto']") {
        for el in document.select(&sel) {
            if let Some(src) = el.value().attr("src") {
                assets.push(RawAsset {
                    kind: AssetKind::LivePhoto,
                    url: src.to_string(),
                    host: None,
                });
            }
        }
    }
    assets
}

fn extract_and_normalize_distance(document: &Html, splits: &[RawSplit]) -> Option<f64> {
    for selector_str in [".green", "h6.green", "h6"] {
        if let Ok(sel) = Selector::parse(selector_str)
            && let Some(el) = document.select(&sel).next()
        {
            let text = el.text().collect::<String>();
            if let Some(raw) = distance::extract_distance_from_text(&text) {
                return Some(distance::snap_distance(raw));
            }
        }
    }
    if let Ok(sel) = Selector::parse("iframe[src]") {
        for el in document.select(&sel) {
            if let Some(src) = el.value().attr("src")
                && let Some(caps) = RALLYNAME_RX.captures(src)
                && let Some(m) = caps.get(1)
                && let Some(raw) = distance::extract_distance_from_text(m.as_str())
            {
                return Some(distance::snap_distance(raw));
            }
        }
    }
    splits
        .iter()
        .filter_map(|s| s.point_km)
        .filter(|km| *km >= 1.0)
        .fold(None, |max, km| Some(max.map_or(km, |m: f64| m.max(km))))
        .map(distance::snap_distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v1_result_table() {
        let html = r#"<table class="result-table">
            <tr><th>POINT</th><th>TIME</th><th>PASS TIME</th><th>PACE</th></tr>
            <tr><td>5.0km</td><td>00:25:30</td><td>09:25:30</td><td>05:06</td></tr>
            <tr><td>10.0km</td><td>00:51:00</td><td>09:51:00</td><td>05:06</td></tr>
            <tr><td>21.0km</td><td>01:45:00</td><td>10:45:00</td><td>05:00</td></tr>
        </table>"#;
        let result = parse(html);
        assert_eq!(result.splits.len(), 3);
        assert_eq!(result.splits[2].net_time.as_deref(), Some("01:45:00"));
    }

    #[test]
    fn parses_v2_by_header_index_regardless_of_order() {
        let html = r#"<table>
            <tr><th>TIME OF DAY</th><th>POINT</th><th>PACE</th><th>TIME</th></tr>
            <tr><td>09:25:30</td><td>5.0km</td><td>05:06</td><td>00:25:30</td></tr>
        </table>"#;
        let result = parse(html);
        assert_eq!(result.splits.len(), 1);
        assert_eq!(result.splits[0].net_time.as_deref(), Some("00:25:30"));
        assert_eq!(result.splits[0].pass_clock.as_deref(), Some("09:25:30"));
    }

    #[test]
    fn parses_v3_userinfo_cells() {
        let html = r#"<table>
            <tr><td class="userinfo">5.0km</td><td class="userinfo">00:25:30</td>
                <td class="userinfo">09:25:30</td><td class="userinfo">05:06</td></tr>
        </table>"#;
        let result = parse(html);
        assert_eq!(result.splits.len(), 1);
    }

    #[test]
    fn distance_discards_subkilometer_values() {
        let html = r#"<table class="result-table">
            <tr><th>POINT</th><th>TIME</th><th>PASS TIME</th><th>PACE</th></tr>
            <tr><td>0.5km</td><td>00:02:00</td><td>09:02:00</td><td>04:00</td></tr>
        </table>"#;
        let result = parse(html);
        assert_eq!(result.race_total_km, None);
    }

    #[test]
    fn resolve_detail_urls_tries_in_progress_then_finished_both_schemes() {
        let urls = resolve_detail_urls("smartchip.co.kr", "ABC", "123");
        assert_eq!(urls.len(), 4);
        assert!(urls[0].starts_with("https://") && urls[0].contains("Expectedrecord_data"));
        assert!(urls[2].contains("return_data_livephoto"));
    }
}
