//! Static-HTML-with-summary-block provider parser (SPEC_FULL.md §4.4,
//! "Provider-P"): splits live in `<tbody><tr>` two-cell rows where the
//! second cell packs `pass_clock (net_time)`.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::distance;
use crate::time;

use super::{AssetKind, ParsedResult, RawAsset, RawSplit, Summary};

static PAREN_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<outside>[^()]*)(?:\((?P<inside>[^()]*)\))?").expect("valid regex")
});

#[must_use]
pub fn parse(body: &str) -> ParsedResult {
    let document = Html::parse_document(body);
    let summary = extract_summary(&document);
    let mut splits = extract_splits(&document);
    ensure_finish_split(&mut splits, &summary);
    let assets = extract_certificate(&document);
    let race_total_km = extract_and_normalize_distance(&document, body);

    ParsedResult {
        splits,
        summary,
        assets,
        race_label: race_total_km.map(distance::category_from_km).map(str::to_string),
        race_total_km,
    }
}

fn extract_summary(document: &Html) -> Summary {
    let mut summary = Summary::default();

    if let Ok(sel) = Selector::parse(".record .time")
        && let Some(el) = document.select(&sel).next()
    {
        summary.total_net = time::first_time(&el.text().collect::<String>());
    }

    if let Ok(sel) = Selector::parse(".record p") {
        for el in document.select(&sel) {
            let text = el.text().collect::<String>();
            let cleaned = distance::clean_text(&text);
            if cleaned.contains("Start Time") {
                summary.start_time = time::first_time(&cleaned);
            } else if cleaned.contains("Finish Time") {
                summary.finish_time = time::first_time(&cleaned);
            }
        }
    }

    summary
}

fn extract_splits(document: &Html) -> Vec<RawSplit> {
    let Ok(row_sel) = Selector::parse("table tbody tr") else {
        return Vec::new();
    };
    let Ok(cell_sel) = Selector::parse("td") else {
        return Vec::new();
    };

    let mut splits = Vec::new();
    for row in document.select(&row_sel) {
        let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
        if cells.len() != 2 {
            continue;
        }
        let label = distance::clean_text(&cells[0].text().collect::<String>());
        if label.is_empty() {
            continue;
        }
        let raw_value = cells[1].text().collect::<String>();
        let Some(caps) = PAREN_RX.captures(raw_value.trim()) else {
            continue;
        };
        let pass_clock = caps
            .name("outside")
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .and_then(time::first_time);
        let net_time = caps
            .name("inside")
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .and_then(|s| time::first_time(s));

        splits.push(RawSplit {
            point_km: distance::km_from_label(&label),
            point_label: label,
            net_time,
            pass_clock,
            pace: None,
        });
    }
    splits
}

fn ensure_finish_split(splits: &mut Vec<RawSplit>, summary: &Summary) {
    let already_has_finish = splits
        .last()
        .is_some_and(|s| distance::is_finish_label(&s.point_label));
    if already_has_finish {
        return;
    }
    if summary.total_net.is_some() || summary.finish_time.is_some() {
        splits.push(RawSplit {
            point_label: "Finish".to_string(),
            point_km: None,
            net_time: summary.total_net.clone(),
            pass_clock: summary.finish_time.clone(),
            pace: None,
        });
    }
}

fn extract_certificate(document: &Html) -> Vec<RawAsset> {
    let mut assets = Vec::new();
    if let Ok(sel) = Selector::parse(".image-container img")
        && let Some(el) = document.select(&sel).next()
        && let Some(src) = el.value().attr("src")
    {
        assets.push(RawAsset {
            kind: AssetKind::Certificate,
            url: src.to_string(),
            host: None,
        });
        return assets;
    }
    if let Ok(sel) = Selector::parse("img[src]") {
        for el in document.select(&sel) {
            if let Some(src) = el.value().attr("src")
                && src.contains("/PhotoResultsJPG/images/")
            {
                assets.push(RawAsset {
                    kind: AssetKind::Certificate,
                    url: src.to_string(),
                    host: None,
                });
                break;
            }
        }
    }
    assets
}

fn extract_and_normalize_distance(document: &Html, raw_body: &str) -> Option<f64> {
    if let Ok(sel) = Selector::parse(".record")
        && let Some(el) = document.select(&sel).next()
    {
        let text = el.text().collect::<String>();
        if let Some(raw) = distance::extract_distance_from_text(&text) {
            return Some(distance::snap_distance(raw));
        }
    }
    distance::extract_distance_from_text(raw_body).map(distance::snap_distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pass_clock_and_net_time_from_parenthesized_cell() {
        let html = r#"<table><tbody>
            <tr><td>5km</td><td>09:25:30 (00:25:30)</td></tr>
        </tbody></table>"#;
        let result = parse(html);
        assert_eq!(result.splits.len(), 1);
        assert_eq!(result.splits[0].pass_clock.as_deref(), Some("09:25:30"));
        assert_eq!(result.splits[0].net_time.as_deref(), Some("00:25:30"));
    }

    #[test]
    fn synthesizes_finish_row_from_summary_when_absent() {
        let html = r#"
            <div class="record"><div class="time">01:45:00</div>
              <p>Finish Time 10:45:00</p>
            </div>
            <table><tbody>
              <tr><td>5km</td><td>09:25:30 (00:25:30)</td></tr>
            </tbody></table>"#;
        let result = parse(html);
        let last = result.splits.last().expect("has a finish row");
        assert_eq!(last.point_label, "Finish");
        assert_eq!(last.net_time.as_deref(), Some("01:45:00"));
        assert_eq!(last.pass_clock.as_deref(), Some("10:45:00"));
    }

    #[test]
    fn certificate_falls_back_to_photoresults_path() {
        let html = r#"<img src="/PhotoResultsJPG/images/123.jpg">"#;
        let result = parse(html);
        assert_eq!(result.assets.len(), 1);
        assert_eq!(result.assets[0].kind, AssetKind::Certificate);
    }
}
