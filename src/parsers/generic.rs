//! Generic fallback extractor used when no host matches the provider
//! registry (SPEC_FULL.md §4.5).

use scraper::{Html, Selector};

use crate::time;

use super::{ParsedResult, RawSplit};

#[must_use]
pub fn parse(body: &str) -> ParsedResult {
    let document = Html::parse_document(body);
    let Ok(row_sel) = Selector::parse("table tr") else {
        return ParsedResult::default();
    };
    let Ok(cell_sel) = Selector::parse("td, th") else {
        return ParsedResult::default();
    };

    let mut splits = Vec::new();
    for row in document.select(&row_sel) {
        let cells: Vec<String> = row
            .select(&cell_sel)
            .map(|c| c.text().collect::<String>().trim().to_string())
            .collect();
        let Some(label) = cells.first() else { continue };
        if label.is_empty() {
            continue;
        }
        let rest = cells[1..].join(" ");
        let times = time::all_times(&rest);
        if times.is_empty() {
            continue;
        }
        splits.push(RawSplit {
            point_label: label.clone(),
            point_km: crate::distance::km_from_label(label),
            net_time: times.first().cloned(),
            pass_clock: times.get(1).cloned(),
            pace: None,
        });
    }

    ParsedResult {
        splits,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_label_and_up_to_two_times() {
        let html = r#"<table>
            <tr><td>5km</td><td>00:25:30</td><td>09:25:30</td></tr>
        </table>"#;
        let result = parse(html);
        assert_eq!(result.splits.len(), 1);
        assert_eq!(result.splits[0].net_time.as_deref(), Some("00:25:30"));
        assert_eq!(result.splits[0].pass_clock.as_deref(), Some("09:25:30"));
    }

    #[test]
    fn empty_input_yields_empty_splits_not_a_panic() {
        let result = parse("");
        assert!(result.splits.is_empty());
    }

    #[test]
    fn rows_without_any_time_value_are_skipped() {
        let html = r#"<table><tr><td>Header</td><td>Notes</td></tr></table>"#;
        let result = parse(html);
        assert!(result.splits.is_empty());
    }
}
