//! Canonical persisted entities (SPEC_FULL.md §3): marathons, participants,
//! splits, assets, plus the identity/bib rules that gate how participants
//! are inserted.

use rand::Rng;

use crate::distance;

/// Confusion-safe alphabet for join codes: no `0`, `O`, `1`, `I`, `l`.
const JOIN_CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
const JOIN_CODE_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Marathon {
    pub id: i64,
    pub name: String,
    pub url_template: String,
    pub usedata: String,
    pub total_km: f64,
    pub refresh_sec: u64,
    pub enabled: bool,
    pub event_date: Option<chrono::NaiveDate>,
    pub join_code: String,
}

impl Marathon {
    /// Host portion of [`Marathon::url_template`], lowercased, used for
    /// provider routing and the `spct` bib-padding rule.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        let with_scheme = if self.url_template.contains("://") {
            self.url_template.clone()
        } else {
            format!("https://{}", self.url_template)
        };
        url::Url::parse(&with_scheme)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
    }

    /// True when today is before [`Marathon::event_date`] — the scheduler's
    /// event-date gate (SPEC_FULL.md §4.6).
    #[must_use]
    pub fn gated_by_event_date(&self, today: chrono::NaiveDate) -> bool {
        self.event_date.is_some_and(|d| today < d)
    }
}

/// Generate a random 8-char join code from [`JOIN_CODE_ALPHABET`].
#[must_use]
pub fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..JOIN_CODE_ALPHABET.len());
            JOIN_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Expand a marathon's URL template against one participant's identity.
/// `{nameorbibno}` is required; `{usedata}` and `{bib_spct6}` are optional.
/// Substituted values are percent-encoded for use in a query string, since
/// aliases and bibs are admin/user-supplied free text.
#[must_use]
pub fn expand_url_template(template: &str, usedata: &str, nameorbibno: &str) -> String {
    let bib6 = zero_pad_bib_if_numeric(nameorbibno, 6);
    template
        .replace("{nameorbibno}", &urlencoding::encode(nameorbibno))
        .replace("{usedata}", &urlencoding::encode(usedata))
        .replace("{bib_spct6}", &urlencoding::encode(&bib6))
}

/// Zero-pad `bib` to `width` characters if (and only if) it is all digits;
/// otherwise returns it unchanged.
#[must_use]
pub fn zero_pad_bib_if_numeric(bib: &str, width: usize) -> String {
    if !bib.is_empty() && bib.chars().all(|c| c.is_ascii_digit()) {
        format!("{bib:0>width$}")
    } else {
        bib.to_string()
    }
}

/// BIB normalization at participant-insertion time (SPEC_FULL.md §3): hosts
/// whose name contains `spct` left-pad an all-digit bib to 6 characters.
/// Idempotent: padding an already-padded numeric bib is a no-op, and
/// non-numeric bibs pass through untouched.
#[must_use]
pub fn normalize_bib(host: &str, bib: &str) -> String {
    if host.to_lowercase().contains("spct") {
        zero_pad_bib_if_numeric(bib, 6)
    } else {
        bib.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: i64,
    pub marathon_id: i64,
    pub nameorbibno: String,
    pub alias: Option<String>,
    pub active: bool,
    pub race_label: Option<String>,
    pub race_total_km: Option<f64>,
    pub finish_image_url: Option<String>,
    pub finish_image_path: Option<String>,
}

impl Participant {
    /// Apply a freshly-crawled race label/distance, never reverting a value
    /// that was already set (SPEC_FULL.md §3 invariant).
    pub fn apply_inferred_distance(&mut self, label: Option<String>, total_km: Option<f64>) {
        if self.race_label.is_none() {
            self.race_label = label;
        }
        if self.race_total_km.is_none() {
            self.race_total_km = total_km;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Split {
    pub id: i64,
    pub participant_id: i64,
    pub point_label: String,
    pub point_km: Option<f64>,
    pub net_time: Option<String>,
    pub pass_clock: Option<String>,
    pub pace: Option<String>,
    pub seen_at: i64,
}

impl Split {
    #[must_use]
    pub fn is_finish(&self) -> bool {
        distance::is_finish_label(&self.point_label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Certificate,
    LivePhoto,
}

impl AssetKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Certificate => "certificate",
            AssetKind::LivePhoto => "livephoto",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Asset {
    pub id: i64,
    pub participant_id: i64,
    pub kind: AssetKind,
    pub url: String,
    pub local_path: Option<String>,
    pub host_hint: Option<String>,
    pub seen_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_bib_pads_numeric_on_spct_host() {
        assert_eq!(normalize_bib("time.spct.co.kr", "123"), "000123");
        assert_eq!(normalize_bib("time.spct.co.kr", "ABC123"), "ABC123");
    }

    #[test]
    fn normalize_bib_is_idempotent() {
        let once = normalize_bib("spct.co.kr", "123");
        let twice = normalize_bib("spct.co.kr", &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_bib_leaves_non_spct_hosts_untouched() {
        assert_eq!(normalize_bib("myresult.co.kr", "123"), "123");
    }

    #[test]
    fn expand_url_template_fills_all_placeholders() {
        let url = expand_url_template(
            "https://host/data.asp?nameorbibno={nameorbibno}&usedata={usedata}&bib6={bib_spct6}",
            "2026SEOUL",
            "123",
        );
        assert_eq!(
            url,
            "https://host/data.asp?nameorbibno=123&usedata=2026SEOUL&bib6=000123"
        );
    }

    #[test]
    fn join_code_uses_confusion_safe_alphabet_and_length() {
        let code = generate_join_code();
        assert_eq!(code.len(), JOIN_CODE_LEN);
        assert!(code.bytes().all(|b| JOIN_CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn marathon_host_extracts_lowercase_host_with_or_without_scheme() {
        let m = Marathon {
            id: 1,
            name: "t".into(),
            url_template: "Time.SPCT.co.kr/data.asp?nameorbibno={nameorbibno}".into(),
            usedata: "X".into(),
            total_km: 21.1,
            refresh_sec: 60,
            enabled: true,
            event_date: None,
            join_code: "ABCD2345".into(),
        };
        assert_eq!(m.host().as_deref(), Some("time.spct.co.kr"));
    }

    #[test]
    fn apply_inferred_distance_never_reverts_existing_value() {
        let mut p = Participant {
            id: 1,
            marathon_id: 1,
            nameorbibno: "123".into(),
            alias: None,
            active: true,
            race_label: Some("Half".into()),
            race_total_km: Some(21.1),
            finish_image_url: None,
            finish_image_path: None,
        };
        p.apply_inferred_distance(Some("Full".into()), Some(42.2));
        assert_eq!(p.race_label.as_deref(), Some("Half"));
        assert_eq!(p.race_total_km, Some(21.1));
    }
}
