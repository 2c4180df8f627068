//! Cannula and sensor age derivation
//!
//! The live stream logs discrete clinical treatments (infusion-site changes,
//! sensor starts) with free-text event types. This module picks the most
//! recent qualifying treatment per category and turns its timestamp into
//! whole-day/whole-hour age facts.

use crate::model::Treatment;

const MILLIS_PER_HOUR: i64 = 3_600_000;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// Whole elapsed periods between two millisecond instants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    /// Full 24h periods
    pub days: i64,
    /// Full hours beyond the last full day (0..=23)
    pub hours: i64,
    /// Full hours overall
    pub total_hours: i64,
}

/// Whole days and hours elapsed from `past` to `now`.
///
/// Callers guarantee `past <= now`; both are millisecond epochs.
pub fn elapsed(now: i64, past: i64) -> Elapsed {
    let diff = now - past;
    let days = diff / MILLIS_PER_DAY;
    let total_hours = diff / MILLIS_PER_HOUR;
    Elapsed {
        days,
        hours: total_hours - days * 24,
        total_hours,
    }
}

/// Treatments whose event type contains `label`, in original order.
///
/// The match is a case-sensitive substring test; treatments without an
/// event type never match.
pub fn filter_treatments<'a>(treatments: &'a [Treatment], label: &str) -> Vec<&'a Treatment> {
    filter_treatments_any(treatments, &[label])
}

/// Like [`filter_treatments`], matching any of several labels
pub fn filter_treatments_any<'a>(
    treatments: &'a [Treatment],
    labels: &[&str],
) -> Vec<&'a Treatment> {
    treatments
        .iter()
        .filter(|t| {
            t.event_type
                .as_deref()
                .is_some_and(|e| labels.iter().any(|label| e.contains(label)))
        })
        .collect()
}

/// Result of scanning a treatment list for the most recent qualifying event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreatmentInfo {
    pub found: bool,
    /// Age in full hours at evaluation time
    pub age: i64,
    pub days: i64,
    pub hours: i64,
    /// Timestamp of the qualifying event
    pub millis: i64,
}

/// Scan `treatments` for the qualifying event closest to `now`.
///
/// The input order is arbitrary and may contain future-dated entries. A
/// candidate replaces the current winner only when its timestamp is both
/// strictly newer than the winner's and not in the future, and its age is
/// the smallest non-negative value seen so far. Future-dated treatments are
/// never selected; an empty input yields `found == false` with all numeric
/// fields zero.
pub fn latest_treatment_info(treatments: &[&Treatment], now: i64) -> TreatmentInfo {
    let mut info = TreatmentInfo::default();
    let mut best_ts = i64::MIN;

    for treatment in treatments {
        let ts = treatment.mills;
        if ts > best_ts && ts <= now {
            let e = elapsed(now, ts);
            if !info.found || (e.total_hours >= 0 && e.total_hours < info.age) {
                info.found = true;
                info.age = e.total_hours;
                info.days = e.days;
                info.hours = e.hours;
                info.millis = ts;
                best_ts = ts;
            }
        }
    }

    info
}

/// A tracked age category, bound to its treatment filter and fact namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Infusion cannula, changed with "Site Change" treatments
    Cannula,
    /// Glucose sensor, changed with "Sensor Start" / "Sensor Change" treatments
    Sensor,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Cannula, Category::Sensor];

    /// Base id of this category's published facts
    pub fn fact_base(self) -> &'static str {
        match self {
            Category::Cannula => "data.cage",
            Category::Sensor => "data.sage",
        }
    }

    /// Qualifying treatments for this category, in original order
    pub fn filter<'a>(self, treatments: &'a [Treatment]) -> Vec<&'a Treatment> {
        match self {
            Category::Cannula => filter_treatments(treatments, "Site Change"),
            Category::Sensor => {
                filter_treatments_any(treatments, &["Sensor Start", "Sensor Change"])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = MILLIS_PER_HOUR;

    fn treatment(event_type: Option<&str>, mills: i64) -> Treatment {
        Treatment {
            event_type: event_type.map(String::from),
            mills,
        }
    }

    #[test]
    fn test_elapsed_identity() {
        assert_eq!(
            elapsed(1_564_565_851_622, 1_564_565_851_622),
            Elapsed { days: 0, hours: 0, total_hours: 0 }
        );
    }

    #[test]
    fn test_elapsed_truncates_to_full_periods() {
        let now = 1_600_000_000_000;
        // 26h59m59s is still 26 full hours: 1 day and 2 hours
        let e = elapsed(now, now - (26 * HOUR + 59 * 60_000 + 59_000));
        assert_eq!(e, Elapsed { days: 1, hours: 2, total_hours: 26 });
    }

    #[test]
    fn test_elapsed_invariant_days_hours_total() {
        let now = 1_600_000_000_000;
        for total in [0, 1, 23, 24, 25, 47, 48, 100, 500] {
            let e = elapsed(now, now - total * HOUR);
            assert_eq!(e.days * 24 + e.hours, e.total_hours);
            assert_eq!(e.total_hours, total);
            assert!((0..24).contains(&e.hours));
        }
    }

    #[test]
    fn test_filter_substring_match() {
        let treatments = vec![
            treatment(Some("Site Change Good"), 1),
            treatment(Some("Prime"), 2),
        ];
        let matched = filter_treatments(&treatments, "Site Change");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].mills, 1);
    }

    #[test]
    fn test_filter_skips_missing_label() {
        let treatments = vec![
            treatment(None, 1),
            treatment(Some("Site Change"), 2),
            treatment(Some("site change"), 3), // case-sensitive
        ];
        let matched = filter_treatments(&treatments, "Site Change");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].mills, 2);
    }

    #[test]
    fn test_select_empty_input() {
        let info = latest_treatment_info(&[], 1_600_000_000_000);
        assert_eq!(info, TreatmentInfo::default());
        assert!(!info.found);
    }

    #[test]
    fn test_select_ignores_future_dated() {
        let now = 1_600_000_000_000;
        let old = treatment(Some("Site Change"), now - 3 * HOUR);
        let recent = treatment(Some("Site Change"), now - HOUR);
        let future = treatment(Some("Site Change"), now + HOUR);
        let info = latest_treatment_info(&[&old, &recent, &future], now);
        assert!(info.found);
        assert_eq!(info.millis, now - HOUR);
        assert_eq!(info.age, 1);
    }

    #[test]
    fn test_select_only_future_dated_is_not_found() {
        let now = 1_600_000_000_000;
        let future = treatment(Some("Site Change"), now + HOUR);
        let info = latest_treatment_info(&[&future], now);
        assert!(!info.found);
    }

    #[test]
    fn test_identical_timestamps_keep_first() {
        let now = 1_600_000_000_000;
        let first = treatment(Some("Sensor Start"), now - 2 * HOUR);
        let second = treatment(Some("Sensor Start"), now - 2 * HOUR);
        let info = latest_treatment_info(&[&first, &second], now);
        assert!(info.found);
        assert_eq!(info.age, 2);
        assert_eq!(info.millis, now - 2 * HOUR);
    }

    #[test]
    fn test_select_unordered_input() {
        let now = 1_600_000_000_000;
        let newer = treatment(Some("Site Change"), now - HOUR);
        let older = treatment(Some("Site Change"), now - 30 * HOUR);
        let info = latest_treatment_info(&[&newer, &older], now);
        assert!(info.found);
        assert_eq!(info.millis, now - HOUR);
        assert_eq!(info.age, 1);
        assert_eq!(info.days, 0);
    }

    #[test]
    fn test_select_at_now_boundary() {
        let now = 1_600_000_000_000;
        let at_now = treatment(Some("Site Change"), now);
        let info = latest_treatment_info(&[&at_now], now);
        assert!(info.found);
        assert_eq!(info.age, 0);
        assert_eq!(info.millis, now);
    }

    #[test]
    fn test_cannula_category_filter() {
        let treatments = vec![
            treatment(Some("Site Change"), 1),
            treatment(Some("Sensor Start"), 2),
            treatment(Some("BG Check"), 3),
        ];
        let matched = Category::Cannula.filter(&treatments);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].mills, 1);
    }

    #[test]
    fn test_sensor_category_matches_both_labels() {
        let treatments = vec![
            treatment(Some("Sensor Change"), 1),
            treatment(Some("Site Change"), 2),
            treatment(Some("Sensor Start"), 3),
        ];
        let matched = Category::Sensor.filter(&treatments);
        let mills: Vec<i64> = matched.iter().map(|t| t.mills).collect();
        assert_eq!(mills, vec![1, 3]);
    }
}
