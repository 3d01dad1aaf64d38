//! Skip policy for the sync loop.
//!
//! These predicates decide what gets fetched. They take timestamps and sets, never a
//! database or a client, so the cost-control rules are testable without I/O.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;

/// Freshness gate. An author checked fewer than `freshness_days` days ago is not
/// refetched unless forced. A check stamped in the future counts as fresh.
pub fn should_fetch_author(
    last_check: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    freshness_days: i64,
    force: bool,
) -> bool {
    if force {
        return true;
    }
    match last_check {
        None => true,
        Some(checked) => now - checked >= Duration::days(freshness_days),
    }
}

/// Oldest publish year kept in recent-only mode: years strictly below
/// `now.year - recent_years` are too old.
pub fn recent_cutoff(now: DateTime<Utc>, recent_years: i32) -> i32 {
    now.year() - recent_years
}

/// Unknown years are never too old.
pub fn is_too_old(publish_year: Option<i32>, cutoff: Option<i32>) -> bool {
    match (publish_year, cutoff) {
        (Some(year), Some(cutoff)) => year < cutoff,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryDecision {
    Fetch,
    SkipExisting,
    SkipTooOld,
}

/// Per-entry gate, applied before the detail call.
///
/// The identifier check runs first: it is a set lookup and catches re-runs after a
/// partial failure. `existing` holds every work id stored for the author whatever
/// its status, so entries removed as duplicates or non-English stay removed.
pub fn entry_gate(
    work_id: &str,
    publish_year: Option<i32>,
    existing: &HashSet<String>,
    cutoff: Option<i32>,
) -> EntryDecision {
    if existing.contains(work_id) {
        EntryDecision::SkipExisting
    } else if is_too_old(publish_year, cutoff) {
        EntryDecision::SkipTooOld
    } else {
        EntryDecision::Fetch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn never_checked_author_is_fetched() {
        assert!(should_fetch_author(None, now(), 7, false));
    }

    #[test]
    fn freshness_window_is_strict() {
        let six_days = now() - Duration::days(6);
        let seven_days = now() - Duration::days(7);
        assert!(!should_fetch_author(Some(six_days), now(), 7, false));
        assert!(should_fetch_author(Some(seven_days), now(), 7, false));
        assert!(should_fetch_author(Some(six_days), now(), 7, true));
    }

    #[test]
    fn future_stamp_counts_as_fresh() {
        let tomorrow = now() + Duration::days(1);
        assert!(!should_fetch_author(Some(tomorrow), now(), 7, false));
    }

    #[test]
    fn recent_only_cutoff() {
        let cutoff = recent_cutoff(now(), 3);
        assert_eq!(cutoff, 2023);
        assert!(is_too_old(Some(2022), Some(cutoff)));
        assert!(!is_too_old(Some(2023), Some(cutoff)));
        assert!(!is_too_old(None, Some(cutoff)));
        assert!(!is_too_old(Some(1900), None));
    }

    #[test]
    fn identifier_gate_runs_before_year_gate() {
        let existing: HashSet<String> = ["/works/OL1W".to_string()].into_iter().collect();
        assert_eq!(
            entry_gate("/works/OL1W", Some(1950), &existing, Some(2023)),
            EntryDecision::SkipExisting
        );
        assert_eq!(
            entry_gate("/works/OL2W", Some(1950), &existing, Some(2023)),
            EntryDecision::SkipTooOld
        );
        assert_eq!(
            entry_gate("/works/OL2W", Some(1950), &existing, None),
            EntryDecision::Fetch
        );
    }
}
