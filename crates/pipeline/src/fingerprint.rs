//! Event identity fingerprints: `title + "|" + day-precision date`.
//!
//! Fingerprint equality is exact string equality after date normalization,
//! with no fuzzy matching.  Two genuinely different events sharing a title and a
//! date therefore collide; that precision limit is accepted rather than
//! worked around, since changing matching semantics changes observed
//! behavior.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate};

use confwatch_store::EventRecord;

/// Normalize a date string to day precision (`YYYY-MM-DD`).
///
/// RFC 3339 timestamps keep only their date portion; bare dates pass
/// through canonicalized; a `date<sep>time` string is normalized on its
/// leading token.  Anything unparseable comes back trimmed but otherwise
/// unchanged, so exact duplicates still compare equal.
pub fn normalize_day(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return dt.date_naive().to_string();
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.to_string();
    }
    if let Some(head) = trimmed.split(|c: char| c == 'T' || c.is_whitespace()).next() {
        if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
            return date.to_string();
        }
    }
    trimmed.to_string()
}

/// Whether `raw` normalizes to a real calendar date.  Used to flag model
/// output the pipeline keeps but cannot dedup at day precision.
pub fn is_calendar_date(raw: &str) -> bool {
    NaiveDate::parse_from_str(&normalize_day(raw), "%Y-%m-%d").is_ok()
}

/// Dedup key for one event.
pub fn fingerprint(title: &str, date: &str) -> String {
    format!("{}|{}", title.trim(), normalize_day(date))
}

/// Set of fingerprints for everything already recorded.  Rebuilt from the
/// store snapshot at the start of each run and updated in memory as the run
/// appends, so duplicates arriving within one batch are caught too.
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    seen: HashSet<String>,
}

impl FingerprintIndex {
    /// Duplicate fingerprints already present in the store are tolerated
    /// silently; this is a set, not a count.
    pub fn build<'a>(records: impl IntoIterator<Item = &'a EventRecord>) -> Self {
        let seen = records
            .into_iter()
            .map(|record| fingerprint(&record.title, &record.date))
            .collect();
        Self { seen }
    }

    pub fn contains(&self, candidate: &str) -> bool {
        self.seen.contains(candidate)
    }

    /// Register an event appended earlier in the same run.  Returns `false`
    /// when the fingerprint was already known.
    pub fn insert(&mut self, candidate: String) -> bool {
        self.seen.insert(candidate)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use confwatch_store::EventStatus;

    fn record(title: &str, date: &str) -> EventRecord {
        EventRecord {
            title: title.to_string(),
            date: date.to_string(),
            time: String::new(),
            description: String::new(),
            link: String::new(),
            original_subject: String::new(),
            status: EventStatus::Pending,
        }
    }

    #[test]
    fn normalize_strips_rfc3339_time_portion() {
        assert_eq!(normalize_day("2025-05-01T00:00:00Z"), "2025-05-01");
        assert_eq!(normalize_day("2025-05-01T18:30:00+02:00"), "2025-05-01");
    }

    #[test]
    fn normalize_passes_bare_dates_through() {
        assert_eq!(normalize_day("2025-05-01"), "2025-05-01");
        assert_eq!(normalize_day("  2025-05-01  "), "2025-05-01");
    }

    #[test]
    fn normalize_handles_date_space_time() {
        assert_eq!(normalize_day("2025-05-01 09:00"), "2025-05-01");
    }

    #[test]
    fn normalize_keeps_unparseable_input_trimmed() {
        assert_eq!(normalize_day(" sometime in May "), "sometime in May");
        assert_eq!(normalize_day("TBD"), "TBD");
        assert_eq!(normalize_day(""), "");
    }

    #[test]
    fn calendar_date_detection() {
        assert!(is_calendar_date("2025-05-01"));
        assert!(is_calendar_date("2025-05-01T00:00:00Z"));
        assert!(!is_calendar_date("next Tuesday"));
        assert!(!is_calendar_date(""));
    }

    #[test]
    fn timestamp_and_bare_date_share_a_fingerprint() {
        assert_eq!(
            fingerprint("Talk A", "2025-05-01T00:00:00Z"),
            fingerprint("Talk A", "2025-05-01")
        );
    }

    #[test]
    fn titles_differing_by_case_are_distinct() {
        // Known precision limit: exact string equality only.
        assert_ne!(
            fingerprint("Talk A", "2025-05-01"),
            fingerprint("talk a", "2025-05-01")
        );
    }

    #[test]
    fn build_tolerates_store_duplicates() {
        let rows = [record("Dup", "2025-05-01"), record("Dup", "2025-05-01")];
        let index = FingerprintIndex::build(&rows);
        assert_eq!(index.len(), 1);
        assert!(index.contains(&fingerprint("Dup", "2025-05-01")));
    }

    #[test]
    fn insert_reports_novelty() {
        let mut index = FingerprintIndex::default();
        assert!(index.is_empty());
        assert!(index.insert(fingerprint("A", "2025-05-01")));
        assert!(!index.insert(fingerprint("A", "2025-05-01T12:00:00Z")));
        assert_eq!(index.len(), 1);
    }
}
