//! Retrieval window bookkeeping.
//!
//! Every retrieval pass computes one window per entity type. The window
//! start is the stored cursor (plus the configured hour delta for
//! storefronts running on local clocks); the end is `now` minus the
//! overlap, and becomes the new cursor once the pass commits. Records
//! updated at or after the window end are deferred: the trailing cursor
//! guarantees the next pass matches them again.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl RetrievalWindow {
    pub fn compute(
        last_cursor: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        overlap_secs: i64,
        delta_hours: i64,
    ) -> Self {
        let since = last_cursor.unwrap_or(DateTime::UNIX_EPOCH) + Duration::hours(delta_hours);
        let until = now - Duration::seconds(overlap_secs.max(0));
        Self { since, until }
    }

    /// Too recent to act on this pass; the record re-matches next time.
    #[must_use]
    pub fn is_fresh(&self, updated_at: DateTime<Utc>) -> bool {
        updated_at >= self.until
    }
}

/// Start of the deep re-listing window a forced pass scans.
///
/// Short intervals between passes look back proportionally further
/// (factor up to 2.4); long intervals converge on one extra hour.
pub fn forced_window_start(
    last_cursor: DateTime<Utc>,
    new_cursor: DateTime<Utc>,
) -> DateTime<Utc> {
    let interval = (new_cursor - last_cursor).num_seconds().max(0);
    let depth_factor = 2.4 - (interval as f64 / 3600.0).clamp(0.0, 1.2);
    let lookback = (interval as f64 * depth_factor).min((interval + 3600) as f64);
    let start = last_cursor - Duration::seconds(lookback as i64);
    start.max(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn first_pass_starts_at_the_epoch() {
        let now = at(1_000_000);
        let window = RetrievalWindow::compute(None, now, 90, 0);
        assert_eq!(window.since, DateTime::UNIX_EPOCH);
        assert_eq!(window.until, at(999_910));
    }

    #[test]
    fn delta_hours_shift_the_window_start() {
        let window = RetrievalWindow::compute(Some(at(720_000)), at(1_000_000), 90, -13);
        assert_eq!(window.since, at(720_000 - 13 * 3600));
    }

    #[test]
    fn freshness_is_inclusive_at_the_window_end() {
        let window = RetrievalWindow::compute(Some(at(0)), at(1_000), 100, 0);
        assert!(window.is_fresh(at(900)));
        assert!(window.is_fresh(at(901)));
        assert!(!window.is_fresh(at(899)));
    }

    #[test]
    fn forced_lookback_deepens_for_short_intervals() {
        let base = at(1_000_000);
        // Zero interval looks back nowhere.
        assert_eq!(forced_window_start(base, base), base);
        // Half an hour: factor 1.9, so 3420 seconds.
        assert_eq!(
            forced_window_start(base, base + Duration::seconds(1800)),
            base - Duration::seconds(3420)
        );
        // One hour: factor 1.4.
        assert_eq!(
            forced_window_start(base, base + Duration::seconds(3600)),
            base - Duration::seconds(5040)
        );
        // Two hours: the factor bottoms out at 1.2.
        assert_eq!(
            forced_window_start(base, base + Duration::seconds(7200)),
            base - Duration::seconds(8640)
        );
    }

    #[test]
    fn forced_lookback_caps_at_one_extra_hour() {
        let base = at(1_000_000);
        // Ten hours between passes: 36000 * 1.2 > 36000 + 3600, so the
        // cap wins.
        assert_eq!(
            forced_window_start(base, base + Duration::seconds(36_000)),
            base - Duration::seconds(39_600)
        );
    }

    #[test]
    fn forced_lookback_clamps_at_the_epoch() {
        let start = forced_window_start(at(100), at(1_000_000));
        assert_eq!(start, DateTime::UNIX_EPOCH);
    }
}
