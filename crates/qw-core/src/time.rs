//! Lightweight UTC date/time utilities (no chrono dependency).
//!
//! Uses Howard Hinnant's civil_from_days algorithm for Unix-to-date conversion.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current UTC time as Unix milliseconds.
pub fn now_unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Convert Unix milliseconds to an ISO-8601 UTC string (second precision).
pub fn millis_to_iso8601(millis: i64) -> String {
    let secs = millis.div_euclid(1000);
    let days = secs.div_euclid(86400);
    let time_of_day = secs.rem_euclid(86400);
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let (y, m, d) = civil_from_days(days);
    format!("{y:04}-{m:02}-{d:02}T{hours:02}:{minutes:02}:{seconds:02}Z")
}

/// Howard Hinnant's civil_from_days: Unix epoch days → (year, month, day).
fn civil_from_days(days: i64) -> (i64, u64, u64) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

/// Clock that never hands out the same or an earlier timestamp twice.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: i64,
}

impl MonotonicClock {
    /// Start after `floor`, e.g. the newest timestamp already persisted.
    pub fn starting_after(floor: i64) -> Self {
        Self { last: floor }
    }

    pub fn tick(&mut self) -> i64 {
        let next = now_unix_millis().max(self.last + 1);
        self.last = next;
        next
    }

    /// Never hand out `ts` or anything earlier from now on.
    pub fn observe(&mut self, ts: i64) {
        self.last = self.last.max(ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_epoch() {
        assert_eq!(millis_to_iso8601(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_known_date() {
        // 2026-02-21T00:00:00Z = 1771632000s
        assert_eq!(millis_to_iso8601(1_771_632_000_123), "2026-02-21T00:00:00Z");
    }

    #[test]
    fn test_now_is_recent() {
        let ts = millis_to_iso8601(now_unix_millis());
        assert!(ts.starts_with("20"), "timestamp should be this century: {ts}");
    }

    #[test]
    fn test_clock_strictly_increases() {
        let mut clock = MonotonicClock::default();
        let mut prev = clock.tick();
        for _ in 0..1000 {
            let next = clock.tick();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_clock_respects_floor() {
        let far_future = now_unix_millis() + 1_000_000;
        let mut clock = MonotonicClock::starting_after(far_future);
        assert_eq!(clock.tick(), far_future + 1);
    }

    #[test]
    fn test_clock_observe_only_moves_forward() {
        let far_future = now_unix_millis() + 1_000_000;
        let mut clock = MonotonicClock::starting_after(far_future);
        clock.observe(5);
        assert_eq!(clock.tick(), far_future + 1);
        clock.observe(far_future + 10);
        assert_eq!(clock.tick(), far_future + 11);
    }
}
