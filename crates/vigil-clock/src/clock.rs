// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};

/// Source of the current time, injected everywhere a component needs "now".
///
/// Production code uses [`SystemClock`]. Tests use a fake that can be
/// advanced deterministically instead of sleeping real wall-clock seconds —
/// see the circuit breaker and budget ledger test modules for usage.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock. Stateless; cheap to clone-by-reference everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeClock;
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn system_clock_returns_a_recent_time() {
        let before = Utc::now();
        let now = SystemClock.now();
        assert!(now >= before);
    }

    #[test]
    fn fake_clock_advances_by_requested_seconds() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = FakeClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(61);
        assert_eq!(clock.now(), start + chrono::Duration::seconds(61));
    }
}
