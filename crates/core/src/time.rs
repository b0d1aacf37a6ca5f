//! Wall-clock access.
//!
//! Every status in the engine is derived from timestamps against "now", so the
//! source of "now" is injectable. Read it once per evaluation and pass the
//! value down; never re-read mid-query.

use chrono::{DateTime, Utc};

/// Source of the current instant.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

impl<T> TimeSource for std::sync::Arc<T>
where
    T: TimeSource + ?Sized,
{
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// System clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a given instant (tests, replays, reports "as of").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedTimeSource(DateTime<Utc>);

impl FixedTimeSource {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_source_never_moves() {
        let at = Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap();
        let source = FixedTimeSource::new(at);
        assert_eq!(source.now(), at);
        assert_eq!(source.now(), at);
    }

    #[test]
    fn system_source_is_recent() {
        let before = Utc::now();
        let now = SystemTimeSource.now();
        assert!(now >= before);
    }
}
