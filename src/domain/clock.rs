use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampMs(pub i64);

impl TimestampMs {
    // Clamped to zero when the clock moved backwards.
    pub fn seconds_since(self, earlier: TimestampMs) -> f64 {
        let delta_ms = self.0.saturating_sub(earlier.0).max(0);
        delta_ms as f64 / 1000.0
    }
}

pub trait Clock {
    fn now(&self) -> TimestampMs;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(Utc::now().timestamp_millis())
    }
}

pub fn to_iso8601_seconds(timestamp: TimestampMs) -> String {
    let datetime = DateTime::<Utc>::from_timestamp_millis(timestamp.0)
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
    datetime.to_rfc3339_opts(SecondsFormat::Secs, true)
}
