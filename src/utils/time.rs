use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Wall-clock source used by the sliding-window throttle and queue timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_secs(&self) -> i64 {
        self.now().timestamp()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Seconds resolution.
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicI64,
}

impl ManualClock {
    pub fn at(secs: i64) -> Self {
        Self {
            secs: AtomicI64::new(secs),
        }
    }

    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.secs.load(Ordering::SeqCst);
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or_default()
    }

    fn now_secs(&self) -> i64 {
        self.secs.load(Ordering::SeqCst)
    }
}

/// Render a remaining duration as `HH:MM:SS`, prefixed with `Nd ` once it spans a day.
pub fn format_countdown(seconds: i64) -> String {
    if seconds <= 0 {
        return "00:00:00".to_string();
    }

    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sub_day_countdown() {
        assert_eq!(format_countdown(3_661), "01:01:01");
        assert_eq!(format_countdown(59), "00:00:59");
    }

    #[test]
    fn formats_multi_day_countdown() {
        assert_eq!(format_countdown(86_400), "1d 00:00:00");
        assert_eq!(format_countdown(2 * 86_400 + 5), "2d 00:00:05");
    }

    #[test]
    fn non_positive_countdown_is_zero() {
        assert_eq!(format_countdown(0), "00:00:00");
        assert_eq!(format_countdown(-12), "00:00:00");
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at(1_000);
        clock.advance(25);
        assert_eq!(clock.now_secs(), 1_025);
        assert_eq!(clock.now().timestamp(), 1_025);
    }
}
