use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::utils::format_countdown;

/// Timer the caller must start after the quote gate was armed.
///
/// Only the most recent arm is live; a timer carrying an older generation is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerArm {
    pub generation: u64,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteGate {
    Idle,
    Armed,
}

/// Serializing fixed-interval gate: one release per interval, measured from the previous release.
#[derive(Debug)]
pub struct QuoteThrottle {
    interval: Duration,
    cooldown: Duration,
    gate: QuoteGate,
    generation: u64,
    last_release: Option<Instant>,
}

impl QuoteThrottle {
    pub fn new(interval: Duration, cooldown: Duration) -> Self {
        Self {
            interval,
            cooldown,
            gate: QuoteGate::Idle,
            generation: 0,
            last_release: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.gate, QuoteGate::Idle)
    }

    pub fn last_release(&self) -> Option<Instant> {
        self.last_release
    }

    /// Record a release and arm the gate for one interval.
    pub fn release(&mut self, now: Instant) -> TimerArm {
        self.last_release = Some(now);
        self.arm(self.interval)
    }

    /// Re-arm for the long cooldown after the provider answered 429.
    pub fn cooldown(&mut self, retry_after: Option<Duration>) -> TimerArm {
        let delay = retry_after.map_or(self.cooldown, |hint| hint.max(self.cooldown));
        self.arm(delay)
    }

    /// Handle a timer firing. Returns true when the gate went back to idle.
    pub fn fire(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.is_idle() {
            return false;
        }
        self.gate = QuoteGate::Idle;
        true
    }

    fn arm(&mut self, delay: Duration) -> TimerArm {
        self.generation += 1;
        self.gate = QuoteGate::Armed;
        TimerArm {
            generation: self.generation,
            delay,
        }
    }
}

/// Seconds left before the sliding window admits another request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub remaining_secs: i64,
}

impl Countdown {
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.remaining_secs.max(0) as u64)
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_countdown(self.remaining_secs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Granted,
    Denied(Countdown),
}

/// At most `N` issues per trailing window of `W` seconds.
///
/// The ring always holds exactly `N` timestamps; `cursor` points at the oldest,
/// which is also the slot the next grant overwrites.
#[derive(Debug, Clone)]
pub struct HistoricalThrottle {
    window: Vec<i64>,
    cursor: usize,
    span_secs: i64,
}

impl HistoricalThrottle {
    pub fn new(max_requests: usize, span: Duration) -> Self {
        Self {
            window: vec![0; max_requests.max(1)],
            cursor: 0,
            span_secs: span.as_secs() as i64,
        }
    }

    pub fn capacity(&self) -> usize {
        self.window.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn oldest(&self) -> i64 {
        self.window[self.cursor]
    }

    pub fn try_acquire(&mut self, now: i64) -> Acquisition {
        let remaining = self.remaining(now);
        if remaining > 0 {
            return Acquisition::Denied(Countdown {
                remaining_secs: remaining,
            });
        }

        self.window[self.cursor] = now;
        self.cursor = (self.cursor + 1) % self.window.len();
        Acquisition::Granted
    }

    /// Seconds until the oldest slot leaves the window; zero when a request may go now.
    pub fn remaining(&self, now: i64) -> i64 {
        let elapsed = now.saturating_sub(self.oldest());
        if elapsed < self.span_secs {
            self.span_secs.saturating_sub(elapsed)
        } else {
            0
        }
    }

    /// Ring contents in slot order, for durable storage.
    pub fn save(&self) -> Vec<i64> {
        self.window.clone()
    }

    /// Refill the ring from persisted values and point the cursor at the oldest slot.
    ///
    /// Short lists are zero-padded. Long lists keep their `N` most recent timestamps.
    pub fn load(&mut self, persisted: &[i64]) {
        let capacity = self.window.len();
        let mut values = persisted.to_vec();
        if values.len() > capacity {
            values.sort_unstable();
            values.drain(..values.len() - capacity);
        }
        values.resize(capacity, 0);

        self.cursor = values
            .iter()
            .enumerate()
            .min_by_key(|(_, stamp)| **stamp)
            .map(|(index, _)| index)
            .unwrap_or(0);
        self.window = values;
    }
}
