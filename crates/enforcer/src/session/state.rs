#![forbid(unsafe_code)]

use std::fmt;
use std::time::{Duration, Instant};

/// Where a focus session is in its lifecycle.
///
/// `Idle -> Setup -> Active <-> Paused -> Ending -> Completed`, and back to
/// `Idle` through a reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Idle,
    Setup,
    Active,
    Paused,
    Ending,
    Completed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Setup => "setup",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ending => "ending",
            Self::Completed => "completed",
        }
    }

    /// Whether the session is between start and end.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Active | Self::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Elapsed-time bookkeeping that does not count paused intervals.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stopwatch {
    started: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl Stopwatch {
    pub fn start(&mut self, now: Instant) {
        *self = Self {
            started: Some(now),
            ..Self::default()
        };
    }

    pub fn pause(&mut self, now: Instant) {
        if self.started.is_some() && self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(paused_at);
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        let Some(started) = self.started else {
            return Duration::ZERO;
        };
        let until = self.paused_at.unwrap_or(now);
        until
            .saturating_duration_since(started)
            .saturating_sub(self.paused_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unstarted_stopwatch_reads_zero() {
        let stopwatch = Stopwatch::default();
        assert_eq!(stopwatch.elapsed(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn paused_time_is_not_counted() {
        let t0 = Instant::now();
        let mut stopwatch = Stopwatch::default();
        stopwatch.start(t0);

        stopwatch.pause(t0 + Duration::from_secs(60));
        assert_eq!(
            stopwatch.elapsed(t0 + Duration::from_secs(500)),
            Duration::from_secs(60)
        );

        stopwatch.resume(t0 + Duration::from_secs(600));
        assert_eq!(
            stopwatch.elapsed(t0 + Duration::from_secs(630)),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn repeated_pause_keeps_first_instant() {
        let t0 = Instant::now();
        let mut stopwatch = Stopwatch::default();
        stopwatch.start(t0);
        stopwatch.pause(t0 + Duration::from_secs(10));
        stopwatch.pause(t0 + Duration::from_secs(20));
        stopwatch.resume(t0 + Duration::from_secs(30));
        assert_eq!(
            stopwatch.elapsed(t0 + Duration::from_secs(30)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn state_displays_lowercase() {
        assert_eq!(SessionState::Completed.to_string(), "completed");
        assert!(SessionState::Paused.is_running());
        assert!(!SessionState::Setup.is_running());
    }
}
