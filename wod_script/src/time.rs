//! Millisecond time primitives shared by the model and the runtime.

use std::fmt::{Display, Formatter};
use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

/// A wall-clock instant in milliseconds since the UNIX epoch.
///
/// The runtime's `Clock` is the only producer of these; everything downstream
/// (spans, outputs, snapshots) just carries them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct EpochMs(pub u64);

impl EpochMs {
    /// Milliseconds elapsed since `earlier`, saturating to zero if `earlier`
    /// is in the future.
    pub fn since(self, earlier: EpochMs) -> DurationMs {
        DurationMs(self.0.saturating_sub(earlier.0))
    }
}

impl Add<DurationMs> for EpochMs {
    type Output = EpochMs;

    fn add(self, rhs: DurationMs) -> EpochMs {
        EpochMs(self.0 + rhs.0)
    }
}

impl AddAssign<DurationMs> for EpochMs {
    fn add_assign(&mut self, rhs: DurationMs) {
        self.0 += rhs.0;
    }
}

impl Sub<EpochMs> for EpochMs {
    type Output = DurationMs;

    fn sub(self, rhs: EpochMs) -> DurationMs {
        self.since(rhs)
    }
}

impl Display for EpochMs {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A span length in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct DurationMs(pub u64);

impl DurationMs {
    /// Zero-length duration.
    pub const ZERO: DurationMs = DurationMs(0);

    /// From whole seconds.
    pub const fn from_secs(secs: u64) -> DurationMs {
        DurationMs(secs * 1_000)
    }

    /// Saturating subtraction.
    pub fn saturating_sub(self, rhs: DurationMs) -> DurationMs {
        DurationMs(self.0.saturating_sub(rhs.0))
    }

    /// True when zero.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add<DurationMs> for DurationMs {
    type Output = DurationMs;

    fn add(self, rhs: DurationMs) -> DurationMs {
        DurationMs(self.0 + rhs.0)
    }
}

impl AddAssign<DurationMs> for DurationMs {
    fn add_assign(&mut self, rhs: DurationMs) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for DurationMs {
    fn sum<I: Iterator<Item = DurationMs>>(iter: I) -> DurationMs {
        iter.fold(DurationMs::ZERO, Add::add)
    }
}

impl Display for DurationMs {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<DurationMs> for std::time::Duration {
    fn from(value: DurationMs) -> Self {
        std::time::Duration::from_millis(value.0)
    }
}

/// A start/stop interval. Open (`ended == None`) while running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    /// When the span was opened.
    pub started: EpochMs,
    /// When the span was closed, if it has been.
    pub ended: Option<EpochMs>,
}

impl TimeSpan {
    /// Opens a new span at `started`.
    pub fn open_at(started: EpochMs) -> TimeSpan {
        TimeSpan {
            started,
            ended: None,
        }
    }

    /// A closed span.
    pub fn closed(started: EpochMs, ended: EpochMs) -> TimeSpan {
        TimeSpan {
            started,
            ended: Some(ended),
        }
    }

    /// True while the span has not been closed.
    pub fn is_open(&self) -> bool {
        self.ended.is_none()
    }

    /// Closes the span at `at`. Closing an already-closed span keeps the
    /// original end.
    pub fn close(&mut self, at: EpochMs) {
        self.ended.get_or_insert(at);
    }

    /// Length of the span, using `now` as the end for open spans.
    pub fn duration(&self, now: EpochMs) -> DurationMs {
        self.ended.unwrap_or(now).since(self.started)
    }
}

/// Whether a timer counts up from zero or down from its duration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerDirection {
    /// Stopwatch: counts elapsed time up from zero.
    #[default]
    Up,
    /// Countdown: counts remaining time down from a fixed duration.
    Down,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_duration_open_and_closed() {
        let mut span = TimeSpan::open_at(EpochMs(1_000));
        assert!(span.is_open());
        assert_eq!(span.duration(EpochMs(4_000)), DurationMs(3_000));

        span.close(EpochMs(2_500));
        assert!(!span.is_open());
        // `now` is ignored once closed.
        assert_eq!(span.duration(EpochMs(9_999)), DurationMs(1_500));

        // Re-closing keeps the original end.
        span.close(EpochMs(3_000));
        assert_eq!(span.ended, Some(EpochMs(2_500)));
    }

    #[test]
    fn epoch_arithmetic_saturates() {
        assert_eq!(EpochMs(500).since(EpochMs(2_000)), DurationMs::ZERO);
        assert_eq!(EpochMs(2_000) - EpochMs(500), DurationMs(1_500));
        assert_eq!(EpochMs(500) + DurationMs::from_secs(1), EpochMs(1_500));
    }
}
