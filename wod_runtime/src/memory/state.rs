//! Typed values held in behavior-state memory slots.

use serde::{Deserialize, Serialize};
use wod_script::{DurationMs, EpochMs, TimeSpan, TimerDirection};

/// Which timer surface a timer feeds on the UI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerRole {
    /// The main clock.
    Primary,
    /// A secondary clock (e.g. a rest countdown under the main clock).
    Secondary,
    /// Let the UI decide based on stack position.
    #[default]
    Auto,
}

/// State of one timer, held under the `timer` tag.
///
/// Invariants: every span before the last is closed; the timer is running iff
/// the last span is open.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerState {
    /// Count direction.
    pub direction: TimerDirection,
    /// Countdown duration; `None` for an open-ended stopwatch.
    pub duration_ms: Option<DurationMs>,
    /// Recorded start/stop spans, oldest first.
    pub spans: Vec<TimeSpan>,
    /// Display label.
    pub label: Option<String>,
    /// UI surface.
    pub role: TimerRole,
}

impl TimerState {
    /// A stopped timer with no recorded spans.
    pub fn new(direction: TimerDirection, duration_ms: Option<DurationMs>) -> TimerState {
        TimerState {
            direction,
            duration_ms,
            ..Default::default()
        }
    }

    /// True while the last span is open.
    pub fn is_running(&self) -> bool {
        self.spans.last().is_some_and(TimeSpan::is_open)
    }

    /// Opens a new span at `at`. No-op while already running.
    pub fn open_span(&mut self, at: EpochMs) {
        if !self.is_running() {
            self.spans.push(TimeSpan::open_at(at));
        }
    }

    /// Closes the open span at `at`. No-op while stopped.
    pub fn close_span(&mut self, at: EpochMs) {
        if let Some(last) = self.spans.last_mut() {
            last.close(at);
        }
    }

    /// Total accumulated time across all spans.
    pub fn elapsed(&self, now: EpochMs) -> DurationMs {
        self.spans.iter().map(|span| span.duration(now)).sum()
    }

    /// Remaining countdown time; `None` for stopwatches.
    pub fn remaining(&self, now: EpochMs) -> Option<DurationMs> {
        self.duration_ms
            .map(|duration| duration.saturating_sub(self.elapsed(now)))
    }

    /// True once a countdown has consumed its whole duration.
    pub fn is_expired(&self, now: EpochMs) -> bool {
        self.remaining(now).is_some_and(DurationMs::is_zero) && self.duration_ms.is_some()
    }

    /// The instant the countdown hits zero, given the currently open span.
    /// `None` while stopped, already expired spans are fine.
    pub fn expiry_instant(&self, now: EpochMs) -> Option<EpochMs> {
        let duration = self.duration_ms?;
        let open = self.spans.last().filter(|span| span.is_open())?;
        let before: DurationMs = self
            .spans
            .iter()
            .filter(|span| !span.is_open())
            .map(|span| span.duration(now))
            .sum();
        Some(open.started + duration.saturating_sub(before))
    }
}

/// State of the round counter, held under the `round` tag.
///
/// Invariants: `current >= 1`; `current <= total` when `total` is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundState {
    /// 1-based current round.
    pub current: u32,
    /// Total rounds when bounded; `None` for AMRAP-style counting.
    pub total: Option<u32>,
}

impl RoundState {
    /// Round 1 of `total`.
    pub fn new(total: Option<u32>) -> RoundState {
        RoundState { current: 1, total }
    }

    /// True while a further round may run.
    pub fn has_remaining(&self) -> bool {
        self.total.is_none_or(|total| self.current < total)
    }

    /// True on the final round.
    pub fn is_final(&self) -> bool {
        self.total.is_some_and(|total| self.current >= total)
    }
}

/// Progress of a block's child dispatch, held under `children:status`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildrenStatus {
    /// Index of the next child group to dispatch.
    pub child_index: usize,
    /// Number of child groups.
    pub total_children: usize,
    /// The current pass has dispatched every group and each child finished.
    pub all_executed: bool,
    /// No further pass will run.
    pub all_completed: bool,
    /// Full passes finished so far.
    pub passes_completed: u32,
    /// A rest block already ran after the current pass.
    pub rest_taken: bool,
}

impl ChildrenStatus {
    /// Fresh status for `total_children` groups.
    pub fn new(total_children: usize) -> ChildrenStatus {
        ChildrenStatus {
            total_children,
            ..Default::default()
        }
    }

    /// Rewinds the cursor for another pass over the children.
    pub fn begin_pass(&mut self) {
        self.child_index = 0;
        self.all_executed = false;
        self.rest_taken = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_spans_accumulate() {
        let mut timer = TimerState::new(TimerDirection::Up, None);
        assert!(!timer.is_running());

        timer.open_span(EpochMs(0));
        assert!(timer.is_running());
        // Re-opening while running is a no-op.
        timer.open_span(EpochMs(5_000));
        assert_eq!(timer.spans.len(), 1);

        timer.close_span(EpochMs(10_000));
        timer.open_span(EpochMs(15_000));
        timer.close_span(EpochMs(25_000));

        assert_eq!(
            timer.spans,
            vec![
                TimeSpan::closed(EpochMs(0), EpochMs(10_000)),
                TimeSpan::closed(EpochMs(15_000), EpochMs(25_000)),
            ]
        );
        assert_eq!(timer.elapsed(EpochMs(30_000)), DurationMs(20_000));
        assert!(!timer.is_running());
    }

    #[test]
    fn countdown_expiry() {
        let mut timer = TimerState::new(TimerDirection::Down, Some(DurationMs::from_secs(60)));
        timer.open_span(EpochMs(1_000));

        assert_eq!(timer.remaining(EpochMs(31_000)), Some(DurationMs(30_000)));
        assert!(!timer.is_expired(EpochMs(31_000)));
        assert_eq!(timer.expiry_instant(EpochMs(31_000)), Some(EpochMs(61_000)));
        assert!(timer.is_expired(EpochMs(61_000)));

        // Pause eats wall time without consuming the countdown.
        timer.close_span(EpochMs(11_000));
        timer.open_span(EpochMs(20_000));
        assert_eq!(timer.expiry_instant(EpochMs(21_000)), Some(EpochMs(70_000)));
    }

    #[test]
    fn round_bounds() {
        let mut round = RoundState::new(Some(3));
        assert!(round.has_remaining());
        round.current = 3;
        assert!(!round.has_remaining());
        assert!(round.is_final());

        let open = RoundState::new(None);
        assert!(open.has_remaining());
        assert!(!open.is_final());
    }
}
