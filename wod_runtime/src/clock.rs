//! The time capability.
//!
//! Behaviors never read wall-clock time; they ask the session clock. The
//! production [`SystemClock`] feeds `Tick` events into the session's event
//! channel from local tokio tasks; the test [`ManualClock`] is advanced by
//! hand and emits nothing, so tests pump ticks explicitly and stay
//! deterministic.

use std::cell::Cell;
use std::rc::Rc;

use tokio::sync::mpsc::UnboundedSender;
use wod_script::{DurationMs, EpochMs};

use crate::event::{Event, EventKind};

/// Monotonic time source plus tick scheduling.
pub trait Clock {
    /// Current time.
    fn now(&self) -> EpochMs;

    /// Emits a single `Tick` after `delay`. The returned handle cancels on
    /// drop.
    fn schedule(&self, delay: DurationMs) -> ClockHandle;

    /// Emits a `Tick` every `period` until the handle is dropped.
    fn every(&self, period: DurationMs) -> ClockHandle;
}

/// Cancel capability for a scheduled tick source. Dropping cancels; cancel is
/// idempotent.
pub struct ClockHandle {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl ClockHandle {
    /// A handle with nothing to cancel (manual clocks).
    pub fn inert() -> ClockHandle {
        ClockHandle { cancel: None }
    }

    fn from_cancel(cancel: impl FnOnce() + 'static) -> ClockHandle {
        ClockHandle {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancels the underlying timer now.
    pub fn cancel(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for ClockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockHandle")
            .field("live", &self.cancel.is_some())
            .finish()
    }
}

/// Wall-clock epoch milliseconds.
pub(crate) fn wall_now() -> EpochMs {
    let since_epoch = web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .unwrap_or_default();
    EpochMs(since_epoch.as_millis() as u64)
}

/// Production clock: wall time plus tokio-driven tick tasks.
///
/// Tick tasks are spawned with `tokio::task::spawn_local`, so the session must
/// run inside a `LocalSet` (or a current-thread runtime driving one) — the
/// same single-threaded discipline the rest of the runtime assumes.
pub struct SystemClock {
    events: UnboundedSender<Event>,
}

impl SystemClock {
    /// A clock feeding `Tick` events into `events`.
    pub fn new(events: UnboundedSender<Event>) -> SystemClock {
        SystemClock { events }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> EpochMs {
        wall_now()
    }

    fn schedule(&self, delay: DurationMs) -> ClockHandle {
        let events = self.events.clone();
        let task = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay.into()).await;
            let _ = events.send(Event::new(EventKind::Tick, wall_now()));
        });
        ClockHandle::from_cancel(move || task.abort())
    }

    fn every(&self, period: DurationMs) -> ClockHandle {
        let events = self.events.clone();
        let task = tokio::task::spawn_local(async move {
            let mut interval = tokio::time::interval(period.into());
            // The immediate first tick would land before anything runs.
            interval.tick().await;
            loop {
                interval.tick().await;
                if events.send(Event::new(EventKind::Tick, wall_now())).is_err() {
                    break;
                }
            }
        });
        ClockHandle::from_cancel(move || task.abort())
    }
}

/// Test clock: time moves only when the test says so.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    /// Starts at epoch zero.
    pub fn new() -> ManualClock {
        ManualClock::default()
    }

    /// Starts at the given instant.
    pub fn starting_at(now: EpochMs) -> ManualClock {
        let clock = ManualClock::new();
        clock.set(now);
        clock
    }

    /// Current manual time. Inherent so callers don't need the [`Clock`]
    /// trait in scope.
    pub fn now(&self) -> EpochMs {
        EpochMs(self.now.get())
    }

    /// Moves time forward.
    pub fn advance(&self, by: DurationMs) {
        self.now.set(self.now.get() + by.0);
    }

    /// Jumps to an absolute instant.
    pub fn set(&self, now: EpochMs) {
        self.now.set(now.0);
    }

    /// A `Tick` event stamped with the current manual time.
    pub fn tick_event(&self) -> Event {
        Event::new(EventKind::Tick, self.now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> EpochMs {
        ManualClock::now(self)
    }

    fn schedule(&self, _delay: DurationMs) -> ClockHandle {
        ClockHandle::inert()
    }

    fn every(&self, _period: DurationMs) -> ClockHandle {
        ClockHandle::inert()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_through_clones() {
        let clock = ManualClock::new();
        let clone = clock.clone();
        clock.advance(DurationMs::from_secs(10));
        assert_eq!(clone.now(), EpochMs(10_000));
        assert_eq!(clone.tick_event().kind, EventKind::Tick);
    }

    #[test]
    fn inert_handle_cancel_is_idempotent() {
        let handle = ClockHandle::inert();
        handle.cancel();
        drop(ClockHandle::inert());
    }
}
