//! Timer behavior: span bookkeeping and countdown completion.

use wod_script::{DurationMs, TimerDirection};

use crate::action::Action;
use crate::block::{BehaviorContext, Behavior, CompletionReason};
use crate::event::{Event, EventKind, HandlerResponse, HandlerScope};
use crate::memory::{MemoryTag, MemoryValue, TimerRole, TimerState};

/// Configuration of one timer.
#[derive(Clone, Debug)]
pub struct TimerConfig {
    /// Count direction.
    pub direction: TimerDirection,
    /// Countdown duration; `None` for a stopwatch.
    pub duration_ms: Option<DurationMs>,
    /// Display label.
    pub label: Option<String>,
    /// UI surface.
    pub role: TimerRole,
    /// Open the first span at mount instead of waiting for `start`.
    pub auto_start: bool,
}

impl TimerConfig {
    /// An auto-starting countdown.
    pub fn countdown(duration_ms: DurationMs) -> TimerConfig {
        TimerConfig {
            direction: TimerDirection::Down,
            duration_ms: Some(duration_ms),
            label: None,
            role: TimerRole::Primary,
            auto_start: true,
        }
    }

    /// A stopwatch that waits for `start`.
    pub fn stopwatch() -> TimerConfig {
        TimerConfig {
            direction: TimerDirection::Up,
            duration_ms: None,
            label: None,
            role: TimerRole::Auto,
            auto_start: false,
        }
    }

    /// Sets the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> TimerConfig {
        self.label = Some(label.into());
        self
    }

    /// Sets the UI surface role.
    pub fn with_role(mut self, role: TimerRole) -> TimerConfig {
        self.role = role;
        self
    }

    /// Sets whether the first span opens at mount.
    pub fn with_auto_start(mut self, auto_start: bool) -> TimerConfig {
        self.auto_start = auto_start;
        self
    }
}

/// Owns the block's `timer` memory and answers the clock-control events.
///
/// Registered in `block` scope: a parent AMRAP countdown keeps counting (and
/// expiring) while a child effort holds the top of the stack.
#[derive(Debug)]
pub struct TimerBehavior {
    config: TimerConfig,
}

impl TimerBehavior {
    /// A behavior from the given config.
    pub fn new(config: TimerConfig) -> TimerBehavior {
        TimerBehavior { config }
    }

    fn write_back(ctx: &mut BehaviorContext<'_>, timer: TimerState) {
        ctx.update_memory(MemoryTag::Timer, MemoryValue::Timer(timer));
    }

    /// Closes the span at the exact expiry instant and completes the block.
    /// Returns true when expiry fired.
    fn check_expiry(ctx: &mut BehaviorContext<'_>, timer: &mut TimerState) -> bool {
        if timer.direction != TimerDirection::Down || !timer.is_running() {
            return false;
        }
        let now = ctx.now();
        let Some(expiry) = timer.expiry_instant(now) else {
            return false;
        };
        if expiry > now {
            return false;
        }
        timer.close_span(expiry);
        ctx.mark_complete(CompletionReason::TimerExpired);
        true
    }
}

impl Behavior for TimerBehavior {
    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        let mut timer = TimerState::new(self.config.direction, self.config.duration_ms);
        timer.label = self.config.label.clone();
        timer.role = self.config.role;
        if self.config.auto_start {
            timer.open_span(ctx.now());
        }
        ctx.push_memory(MemoryTag::Timer, MemoryValue::Timer(timer));

        for kind in [
            EventKind::Start,
            EventKind::Stop,
            EventKind::Pause,
            EventKind::TimerPause,
            EventKind::Resume,
            EventKind::Tick,
        ] {
            ctx.register_handler(kind, HandlerScope::Block);
        }

        vec![Action::PushTimerDisplay {
            source: ctx.key(),
            label: self.config.label.clone(),
            role: self.config.role,
        }]
    }

    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if ctx.is_complete() {
            return Vec::new();
        }
        // Catch expiry even when the tick that crossed zero was missed.
        if let Some(mut timer) = ctx.get_memory::<TimerState>(&MemoryTag::Timer) {
            if Self::check_expiry(ctx, &mut timer) {
                Self::write_back(ctx, timer);
            }
        }
        Vec::new()
    }

    fn on_unmount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if let Some(mut timer) = ctx.get_memory::<TimerState>(&MemoryTag::Timer) {
            if timer.is_running() {
                timer.close_span(ctx.now());
                Self::write_back(ctx, timer);
            }
        }
        vec![Action::PopTimerDisplay { source: ctx.key() }]
    }

    fn on_event(&mut self, event: &Event, ctx: &mut BehaviorContext<'_>) -> Option<HandlerResponse> {
        let mut timer = ctx.get_memory::<TimerState>(&MemoryTag::Timer)?;
        let now = ctx.now();

        match event.kind {
            EventKind::Start | EventKind::Resume => {
                if timer.is_running() || timer.is_expired(now) {
                    return Some(HandlerResponse::ignored());
                }
                timer.open_span(now);
                Self::write_back(ctx, timer);
                Some(HandlerResponse::handled(Vec::new()))
            }
            EventKind::Stop | EventKind::Pause | EventKind::TimerPause => {
                if !timer.is_running() {
                    return Some(HandlerResponse::ignored());
                }
                timer.close_span(now);
                Self::write_back(ctx, timer);
                Some(HandlerResponse::handled(Vec::new()))
            }
            EventKind::Tick => {
                if Self::check_expiry(ctx, &mut timer) {
                    Self::write_back(ctx, timer);
                    Some(HandlerResponse::handled(Vec::new()))
                } else {
                    Some(HandlerResponse::ignored())
                }
            }
            _ => None,
        }
    }
}
