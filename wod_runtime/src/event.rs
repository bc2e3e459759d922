//! Events and handler registration scopes.
//!
//! The event vocabulary is frozen at build time: [`EventKind`] is a closed
//! enum rather than open strings, so a typo'd event name is a compile error.

use serde::{Deserialize, Serialize};
use wod_script::EpochMs;

use crate::action::Action;

/// The stable set of event names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Begin the session / open timer spans.
    Start,
    /// Close timer spans without completing anything.
    Stop,
    /// Pause running timers.
    Pause,
    /// Resume paused timers.
    Resume,
    /// Re-arm a finished session.
    Reset,
    /// Abandon the current top block.
    Skip,
    /// Advance the current leaf.
    Next,
    /// Complete the current leaf.
    Complete,
    /// Clock cadence while anything is running.
    Tick,
    /// Pause only the timer layer.
    TimerPause,
    /// End the whole workout.
    WorkoutStop,
    /// A block was pushed (published by the session).
    StackPush,
    /// A block was popped (published by the session).
    StackPop,
    /// The stack was cleared (published by the session).
    StackClear,
    /// A memory location was allocated (published by the session).
    MemoryAllocate,
    /// External write into a block's display memory.
    MemorySet,
    /// A block's memory was released (published by the session).
    MemoryRelease,
}

impl EventKind {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Stop => "stop",
            EventKind::Pause => "pause",
            EventKind::Resume => "resume",
            EventKind::Reset => "reset",
            EventKind::Skip => "skip",
            EventKind::Next => "next",
            EventKind::Complete => "complete",
            EventKind::Tick => "tick",
            EventKind::TimerPause => "timer:pause",
            EventKind::WorkoutStop => "workout:stop",
            EventKind::StackPush => "stack:push",
            EventKind::StackPop => "stack:pop",
            EventKind::StackClear => "stack:clear",
            EventKind::MemoryAllocate => "memory:allocate",
            EventKind::MemorySet => "memory:set",
            EventKind::MemoryRelease => "memory:release",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Which event this is.
    pub kind: EventKind,
    /// When it was published, per the session clock.
    pub timestamp: EpochMs,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    /// An event with no payload.
    pub fn new(kind: EventKind, timestamp: EpochMs) -> Event {
        Event {
            kind,
            timestamp,
            data: None,
        }
    }

    /// An event with a structured payload.
    pub fn with_data(kind: EventKind, timestamp: EpochMs, data: serde_json::Value) -> Event {
        Event {
            kind,
            timestamp,
            data: Some(data),
        }
    }
}

/// Where a handler registration is visible from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerScope {
    /// Fires for every matching event.
    Global,
    /// Fires only while the owning block is the top of the stack.
    Active,
    /// Fires while the owning block is anywhere on the stack.
    Block,
}

/// What a handler did with an event. Replaces exception-based cancel flow:
/// `should_continue = false` stops later handlers for this event.
#[derive(Debug)]
pub struct HandlerResponse {
    /// The handler recognized and consumed the event.
    pub handled: bool,
    /// Whether later handlers should still fire.
    pub should_continue: bool,
    /// Actions to queue on the processor.
    pub actions: Vec<Action>,
}

impl HandlerResponse {
    /// Handled, later handlers still fire.
    pub fn handled(actions: Vec<Action>) -> HandlerResponse {
        HandlerResponse {
            handled: true,
            should_continue: true,
            actions,
        }
    }

    /// Handled and the event is consumed: no later handlers.
    pub fn consumed(actions: Vec<Action>) -> HandlerResponse {
        HandlerResponse {
            handled: true,
            should_continue: false,
            actions,
        }
    }

    /// Not interested.
    pub fn ignored() -> HandlerResponse {
        HandlerResponse {
            handled: false,
            should_continue: true,
            actions: Vec::new(),
        }
    }
}
