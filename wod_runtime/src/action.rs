//! Actions: the only way behaviors and handlers change the runtime.
//!
//! Every action is a tagged variant with a fixed [`Phase`]; the processor
//! drains phases in a strict order so the UI sees updates before memory
//! mutations land, memory lands before side effects read it, events fire on
//! coherent state, and stack mutations always come last.

use serde::{Deserialize, Serialize};
use wod_script::{DurationMs, Fragment, StatementId, TimeSpan};

use crate::block::{Block, BlockKey};
use crate::event::Event;
use crate::memory::{MemoryTag, MemoryValue, TimerRole};
use crate::output::OutputKind;
use crate::ui::{ActionPanel, ButtonDef, DisplayMode, WorkoutState};

/// Execution phase of an action. Ordering is the whole point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// UI display mutations.
    Display,
    /// Cross-block memory writes.
    Memory,
    /// Outputs, buttons, span control, workout state.
    SideEffect,
    /// Event publication.
    Event,
    /// Stack push/pop/compile.
    Stack,
}

impl Phase {
    /// All phases, in drain order.
    pub const ALL: [Phase; 5] = [
        Phase::Display,
        Phase::Memory,
        Phase::SideEffect,
        Phase::Event,
        Phase::Stack,
    ];
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Display => "display",
            Phase::Memory => "memory",
            Phase::SideEffect => "side_effect",
            Phase::Event => "event",
            Phase::Stack => "stack",
        };
        f.write_str(name)
    }
}

/// The stable set of runtime actions.
#[derive(Debug)]
pub enum Action {
    // -- display phase --
    /// Replace the "up next" preview fragments.
    UpdateNextPreview {
        /// Fragments describing the upcoming segment.
        fragments: Vec<Fragment>,
    },
    /// Add a timer surface for a block.
    PushTimerDisplay {
        /// Owning block.
        source: BlockKey,
        /// Display label.
        label: Option<String>,
        /// Surface role.
        role: TimerRole,
    },
    /// Remove a block's timer surface.
    PopTimerDisplay {
        /// Owning block.
        source: BlockKey,
    },
    /// Add a display card for a block.
    PushCardDisplay {
        /// Owning block.
        source: BlockKey,
        /// Resolved fragments to render.
        fragments: Vec<Fragment>,
    },
    /// Remove a block's display card.
    PopCardDisplay {
        /// Owning block.
        source: BlockKey,
    },
    /// Switch the preferred layout.
    UpdateDisplayMode {
        /// New mode.
        mode: DisplayMode,
    },

    // -- memory phase --
    /// Write into another block's memory (first slot with the tag).
    SetMemory {
        /// Target block.
        block: BlockKey,
        /// Target slot tag.
        tag: MemoryTag,
        /// New value.
        value: MemoryValue,
    },

    // -- side-effect phase --
    /// Set the coarse workout phase.
    SetWorkoutState {
        /// New state.
        state: WorkoutState,
    },
    /// Add a pressable control.
    RegisterButton {
        /// The control.
        button: ButtonDef,
    },
    /// Remove all controls owned by a block.
    ClearButtons {
        /// Owning block.
        source: BlockKey,
    },
    /// Add a button panel.
    PushActionPanel {
        /// The panel.
        panel: ActionPanel,
    },
    /// Remove a block's button panel.
    PopActionPanel {
        /// Owning block.
        source: BlockKey,
    },
    /// Replace a block's button panel.
    UpdateActionPanel {
        /// The replacement panel.
        panel: ActionPanel,
    },
    /// Open a span on every stopped timer on the stack.
    StartAllSpans,
    /// Close the open span on every running timer on the stack.
    StopAllSpans,
    /// Append an output statement.
    EmitOutput {
        /// Entry kind.
        kind: OutputKind,
        /// Producing block.
        source: BlockKey,
        /// Stack depth of the producing block at emit time.
        stack_level: usize,
        /// Covered time, if any.
        span: Option<TimeSpan>,
        /// Fragment groups.
        fragments: Vec<Vec<Fragment>>,
    },

    // -- event phase --
    /// Publish an event through the bus.
    Publish {
        /// The event.
        event: Event,
    },

    // -- stack phase --
    /// Push an already-built block (idle gates).
    PushBlock {
        /// The block.
        block: Block,
    },
    /// Pop the top block, or a specific block if it is on top.
    PopBlock {
        /// Expected key; `None` pops whatever is on top.
        key: Option<BlockKey>,
    },
    /// Compile statements into a child block and push it.
    CompileChild {
        /// Requesting (parent) block.
        parent: BlockKey,
        /// Statements to compile as one block.
        statements: Vec<StatementId>,
    },
    /// Build and push a rest countdown.
    PushRestBlock {
        /// Requesting (parent) block.
        parent: BlockKey,
        /// Countdown length.
        duration_ms: DurationMs,
        /// Display label.
        label: String,
    },
}

impl Action {
    /// The action's fixed phase.
    pub fn phase(&self) -> Phase {
        match self {
            Action::UpdateNextPreview { .. }
            | Action::PushTimerDisplay { .. }
            | Action::PopTimerDisplay { .. }
            | Action::PushCardDisplay { .. }
            | Action::PopCardDisplay { .. }
            | Action::UpdateDisplayMode { .. } => Phase::Display,

            Action::SetMemory { .. } => Phase::Memory,

            Action::SetWorkoutState { .. }
            | Action::RegisterButton { .. }
            | Action::ClearButtons { .. }
            | Action::PushActionPanel { .. }
            | Action::PopActionPanel { .. }
            | Action::UpdateActionPanel { .. }
            | Action::StartAllSpans
            | Action::StopAllSpans
            | Action::EmitOutput { .. } => Phase::SideEffect,

            Action::Publish { .. } => Phase::Event,

            Action::PushBlock { .. }
            | Action::PopBlock { .. }
            | Action::CompileChild { .. }
            | Action::PushRestBlock { .. } => Phase::Stack,
        }
    }

    /// Stable wire name of the action type.
    pub fn name(&self) -> &'static str {
        match self {
            Action::UpdateNextPreview { .. } => "update-next-preview",
            Action::PushTimerDisplay { .. } => "push-timer-display",
            Action::PopTimerDisplay { .. } => "pop-timer-display",
            Action::PushCardDisplay { .. } => "push-card-display",
            Action::PopCardDisplay { .. } => "pop-card-display",
            Action::UpdateDisplayMode { .. } => "update-display-mode",
            Action::SetMemory { .. } => "set-memory",
            Action::SetWorkoutState { .. } => "set-workout-state",
            Action::RegisterButton { .. } => "register-button",
            Action::ClearButtons { .. } => "clear-buttons",
            Action::PushActionPanel { .. } => "push-actions",
            Action::PopActionPanel { .. } => "pop-actions",
            Action::UpdateActionPanel { .. } => "update-actions",
            Action::StartAllSpans => "start-all-spans",
            Action::StopAllSpans => "stop-all-spans",
            Action::EmitOutput { .. } => "emit-output",
            Action::Publish { .. } => "publish-event",
            Action::PushBlock { .. } => "push-block",
            Action::PopBlock { .. } => "pop-block",
            Action::CompileChild { .. } => "compile-child-block",
            Action::PushRestBlock { .. } => "push-rest-block",
        }
    }
}
