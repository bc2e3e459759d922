//! UI-facing display state, mutated only by display/side-effect actions.
//!
//! This is the session's model of what a renderer should show: which timers
//! are on screen, which cards, which controls. The renderer subscribes and
//! redraws; it never writes back except through events.

use serde::{Deserialize, Serialize};
use wod_script::Fragment;

use crate::block::BlockKey;
use crate::event::EventKind;
use crate::memory::TimerRole;

/// A pressable control bound to an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ButtonDef {
    /// Stable id (`"start"`, `"done"`, ...).
    pub id: String,
    /// Display label.
    pub label: String,
    /// Event published when pressed.
    pub event: EventKind,
    /// Block that registered the button.
    pub source: BlockKey,
}

/// A group of buttons owned by one block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionPanel {
    /// Owning block.
    pub source: BlockKey,
    /// Buttons in display order.
    pub buttons: Vec<ButtonDef>,
}

/// One timer surface on screen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimerDisplay {
    /// Block whose `timer` memory feeds this surface.
    pub source: BlockKey,
    /// Display label.
    pub label: Option<String>,
    /// Which surface.
    pub role: TimerRole,
}

/// One card of display fragments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CardDisplay {
    /// Owning block.
    pub source: BlockKey,
    /// Resolved fragments to render.
    pub fragments: Vec<Fragment>,
}

/// Coarse workout phase, for chrome-level UI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkoutState {
    /// Waiting for the user to start.
    #[default]
    Idle,
    /// Clock running.
    Running,
    /// Paused by the user.
    Paused,
    /// Finished.
    Done,
}

/// Which layout the renderer should prefer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Timers and cards together.
    #[default]
    Combined,
    /// Timer-dominant layout.
    Timer,
    /// Card-dominant layout.
    Cards,
}

/// The full renderable state. Cheap to clone; published to subscribers after
/// any drain that changed it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UiState {
    /// Timer surfaces, bottom-up (last pushed renders on top).
    pub timers: Vec<TimerDisplay>,
    /// Display cards, bottom-up.
    pub cards: Vec<CardDisplay>,
    /// Button panels, bottom-up.
    pub panels: Vec<ActionPanel>,
    /// Flat button registry (press routing).
    pub buttons: Vec<ButtonDef>,
    /// Coarse workout phase.
    pub workout_state: WorkoutState,
    /// Preferred layout.
    pub display_mode: DisplayMode,
    /// Fragments describing the upcoming segment.
    pub next_preview: Vec<Fragment>,
    #[serde(skip)]
    dirty: bool,
}

impl UiState {
    pub(crate) fn push_timer(&mut self, display: TimerDisplay) {
        self.timers.push(display);
        self.dirty = true;
    }

    pub(crate) fn pop_timer(&mut self, source: BlockKey) {
        self.timers.retain(|t| t.source != source);
        self.dirty = true;
    }

    pub(crate) fn push_card(&mut self, card: CardDisplay) {
        self.cards.push(card);
        self.dirty = true;
    }

    pub(crate) fn pop_card(&mut self, source: BlockKey) {
        self.cards.retain(|c| c.source != source);
        self.dirty = true;
    }

    pub(crate) fn push_panel(&mut self, panel: ActionPanel) {
        self.panels.push(panel);
        self.dirty = true;
    }

    pub(crate) fn pop_panel(&mut self, source: BlockKey) {
        self.panels.retain(|p| p.source != source);
        self.dirty = true;
    }

    pub(crate) fn update_panel(&mut self, panel: ActionPanel) {
        match self.panels.iter_mut().find(|p| p.source == panel.source) {
            Some(existing) => *existing = panel,
            None => self.panels.push(panel),
        }
        self.dirty = true;
    }

    pub(crate) fn register_button(&mut self, button: ButtonDef) {
        // Last registration for an id wins; press routing stays unambiguous.
        self.buttons.retain(|b| b.id != button.id || b.source != button.source);
        self.buttons.push(button);
        self.dirty = true;
    }

    pub(crate) fn clear_buttons(&mut self, source: BlockKey) {
        self.buttons.retain(|b| b.source != source);
        self.dirty = true;
    }

    pub(crate) fn set_workout_state(&mut self, state: WorkoutState) {
        if self.workout_state != state {
            self.workout_state = state;
            self.dirty = true;
        }
    }

    pub(crate) fn set_display_mode(&mut self, mode: DisplayMode) {
        if self.display_mode != mode {
            self.display_mode = mode;
            self.dirty = true;
        }
    }

    pub(crate) fn set_next_preview(&mut self, fragments: Vec<Fragment>) {
        self.next_preview = fragments;
        self.dirty = true;
    }

    /// Finds a button by id, preferring the most recent registration.
    pub fn button(&self, id: &str) -> Option<&ButtonDef> {
        self.buttons.iter().rev().find(|b| b.id == id)
    }

    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
