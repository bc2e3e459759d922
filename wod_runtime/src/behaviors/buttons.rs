//! Button wiring: which controls a block contributes while it is live.

use crate::action::Action;
use crate::block::{Behavior, BehaviorContext};
use crate::event::EventKind;
use crate::ui::{ActionPanel, ButtonDef};

/// A control before it is bound to its block.
#[derive(Clone, Debug)]
pub struct ButtonSpec {
    /// Stable id.
    pub id: &'static str,
    /// Display label.
    pub label: &'static str,
    /// Event published on press.
    pub event: EventKind,
}

const fn spec(id: &'static str, label: &'static str, event: EventKind) -> ButtonSpec {
    ButtonSpec { id, label, event }
}

/// Registers buttons and a panel at mount, clears both at unmount.
#[derive(Debug)]
pub struct ButtonBehavior {
    buttons: Vec<ButtonSpec>,
}

impl ButtonBehavior {
    /// A behavior contributing the given controls.
    pub fn new(buttons: Vec<ButtonSpec>) -> ButtonBehavior {
        ButtonBehavior { buttons }
    }

    /// The idle gate's only control.
    pub fn start_control() -> ButtonBehavior {
        ButtonBehavior::new(vec![spec("start", "Start", EventKind::Start)])
    }

    /// Session-wide controls on the root.
    pub fn session_controls() -> ButtonBehavior {
        ButtonBehavior::new(vec![
            spec("pause", "Pause", EventKind::Pause),
            spec("resume", "Resume", EventKind::Resume),
            spec("end", "End workout", EventKind::WorkoutStop),
        ])
    }

    /// Controls for a timed container.
    pub fn timer_controls() -> ButtonBehavior {
        ButtonBehavior::new(vec![
            spec("pause", "Pause", EventKind::Pause),
            spec("resume", "Resume", EventKind::Resume),
            spec("skip", "Skip", EventKind::Skip),
        ])
    }

    /// Controls for an effort or rest leaf.
    pub fn leaf_controls() -> ButtonBehavior {
        ButtonBehavior::new(vec![
            spec("done", "Done", EventKind::Complete),
            spec("skip", "Skip", EventKind::Skip),
        ])
    }

    fn bound(&self, ctx: &BehaviorContext<'_>) -> Vec<ButtonDef> {
        self.buttons
            .iter()
            .map(|button| ButtonDef {
                id: button.id.to_string(),
                label: button.label.to_string(),
                event: button.event,
                source: ctx.key(),
            })
            .collect()
    }
}

impl Behavior for ButtonBehavior {
    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        let buttons = self.bound(ctx);
        let mut actions: Vec<Action> = buttons
            .iter()
            .cloned()
            .map(|button| Action::RegisterButton { button })
            .collect();
        actions.push(Action::PushActionPanel {
            panel: ActionPanel {
                source: ctx.key(),
                buttons,
            },
        });
        actions
    }

    fn on_unmount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        vec![
            Action::ClearButtons { source: ctx.key() },
            Action::PopActionPanel { source: ctx.key() },
        ]
    }
}
