//! The idle gate: nothing runs until the user starts the session.

use crate::action::Action;
use crate::block::{Behavior, BehaviorContext, CompletionReason};
use crate::event::{Event, EventKind, HandlerResponse, HandlerScope};
use crate::jit;
use crate::ui::WorkoutState;

/// Root-mount injector: pushes an idle-gate block on top of the root so the
/// first child cannot dispatch before `start`.
#[derive(Debug)]
pub struct WaitingToStartInjectorBehavior;

impl Behavior for WaitingToStartInjectorBehavior {
    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        let key = ctx.alloc_key();
        vec![
            Action::SetWorkoutState {
                state: WorkoutState::Idle,
            },
            Action::PushBlock {
                block: jit::idle_gate_block(key),
            },
        ]
    }
}

/// The gate itself: sits on top until `start`, then completes, flips the
/// workout to running, and opens every waiting span (the root stopwatch).
#[derive(Debug)]
pub struct IdleGateBehavior;

impl Behavior for IdleGateBehavior {
    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        ctx.set_display_label("Ready");
        ctx.register_handler(EventKind::Start, HandlerScope::Active);
        Vec::new()
    }

    fn on_event(&mut self, event: &Event, ctx: &mut BehaviorContext<'_>) -> Option<HandlerResponse> {
        if event.kind != EventKind::Start || ctx.is_complete() {
            return None;
        }
        ctx.mark_complete(CompletionReason::UserAdvanced);
        Some(HandlerResponse::handled(vec![
            Action::SetWorkoutState {
                state: WorkoutState::Running,
            },
            Action::StartAllSpans,
        ]))
    }
}
