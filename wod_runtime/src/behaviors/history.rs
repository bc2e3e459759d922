//! Session-level history: workout stop handling and the final summary.

use wod_script::{Fragment, FragmentValue, TimeSpan};

use crate::action::Action;
use crate::block::{Behavior, BehaviorContext, CompletionReason};
use crate::event::{Event, EventKind, HandlerResponse, HandlerScope};
use crate::memory::{MemoryTag, TimerState};
use crate::output::OutputKind;
use crate::ui::WorkoutState;

/// Root-only: ends the session on `workout:stop` and writes the summary
/// metric when the root unmounts.
#[derive(Debug)]
pub struct HistoryRecordBehavior;

impl Behavior for HistoryRecordBehavior {
    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        ctx.register_handler(EventKind::WorkoutStop, HandlerScope::Block);
        Vec::new()
    }

    fn on_event(&mut self, event: &Event, ctx: &mut BehaviorContext<'_>) -> Option<HandlerResponse> {
        if event.kind != EventKind::WorkoutStop || ctx.is_complete() {
            return None;
        }
        ctx.mark_complete(CompletionReason::SessionEnded);
        Some(HandlerResponse::handled(vec![
            Action::StopAllSpans,
            Action::SetWorkoutState {
                state: WorkoutState::Done,
            },
        ]))
    }

    fn on_unmount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        let now = ctx.now();
        let started = ctx.started_at().unwrap_or(now);
        let elapsed = ctx
            .get_memory::<TimerState>(&MemoryTag::Timer)
            .map(|timer| timer.elapsed(now))
            .unwrap_or_else(|| now.since(started));

        vec![
            Action::EmitOutput {
                kind: OutputKind::Metric,
                source: ctx.key(),
                stack_level: ctx.stack_index(),
                span: Some(TimeSpan::closed(started, now)),
                fragments: vec![vec![
                    Fragment::runtime(FragmentValue::Label("Session".into())),
                    Fragment::runtime(FragmentValue::Elapsed(elapsed)),
                    Fragment::runtime(FragmentValue::SystemTime(now)),
                ]],
            },
            Action::SetWorkoutState {
                state: WorkoutState::Done,
            },
        ]
    }
}
