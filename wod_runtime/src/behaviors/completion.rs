//! Completion behaviors: user advancement for leaves, children-done for
//! containers.

use wod_script::Fragment;

use crate::action::Action;
use crate::block::{Behavior, BehaviorContext, CompletionReason};
use crate::event::{Event, EventKind, HandlerResponse, HandlerScope};
use crate::memory::{ChildrenStatus, MemoryTag, MemoryValue};

/// Marks a leaf block complete when the user advances (`complete` / `next`).
/// Active scope: only the top block answers the advance controls.
#[derive(Debug)]
pub struct CompletionBehavior;

impl Behavior for CompletionBehavior {
    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        ctx.register_handler(EventKind::Complete, HandlerScope::Active);
        ctx.register_handler(EventKind::Next, HandlerScope::Active);
        Vec::new()
    }

    fn on_event(&mut self, event: &Event, ctx: &mut BehaviorContext<'_>) -> Option<HandlerResponse> {
        if !matches!(event.kind, EventKind::Complete | EventKind::Next) || ctx.is_complete() {
            return None;
        }
        // Record the achieved reps: the per-round target if one was
        // inherited, otherwise whatever the display prescribes.
        let achieved: Vec<Fragment> = ctx
            .get_memory::<Vec<Fragment>>(&MemoryTag::FragmentRepTarget)
            .filter(|fragments| !fragments.is_empty())
            .unwrap_or_else(|| {
                ctx.display_view()
                    .all_by_kind(wod_script::FragmentKind::Rep)
            });
        if !achieved.is_empty() {
            let tracked = achieved
                .into_iter()
                .map(|fragment| Fragment::runtime(fragment.value))
                .collect();
            ctx.set_memory(MemoryTag::FragmentTracked, MemoryValue::Fragments(tracked));
        }
        ctx.mark_complete(CompletionReason::UserAdvanced);
        Some(HandlerResponse::handled(Vec::new()))
    }
}

/// Completes a container once every child group has executed, when no loop or
/// round scheme keeps it alive. The root uses this as session completion.
#[derive(Debug)]
pub struct ChildrenCompletionBehavior;

impl Behavior for ChildrenCompletionBehavior {
    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if ctx.is_complete() {
            return Vec::new();
        }
        let Some(status) = ctx.get_memory::<ChildrenStatus>(&MemoryTag::ChildrenStatus) else {
            return Vec::new();
        };
        if status.all_executed && !status.all_completed {
            let mut status = status;
            status.all_completed = true;
            ctx.update_memory(MemoryTag::ChildrenStatus, MemoryValue::Children(status));
            ctx.mark_complete(CompletionReason::ChildrenDone);
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use wod_script::{FragmentValue, Origin};

    use super::*;

    #[test]
    fn tracked_fragments_are_runtime_origin() {
        let fragment = Fragment::runtime(FragmentValue::Rep(21));
        assert_eq!(fragment.origin, Origin::Runtime);
    }
}
