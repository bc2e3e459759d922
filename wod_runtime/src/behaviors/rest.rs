//! Rest insertion between AMRAP passes.

use wod_script::DurationMs;

use crate::action::Action;
use crate::block::{Behavior, BehaviorContext};
use crate::memory::{ChildrenStatus, MemoryTag, MemoryValue, TimerState};

const REST_PENDING: MemoryTag = MemoryTag::Handler(std::borrow::Cow::Borrowed("rest"));

/// Pushes a rest countdown after a finished pass while enough countdown time
/// remains, then marks the pass as rested so the selection resumes.
///
/// Must be composed *before* the child-selection behavior: the pending flag it
/// clears has to be visible to the selection later in the same cycle.
#[derive(Debug)]
pub struct RestBlockBehavior {
    min_rest_ms: DurationMs,
}

impl RestBlockBehavior {
    /// Rest only when more than `min_rest_ms` of countdown remains.
    pub fn new(min_rest_ms: DurationMs) -> RestBlockBehavior {
        RestBlockBehavior { min_rest_ms }
    }
}

impl Behavior for RestBlockBehavior {
    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        ctx.push_memory(REST_PENDING, MemoryValue::Flag(false));
        Vec::new()
    }

    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if ctx.is_complete() {
            return Vec::new();
        }
        let pending = ctx.get_memory::<bool>(&REST_PENDING).unwrap_or(false);
        let Some(mut status) = ctx.get_memory::<ChildrenStatus>(&MemoryTag::ChildrenStatus) else {
            return Vec::new();
        };

        if pending {
            // The rest block we pushed has popped; the pass is rested.
            ctx.update_memory(REST_PENDING, MemoryValue::Flag(false));
            status.rest_taken = true;
            ctx.update_memory(MemoryTag::ChildrenStatus, MemoryValue::Children(status));
            return Vec::new();
        }

        if !status.all_executed || status.all_completed || status.rest_taken {
            return Vec::new();
        }
        let Some(remaining) = ctx
            .get_memory::<TimerState>(&MemoryTag::Timer)
            .and_then(|timer| timer.remaining(ctx.now()))
        else {
            return Vec::new();
        };
        if remaining.is_zero() || remaining <= self.min_rest_ms {
            return Vec::new();
        }

        ctx.update_memory(REST_PENDING, MemoryValue::Flag(true));
        vec![Action::PushRestBlock {
            parent: ctx.key(),
            duration_ms: remaining,
            label: "Rest".to_string(),
        }]
    }
}
