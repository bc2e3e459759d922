//! Sequential child dispatch with optional looping.

use wod_script::{DurationMs, Fragment, FragmentValue, StatementId};

use crate::action::Action;
use crate::block::{Behavior, BehaviorContext};
use crate::memory::{ChildrenStatus, MemoryTag, MemoryValue, RoundState, TimerState};

/// One dispatchable unit: the statements compiled together as a child block,
/// plus the fragments previewed as "up next" before it runs.
#[derive(Clone, Debug)]
pub struct ChildGroup {
    /// Statements to compile as one child block.
    pub statements: Vec<StatementId>,
    /// Label/effort fragments shown in the next-up preview.
    pub preview: Vec<Fragment>,
}

/// When a finished pass over the children starts another one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopCondition {
    /// One pass only; a completion behavior decides what happens after.
    #[default]
    None,
    /// The round behaviors rewind the cursor while rounds remain.
    RoundsRemaining,
    /// AMRAP: rewind while the block's countdown has time left.
    TimerActive,
}

/// Configuration for [`ChildSelectionBehavior`].
#[derive(Clone, Debug)]
pub struct ChildSelectionConfig {
    /// Dispatch units, in plan order.
    pub groups: Vec<ChildGroup>,
    /// Looping rule.
    pub loop_condition: LoopCondition,
    /// Do not dispatch the first child from `on_mount` (the root does this:
    /// its idle gate must land on the stack first).
    pub skip_on_mount: bool,
    /// Insert a rest block between passes (with [`LoopCondition::TimerActive`]).
    pub inject_rest: bool,
    /// Minimum countdown remainder that still earns a rest.
    pub min_rest_ms: DurationMs,
}

/// Dispatches child blocks one group per cycle and tracks pass progress in
/// `children:status` memory.
///
/// Coordination with the round and rest behaviors happens entirely through
/// that status slot: this behavior sets `all_executed` when a pass finishes;
/// round advancement (or this behavior itself, for AMRAPs) rewinds the cursor
/// with [`ChildrenStatus::begin_pass`].
#[derive(Debug)]
pub struct ChildSelectionBehavior {
    config: ChildSelectionConfig,
}

impl ChildSelectionBehavior {
    /// A behavior from the given config.
    pub fn new(config: ChildSelectionConfig) -> ChildSelectionBehavior {
        ChildSelectionBehavior { config }
    }

    /// Dispatches the group at `status.child_index`, advancing the cursor and
    /// refreshing the next-up preview.
    fn dispatch(&self, ctx: &mut BehaviorContext<'_>, status: &mut ChildrenStatus) -> Vec<Action> {
        let group = &self.config.groups[status.child_index];
        status.child_index += 1;

        let upcoming: Vec<Fragment> = self
            .config
            .groups
            .get(status.child_index)
            .map(|next| next.preview.clone())
            .unwrap_or_default();
        ctx.set_memory(
            MemoryTag::FragmentNext,
            MemoryValue::Fragments(upcoming.clone()),
        );

        vec![
            Action::UpdateNextPreview { fragments: upcoming },
            Action::CompileChild {
                parent: ctx.key(),
                statements: group.statements.clone(),
            },
        ]
    }

    fn write_status(ctx: &mut BehaviorContext<'_>, status: ChildrenStatus) {
        ctx.update_memory(MemoryTag::ChildrenStatus, MemoryValue::Children(status));
    }

    /// AMRAP round counting: each rewound pass is a new (unbounded) round.
    fn bump_round(&self, ctx: &mut BehaviorContext<'_>) {
        let Some(mut round) = ctx.get_memory::<RoundState>(&MemoryTag::Round) else {
            return;
        };
        round.current += 1;
        ctx.update_memory(MemoryTag::Round, MemoryValue::Round(round));
        ctx.set_display_fragment(Fragment::runtime(FragmentValue::CurrentRound {
            current: round.current,
            total: round.total,
        }));
    }
}

impl Behavior for ChildSelectionBehavior {
    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        let mut status = ChildrenStatus::new(self.config.groups.len());
        let actions = if self.config.skip_on_mount || self.config.groups.is_empty() {
            Vec::new()
        } else {
            self.dispatch(ctx, &mut status)
        };
        ctx.push_memory(MemoryTag::ChildrenStatus, MemoryValue::Children(status));
        if ctx
            .memory()
            .first(&MemoryTag::FragmentNext)
            .is_none()
        {
            ctx.push_memory(MemoryTag::FragmentNext, MemoryValue::Fragments(Vec::new()));
        }
        actions
    }

    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if ctx.is_complete() {
            return Vec::new();
        }
        let Some(mut status) = ctx.get_memory::<ChildrenStatus>(&MemoryTag::ChildrenStatus) else {
            return Vec::new();
        };
        if status.all_completed {
            return Vec::new();
        }

        if status.child_index < self.config.groups.len() && !status.all_executed {
            let actions = self.dispatch(ctx, &mut status);
            Self::write_status(ctx, status);
            return actions;
        }

        if !status.all_executed {
            // Pass just finished: the last dispatched child has popped.
            status.all_executed = true;
            status.passes_completed += 1;
        }

        match self.config.loop_condition {
            // One pass; completion behaviors take it from here.
            LoopCondition::None => {}
            // The round behaviors rewind the cursor.
            LoopCondition::RoundsRemaining => {}
            LoopCondition::TimerActive => {
                let remaining = ctx
                    .get_memory::<TimerState>(&MemoryTag::Timer)
                    .and_then(|timer| timer.remaining(ctx.now()));
                if let Some(remaining) = remaining {
                    if remaining.is_zero() {
                        // The countdown completes the block; nothing to rewind.
                    } else if self.config.inject_rest
                        && remaining > self.config.min_rest_ms
                        && !status.rest_taken
                    {
                        // Hold here; the rest behavior pushes the rest block
                        // and flips `rest_taken` when it finishes.
                    } else {
                        status.begin_pass();
                        self.bump_round(ctx);
                    }
                }
            }
        }

        Self::write_status(ctx, status);
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_condition_default_is_none() {
        assert_eq!(LoopCondition::default(), LoopCondition::None);
    }
}
