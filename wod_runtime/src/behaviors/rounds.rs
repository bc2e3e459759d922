//! Round counting: init, advancement, completion.
//!
//! Split into three behaviors so the factory can compose them around the
//! child-selection behavior: advancement and completion must observe the
//! pass-end flag the selection sets earlier in the same cycle.

use wod_script::{Fragment, FragmentValue};

use crate::action::Action;
use crate::block::{Behavior, BehaviorContext, CompletionReason};
use crate::memory::{ChildrenStatus, MemoryTag, MemoryValue, RoundState};

/// Rep counts of the block's plan, in scheme order (21-15-9).
fn plan_reps(ctx: &BehaviorContext<'_>) -> Vec<u32> {
    ctx.plan_fragments()
        .iter()
        .filter_map(|fragment| match fragment.value {
            FragmentValue::Rep(n) => Some(n),
            _ => None,
        })
        .collect()
}

/// The rep target for a 1-based round, clamped to the last scheme entry.
fn rep_target(reps: &[u32], round: u32) -> Option<u32> {
    if reps.is_empty() {
        return None;
    }
    let index = (round as usize - 1).min(reps.len() - 1);
    Some(reps[index])
}

/// Allocates `round` memory and seeds the round-dependent display state.
#[derive(Debug)]
pub struct RoundInitBehavior {
    total: Option<u32>,
}

impl RoundInitBehavior {
    /// Rounds bounded by `total`, or unbounded for `None` (AMRAP counting).
    pub fn new(total: Option<u32>) -> RoundInitBehavior {
        RoundInitBehavior { total }
    }
}

impl Behavior for RoundInitBehavior {
    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        let round = RoundState::new(self.total);
        ctx.push_memory(MemoryTag::Round, MemoryValue::Round(round));
        ctx.set_display_fragment(Fragment::runtime(FragmentValue::CurrentRound {
            current: round.current,
            total: round.total,
        }));

        // A rep scheme on this block becomes a per-round target that child
        // compilation inherits.
        let reps = plan_reps(ctx);
        if let Some(target) = rep_target(&reps, round.current) {
            ctx.push_memory(
                MemoryTag::FragmentRepTarget,
                MemoryValue::Fragments(vec![Fragment::runtime(FragmentValue::Rep(target))]),
            );
        }
        Vec::new()
    }
}

/// Advances the round when the selection reports a finished pass and rounds
/// remain, rewinding the child cursor for the next pass.
#[derive(Debug)]
pub struct RoundAdvanceBehavior;

impl Behavior for RoundAdvanceBehavior {
    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if ctx.is_complete() {
            return Vec::new();
        }
        let Some(status) = ctx.get_memory::<ChildrenStatus>(&MemoryTag::ChildrenStatus) else {
            return Vec::new();
        };
        let Some(mut round) = ctx.get_memory::<RoundState>(&MemoryTag::Round) else {
            return Vec::new();
        };
        if !status.all_executed || status.all_completed || !round.has_remaining() {
            return Vec::new();
        }

        round.current += 1;
        ctx.update_memory(MemoryTag::Round, MemoryValue::Round(round));
        ctx.set_display_fragment(Fragment::runtime(FragmentValue::CurrentRound {
            current: round.current,
            total: round.total,
        }));

        let reps = plan_reps(ctx);
        if let Some(target) = rep_target(&reps, round.current) {
            ctx.update_memory(
                MemoryTag::FragmentRepTarget,
                MemoryValue::Fragments(vec![Fragment::runtime(FragmentValue::Rep(target))]),
            );
        }

        let mut status = status;
        status.begin_pass();
        ctx.update_memory(MemoryTag::ChildrenStatus, MemoryValue::Children(status));
        Vec::new()
    }
}

/// Completes the block once the final round's pass finishes.
#[derive(Debug)]
pub struct RoundCompletionBehavior;

impl Behavior for RoundCompletionBehavior {
    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if ctx.is_complete() {
            return Vec::new();
        }
        let Some(status) = ctx.get_memory::<ChildrenStatus>(&MemoryTag::ChildrenStatus) else {
            return Vec::new();
        };
        let Some(round) = ctx.get_memory::<RoundState>(&MemoryTag::Round) else {
            return Vec::new();
        };
        if status.all_executed && !status.all_completed && round.is_final() {
            let mut status = status;
            status.all_completed = true;
            ctx.update_memory(MemoryTag::ChildrenStatus, MemoryValue::Children(status));
            ctx.mark_complete(CompletionReason::RoundsExhausted);
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use wod_script::FragmentKind;

    use super::*;

    #[test]
    fn rep_target_follows_scheme_and_clamps() {
        let scheme = [21, 15, 9];
        assert_eq!(rep_target(&scheme, 1), Some(21));
        assert_eq!(rep_target(&scheme, 3), Some(9));
        assert_eq!(rep_target(&scheme, 7), Some(9));
        assert_eq!(rep_target(&[], 1), None);
    }

    #[test]
    fn fragment_kind_round_trip() {
        let fragment = Fragment::runtime(FragmentValue::CurrentRound {
            current: 2,
            total: Some(5),
        });
        assert_eq!(fragment.kind(), FragmentKind::CurrentRound);
    }
}
