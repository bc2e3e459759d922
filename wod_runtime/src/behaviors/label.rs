//! Labeling: resolves the block's display label and card.

use wod_script::{Fragment, FragmentValue};

use crate::action::Action;
use crate::block::{Behavior, BehaviorContext, BlockKind};
use crate::memory::{MemoryTag, MemoryValue};

/// Picks a human label from the resolved display view (label, effort, or
/// action text, in that order), records it under `fragment:label`, and keeps
/// a display card pushed while the block lives.
#[derive(Debug)]
pub struct LabelingBehavior;

impl LabelingBehavior {
    fn fallback_label(kind: BlockKind) -> &'static str {
        match kind {
            BlockKind::Root => "Workout",
            BlockKind::Timer => "Timer",
            BlockKind::Rounds => "Rounds",
            BlockKind::Effort => "Effort",
            BlockKind::Rest => "Rest",
            BlockKind::Idle => "Ready",
        }
    }

    fn resolve_label(ctx: &BehaviorContext<'_>) -> String {
        let resolved = ctx.display_view().resolved();
        resolved
            .iter()
            .find_map(|fragment| match &fragment.value {
                FragmentValue::Label(text) => Some(text.clone()),
                _ => None,
            })
            .or_else(|| {
                resolved.iter().find_map(|fragment| match &fragment.value {
                    FragmentValue::Effort(name) => Some(name.clone()),
                    _ => None,
                })
            })
            .or_else(|| {
                resolved.iter().find_map(|fragment| match &fragment.value {
                    FragmentValue::Action(name) => Some(name.clone()),
                    _ => None,
                })
            })
            .unwrap_or_else(|| Self::fallback_label(ctx.kind()).to_string())
    }
}

impl Behavior for LabelingBehavior {
    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        let label = Self::resolve_label(ctx);
        ctx.set_display_label(label.clone());
        ctx.push_memory(
            MemoryTag::FragmentLabel,
            MemoryValue::Fragments(vec![Fragment::runtime(FragmentValue::Label(label))]),
        );
        vec![Action::PushCardDisplay {
            source: ctx.key(),
            fragments: ctx.display_view().resolved(),
        }]
    }

    fn on_unmount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        vec![Action::PopCardDisplay { source: ctx.key() }]
    }
}
