//! Output reporting: segments at mount, milestones mid-flight, completions at
//! unmount.

use rustc_hash::FxHashMap;
use wod_script::{Fragment, FragmentKind, FragmentValue, TimeSpan};

use crate::action::Action;
use crate::block::{Behavior, BehaviorContext};
use crate::memory::{ChildrenStatus, MemoryTag, MemoryValue, RoundState, TimerState};
use crate::output::OutputKind;

/// Deduplicates by fragment kind keeping the *lowest*-origin winners: history
/// should read like the plan, so parser text beats runtime decoration. Ties
/// at the winning rank are all kept (a 21-15-9 scheme stays three reps).
fn dedupe_parser_wins(fragments: &[Fragment]) -> Vec<Fragment> {
    let mut min_rank: FxHashMap<FragmentKind, u8> = FxHashMap::default();
    for fragment in fragments {
        let rank = fragment.origin.rank();
        min_rank
            .entry(fragment.kind())
            .and_modify(|min| *min = (*min).min(rank))
            .or_insert(rank);
    }
    fragments
        .iter()
        .filter(|fragment| min_rank[&fragment.kind()] == fragment.origin.rank())
        .cloned()
        .collect()
}

/// Emits the block's history entries.
#[derive(Debug)]
pub struct ReportOutputBehavior {
    emit_segment: bool,
    final_milestone_emitted: bool,
}

impl ReportOutputBehavior {
    /// Emits a `segment` entry at mount plus the usual milestones/completion.
    pub fn new() -> ReportOutputBehavior {
        ReportOutputBehavior {
            emit_segment: true,
            final_milestone_emitted: false,
        }
    }

    /// Skips the mount-time segment entry (the root: the session itself is
    /// not a plan segment).
    pub fn without_segment() -> ReportOutputBehavior {
        ReportOutputBehavior {
            emit_segment: false,
            final_milestone_emitted: false,
        }
    }

    fn current_round_fragment(ctx: &BehaviorContext<'_>) -> Option<Fragment> {
        let round = ctx.get_memory::<RoundState>(&MemoryTag::Round)?;
        Some(Fragment::runtime(FragmentValue::CurrentRound {
            current: round.current,
            total: round.total,
        }))
    }
}

impl Default for ReportOutputBehavior {
    fn default() -> Self {
        ReportOutputBehavior::new()
    }
}

impl Behavior for ReportOutputBehavior {
    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.emit_segment {
            let mut fragments = ctx.display_view().resolved();
            // The display view already carries the round counter when a round
            // behavior seeded it; only fill the gap.
            if fragments.iter().all(|f| f.kind() != FragmentKind::CurrentRound) {
                if let Some(round) = Self::current_round_fragment(ctx) {
                    fragments.push(round);
                }
            }
            actions.push(Action::EmitOutput {
                kind: OutputKind::Segment,
                source: ctx.key(),
                stack_level: ctx.stack_index(),
                span: None,
                fragments: vec![dedupe_parser_wins(&fragments)],
            });
        }
        // A multi-round block opens with a round milestone.
        let multi_round = ctx
            .get_memory::<RoundState>(&MemoryTag::Round)
            .is_some_and(|round| round.total.is_some_and(|total| total > 1));
        if multi_round {
            if let Some(round) = Self::current_round_fragment(ctx) {
                actions.push(Action::EmitOutput {
                    kind: OutputKind::Metric,
                    source: ctx.key(),
                    stack_level: ctx.stack_index(),
                    span: None,
                    fragments: vec![vec![round]],
                });
            }
        }
        actions
    }

    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if self.final_milestone_emitted {
            return Vec::new();
        }
        let all_completed = ctx
            .get_memory::<ChildrenStatus>(&MemoryTag::ChildrenStatus)
            .is_some_and(|status| status.all_completed);
        if !all_completed {
            return Vec::new();
        }
        self.final_milestone_emitted = true;

        let mut fragments = Vec::new();
        if let Some(round) = Self::current_round_fragment(ctx) {
            fragments.push(round);
        }
        if let Some(started) = ctx.started_at() {
            fragments.push(Fragment::runtime(FragmentValue::Elapsed(
                ctx.now().since(started),
            )));
        }
        vec![Action::EmitOutput {
            kind: OutputKind::Metric,
            source: ctx.key(),
            stack_level: ctx.stack_index(),
            span: None,
            fragments: vec![fragments],
        }]
    }

    fn on_unmount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        let now = ctx.now();
        let timer = ctx.get_memory::<TimerState>(&MemoryTag::Timer);

        let started = ctx.started_at().unwrap_or(now);
        let span = TimeSpan::closed(started, now);

        let (elapsed, total, spans) = match &timer {
            Some(timer) => (
                timer.elapsed(now),
                timer.duration_ms.unwrap_or_else(|| timer.elapsed(now)),
                timer.spans.clone(),
            ),
            None => (span.duration(now), span.duration(now), vec![span]),
        };

        let mut result = vec![
            Fragment::runtime(FragmentValue::Elapsed(elapsed)),
            Fragment::runtime(FragmentValue::Total(total)),
            Fragment::runtime(FragmentValue::Spans(spans)),
            Fragment::runtime(FragmentValue::SystemTime(now)),
        ];
        if let Some(tracked) = ctx.get_memory::<Vec<Fragment>>(&MemoryTag::FragmentTracked) {
            result.extend(tracked);
        }

        ctx.push_memory(
            MemoryTag::FragmentResult,
            MemoryValue::Fragments(result.clone()),
        );

        vec![Action::EmitOutput {
            kind: OutputKind::Completion,
            source: ctx.key(),
            stack_level: ctx.stack_index(),
            span: Some(span),
            fragments: vec![result],
        }]
    }
}
