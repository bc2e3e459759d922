//! The block factory: compiles statements into blocks by picking a strategy
//! and composing its behavior list.
//!
//! Strategy precedence follows the statement's fragments: a timer fragment
//! wins over rounds, rounds over a bare effort. A statement carrying both
//! timer and rounds composes both — timer outer (owns completion by expiry),
//! rounds inner (owns the pass cursor).

use wod_script::{
    DurationMs, Fragment, FragmentKind, FragmentValue, Script, StatementId, StatementNode,
    TimerDirection,
};

use crate::behaviors::{
    ButtonBehavior, ChildGroup, ChildSelectionBehavior, ChildSelectionConfig,
    ChildrenCompletionBehavior, CompletionBehavior, HistoryRecordBehavior, IdleGateBehavior,
    LabelingBehavior, LoopCondition, ReportOutputBehavior, RestBlockBehavior,
    RoundAdvanceBehavior, RoundCompletionBehavior, RoundInitBehavior, TimerBehavior, TimerConfig,
    WaitingToStartInjectorBehavior,
};
use crate::block::{Behavior, Block, BlockKey, BlockKind};
use crate::error::RuntimeError;
use crate::memory::TimerRole;
use crate::session::SessionOptions;

/// Which strategy a statement compiles under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
    Timer,
    Rounds,
    Effort,
}

fn classify(node: &StatementNode) -> Strategy {
    if node.has_kind(FragmentKind::Timer) {
        Strategy::Timer
    } else if node.has_kind(FragmentKind::Rounds) {
        Strategy::Rounds
    } else {
        Strategy::Effort
    }
}

fn timer_config(node: &StatementNode) -> Option<TimerConfig> {
    node.first_of_kind(FragmentKind::Timer)
        .and_then(|fragment| match fragment.value {
            FragmentValue::Timer {
                duration_ms,
                direction,
            } => Some(TimerConfig {
                direction,
                duration_ms,
                label: None,
                role: TimerRole::Primary,
                auto_start: true,
            }),
            _ => None,
        })
}

fn total_rounds(node: &StatementNode) -> Option<u32> {
    node.first_of_kind(FragmentKind::Rounds)
        .and_then(|fragment| match fragment.value {
            FragmentValue::Rounds(total) => Some(total),
            _ => None,
        })
}

/// Fragments worth previewing before a child runs.
fn preview_fragments(node: &StatementNode) -> Vec<Fragment> {
    node.fragments
        .iter()
        .filter(|fragment| {
            matches!(
                fragment.kind(),
                FragmentKind::Label
                    | FragmentKind::Effort
                    | FragmentKind::Action
                    | FragmentKind::Rep
                    | FragmentKind::Timer
            )
        })
        .cloned()
        .collect()
}

fn child_groups(script: &Script, node: &StatementNode) -> Result<Vec<ChildGroup>, RuntimeError> {
    node.children
        .iter()
        .map(|&id| {
            let child = lookup(script, id)?;
            Ok(ChildGroup {
                statements: vec![id],
                preview: preview_fragments(child),
            })
        })
        .collect()
}

fn lookup(script: &Script, id: StatementId) -> Result<&StatementNode, RuntimeError> {
    script.get(id).ok_or_else(|| RuntimeError::Compilation {
        statements: vec![id],
        reason: "statement id not in script".to_string(),
    })
}

fn selection(
    groups: Vec<ChildGroup>,
    loop_condition: LoopCondition,
    inject_rest: bool,
    options: &SessionOptions,
) -> ChildSelectionBehavior {
    ChildSelectionBehavior::new(ChildSelectionConfig {
        groups,
        loop_condition,
        skip_on_mount: false,
        inject_rest,
        min_rest_ms: options.min_rest_ms,
    })
}

/// Compiles one or more statements into a block.
///
/// `inherited` carries promote-tier fragments collected from the ancestor
/// chain; they join the plan at compiler origin so they outrank the parsed
/// text but stay under runtime and user overrides.
pub fn compile_statements(
    script: &Script,
    ids: &[StatementId],
    inherited: &[Fragment],
    key: BlockKey,
    options: &SessionOptions,
) -> Result<Block, RuntimeError> {
    let first_id = *ids.first().ok_or_else(|| RuntimeError::Compilation {
        statements: Vec::new(),
        reason: "empty statement group".to_string(),
    })?;
    let first = lookup(script, first_id)?;

    let mut plan: Vec<Vec<Fragment>> = Vec::with_capacity(ids.len() + 1);
    for &id in ids {
        plan.push(lookup(script, id)?.fragments.clone());
    }
    if !inherited.is_empty() {
        plan.push(
            inherited
                .iter()
                .map(|fragment| Fragment::compiler(fragment.value.clone()))
                .collect(),
        );
    }

    let strategy = classify(first);
    let groups = child_groups(script, first)?;
    let has_children = !groups.is_empty();
    let rounds = total_rounds(first);
    let multi_round = rounds.is_some_and(|total| total > 1);

    let mut behaviors: Vec<Box<dyn Behavior>> = Vec::new();
    let kind = match strategy {
        Strategy::Timer => {
            let config = timer_config(first).ok_or_else(|| RuntimeError::Compilation {
                statements: ids.to_vec(),
                reason: "timer strategy without a timer fragment".to_string(),
            })?;
            let is_countdown =
                config.direction == TimerDirection::Down && config.duration_ms.is_some();
            behaviors.push(Box::new(TimerBehavior::new(config)));

            if has_children {
                let loop_condition = if multi_round {
                    LoopCondition::RoundsRemaining
                } else if is_countdown {
                    LoopCondition::TimerActive
                } else {
                    LoopCondition::None
                };
                let inject_rest = loop_condition == LoopCondition::TimerActive;

                if multi_round {
                    behaviors.push(Box::new(RoundInitBehavior::new(rounds)));
                } else if loop_condition == LoopCondition::TimerActive {
                    // AMRAP: count completed passes as unbounded rounds.
                    behaviors.push(Box::new(RoundInitBehavior::new(None)));
                }
                if inject_rest {
                    behaviors.push(Box::new(RestBlockBehavior::new(options.min_rest_ms)));
                }
                behaviors.push(Box::new(selection(groups, loop_condition, inject_rest, options)));
                match loop_condition {
                    LoopCondition::RoundsRemaining => {
                        behaviors.push(Box::new(RoundAdvanceBehavior));
                        behaviors.push(Box::new(RoundCompletionBehavior));
                    }
                    // AMRAP: the selection owns both the rewind and the round
                    // bump; completion belongs to the countdown.
                    LoopCondition::TimerActive => {}
                    LoopCondition::None => {
                        behaviors.push(Box::new(ChildrenCompletionBehavior));
                    }
                }
                behaviors.push(Box::new(ReportOutputBehavior::new()));
                behaviors.push(Box::new(LabelingBehavior));
                behaviors.push(Box::new(ButtonBehavior::timer_controls()));
            } else {
                behaviors.push(Box::new(CompletionBehavior));
                behaviors.push(Box::new(ReportOutputBehavior::new()));
                behaviors.push(Box::new(LabelingBehavior));
                behaviors.push(Box::new(ButtonBehavior::timer_controls()));
            }
            BlockKind::Timer
        }
        Strategy::Rounds => {
            behaviors.push(Box::new(RoundInitBehavior::new(rounds)));
            if has_children {
                behaviors.push(Box::new(selection(
                    groups,
                    LoopCondition::RoundsRemaining,
                    false,
                    options,
                )));
                behaviors.push(Box::new(RoundAdvanceBehavior));
                behaviors.push(Box::new(RoundCompletionBehavior));
            } else {
                behaviors.push(Box::new(CompletionBehavior));
            }
            behaviors.push(Box::new(ReportOutputBehavior::new()));
            behaviors.push(Box::new(LabelingBehavior));
            behaviors.push(Box::new(ButtonBehavior::leaf_controls()));
            BlockKind::Rounds
        }
        Strategy::Effort => {
            if has_children {
                behaviors.push(Box::new(selection(groups, LoopCondition::None, false, options)));
                behaviors.push(Box::new(ChildrenCompletionBehavior));
            } else {
                behaviors.push(Box::new(CompletionBehavior));
            }
            behaviors.push(Box::new(ReportOutputBehavior::new()));
            behaviors.push(Box::new(LabelingBehavior));
            behaviors.push(Box::new(ButtonBehavior::leaf_controls()));
            BlockKind::Effort
        }
    };

    Ok(Block::new(key, kind, ids.to_vec(), plan, behaviors))
}

/// Compiles the session root wrapping the script's top-level statements.
pub fn compile_root(script: &Script, key: BlockKey, options: &SessionOptions) -> Block {
    let groups: Vec<ChildGroup> = script
        .roots()
        .iter()
        .filter_map(|&id| script.get(id))
        .map(|node| ChildGroup {
            statements: vec![node.id],
            preview: preview_fragments(node),
        })
        .collect();

    let behaviors: Vec<Box<dyn Behavior>> = vec![
        Box::new(TimerBehavior::new(TimerConfig::stopwatch())),
        Box::new(WaitingToStartInjectorBehavior),
        Box::new(ChildSelectionBehavior::new(ChildSelectionConfig {
            groups,
            loop_condition: LoopCondition::None,
            skip_on_mount: true,
            inject_rest: false,
            min_rest_ms: options.min_rest_ms,
        })),
        Box::new(ChildrenCompletionBehavior),
        Box::new(ReportOutputBehavior::without_segment()),
        Box::new(LabelingBehavior),
        Box::new(ButtonBehavior::session_controls()),
        Box::new(HistoryRecordBehavior),
    ];

    Block::new(key, BlockKind::Root, Vec::new(), Vec::new(), behaviors)
}

/// Builds the rest countdown a rest behavior requested.
pub fn rest_block(key: BlockKey, duration_ms: DurationMs, label: String) -> Block {
    let plan = vec![vec![
        Fragment::runtime(FragmentValue::Label(label.clone())),
        Fragment::runtime(FragmentValue::Timer {
            duration_ms: Some(duration_ms),
            direction: TimerDirection::Down,
        }),
    ]];
    let behaviors: Vec<Box<dyn Behavior>> = vec![
        Box::new(TimerBehavior::new(
            TimerConfig::countdown(duration_ms)
                .with_label(label)
                .with_role(TimerRole::Secondary),
        )),
        Box::new(CompletionBehavior),
        Box::new(ReportOutputBehavior::new()),
        Box::new(LabelingBehavior),
        Box::new(ButtonBehavior::leaf_controls()),
    ];
    Block::new(key, BlockKind::Rest, Vec::new(), plan, behaviors)
}

/// Builds the idle gate the root injects at mount.
pub fn idle_gate_block(key: BlockKey) -> Block {
    let behaviors: Vec<Box<dyn Behavior>> = vec![
        Box::new(IdleGateBehavior),
        Box::new(ButtonBehavior::start_control()),
    ];
    Block::new(key, BlockKind::Idle, Vec::new(), Vec::new(), behaviors)
}

#[cfg(test)]
mod tests {
    use wod_script::Statement;

    use super::*;

    fn script_of(statements: Vec<Statement>) -> Script {
        Script::from_statements(statements).unwrap()
    }

    #[test]
    fn classification_precedence() {
        let script = script_of(vec![
            Statement::leaf(
                StatementId(1),
                vec![
                    Fragment::parser(FragmentValue::Timer {
                        duration_ms: Some(DurationMs::from_secs(60)),
                        direction: TimerDirection::Down,
                    }),
                    Fragment::parser(FragmentValue::Rounds(3)),
                ],
            ),
            Statement::leaf(StatementId(2), vec![Fragment::parser(FragmentValue::Rounds(5))]),
            Statement::leaf(
                StatementId(3),
                vec![Fragment::parser(FragmentValue::Effort("Row".into()))],
            ),
        ]);

        assert_eq!(classify(script.get(StatementId(1)).unwrap()), Strategy::Timer);
        assert_eq!(classify(script.get(StatementId(2)).unwrap()), Strategy::Rounds);
        assert_eq!(classify(script.get(StatementId(3)).unwrap()), Strategy::Effort);
    }

    #[test]
    fn compiles_timer_block_with_kind_and_plan() {
        let script = script_of(vec![Statement::leaf(
            StatementId(1),
            vec![Fragment::parser(FragmentValue::Timer {
                duration_ms: Some(DurationMs::from_secs(60)),
                direction: TimerDirection::Down,
            })],
        )]);
        let block = compile_statements(
            &script,
            &[StatementId(1)],
            &[],
            BlockKey(1),
            &SessionOptions::default(),
        )
        .unwrap();
        assert_eq!(block.kind(), BlockKind::Timer);
        assert_eq!(block.meta().plan().len(), 1);
    }

    #[test]
    fn inherited_fragments_join_plan_at_compiler_origin() {
        let script = script_of(vec![Statement::leaf(
            StatementId(1),
            vec![Fragment::parser(FragmentValue::Effort("Thrusters".into()))],
        )]);
        let inherited = vec![Fragment::runtime(FragmentValue::Rep(21))];
        let block = compile_statements(
            &script,
            &[StatementId(1)],
            &inherited,
            BlockKey(1),
            &SessionOptions::default(),
        )
        .unwrap();

        let plan = block.meta().plan();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1][0].origin, wod_script::Origin::Compiler);
    }

    #[test]
    fn unknown_statement_is_a_compilation_error() {
        let script = script_of(vec![Statement::leaf(
            StatementId(1),
            vec![Fragment::parser(FragmentValue::Effort("Row".into()))],
        )]);
        let err = compile_statements(
            &script,
            &[StatementId(99)],
            &[],
            BlockKey(1),
            &SessionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::Compilation { .. }));
    }
}
