//! The block: a live stack entry with composed behaviors and owned memory.
//!
//! There is exactly one concrete block type. What used to be a subclass
//! hierarchy is a [`BlockKind`] tag plus the behavior list the factory
//! composed; the lifecycle (`mount → next* → unmount → dispose`) is enforced
//! here with explicit phase tracking rather than by convention.

use serde::{Deserialize, Serialize};
use tracing::info_span;
use wod_script::{EpochMs, Fragment, StatementId, TimeSpan};

use crate::action::Action;
use crate::clock::Clock;
use crate::error::InvariantViolation;
use crate::event::{Event, HandlerResponse};
use crate::memory::{BlockMemory, DisplayView, MemoryTag, MemoryValue, TimerState};

pub mod behavior;

pub use behavior::{Behavior, BehaviorContext, HandlerRequest};

/// Opaque identity of a block instance. Unique per push within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct BlockKey(pub u64);

impl std::fmt::Display for BlockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block-{}", self.0)
    }
}

/// Monotonic block-key allocator, owned by the session.
#[derive(Debug, Default)]
pub struct KeySource {
    next: u64,
}

impl KeySource {
    /// Hands out the next key.
    pub fn alloc(&mut self) -> BlockKey {
        let key = BlockKey(self.next);
        self.next += 1;
        key
    }
}

/// The factory strategy that produced a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// The session root.
    Root,
    /// Timer-led block (countdowns, stopwatches, AMRAP shells).
    Timer,
    /// Round-led block.
    Rounds,
    /// Effort leaf.
    Effort,
    /// Injected rest countdown.
    Rest,
    /// Idle gate holding the session until `start`.
    Idle,
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BlockKind::Root => "root",
            BlockKind::Timer => "timer",
            BlockKind::Rounds => "rounds",
            BlockKind::Effort => "effort",
            BlockKind::Rest => "rest",
            BlockKind::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// Why a block completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Countdown hit zero.
    TimerExpired,
    /// Final round finished.
    RoundsExhausted,
    /// Every child finished and no loop remains.
    ChildrenDone,
    /// User advanced past the block.
    UserAdvanced,
    /// User skipped the block.
    UserSkipped,
    /// An ancestor completed underneath it.
    ParentCompleted,
    /// The whole session was ended.
    SessionEnded,
    /// Torn down by an invariant violation.
    Failed,
}

/// Mount/unmount timestamps of a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTiming {
    /// Set at mount.
    pub started: Option<EpochMs>,
    /// Set at unmount.
    pub ended: Option<EpochMs>,
}

impl ExecutionTiming {
    /// The covered span, once mounted.
    pub fn span(&self) -> Option<TimeSpan> {
        self.started.map(|started| TimeSpan {
            started,
            ended: self.ended,
        })
    }
}

/// Identity, plan, and completion state of a block. Split from [`Block`] so a
/// behavior context can borrow it alongside the memory.
#[derive(Debug)]
pub struct BlockMeta {
    pub(crate) key: BlockKey,
    pub(crate) kind: BlockKind,
    pub(crate) source_ids: Vec<StatementId>,
    plan: Vec<Vec<Fragment>>,
    pub(crate) display_label: Option<String>,
    is_complete: bool,
    completion_reason: Option<CompletionReason>,
    pub(crate) timing: ExecutionTiming,
}

impl BlockMeta {
    /// The block's plan fragment groups (outer = statement group).
    pub fn plan(&self) -> &[Vec<Fragment>] {
        &self.plan
    }

    /// Flattened clone of the plan fragments.
    pub fn plan_fragments(&self) -> Vec<Fragment> {
        self.plan.iter().flatten().cloned().collect()
    }

    /// Whether the block has been marked complete.
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Why the block completed, once it has.
    pub fn completion_reason(&self) -> Option<CompletionReason> {
        self.completion_reason
    }

    /// Marks complete. Idempotent; the first reason wins.
    pub fn mark_complete(&mut self, reason: CompletionReason) {
        if !self.is_complete {
            self.is_complete = true;
            self.completion_reason = Some(reason);
        }
    }
}

/// Lifecycle phase, tracked to enforce the mount/next/unmount/dispose order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LifecyclePhase {
    Constructed,
    Mounted,
    Unmounted,
    Disposed,
}

/// Host environment for one lifecycle call, assembled by the session.
pub(crate) struct HostEnv<'a> {
    pub clock: &'a dyn Clock,
    pub stack_index: usize,
    pub stack_depth: usize,
    pub keys: &'a mut KeySource,
    pub handler_requests: &'a mut Vec<HandlerRequest>,
}

/// Result of one `next` cycle.
pub(crate) struct NextOutcome {
    pub actions: Vec<Action>,
    /// True when any behavior mutated memory or completion state; the pump
    /// keeps cycling on progress even when no actions were produced.
    pub progressed: bool,
}

/// A live stack entry.
pub struct Block {
    meta: BlockMeta,
    memory: BlockMemory,
    behaviors: Vec<Box<dyn Behavior>>,
    phase: LifecyclePhase,
}

impl Block {
    /// Builds an unmounted block. Normally called by the factory.
    pub fn new(
        key: BlockKey,
        kind: BlockKind,
        source_ids: Vec<StatementId>,
        plan: Vec<Vec<Fragment>>,
        behaviors: Vec<Box<dyn Behavior>>,
    ) -> Block {
        Block {
            meta: BlockMeta {
                key,
                kind,
                source_ids,
                plan,
                display_label: None,
                is_complete: false,
                completion_reason: None,
                timing: ExecutionTiming::default(),
            },
            memory: BlockMemory::default(),
            behaviors,
            phase: LifecyclePhase::Constructed,
        }
    }

    /// The block's key.
    pub fn key(&self) -> BlockKey {
        self.meta.key
    }

    /// The block's kind.
    pub fn kind(&self) -> BlockKind {
        self.meta.kind
    }

    /// Identity/plan/completion state.
    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    /// The block's memory, for read/subscribe access.
    pub fn memory(&self) -> &BlockMemory {
        &self.memory
    }

    /// Typed view over the first slot with `tag`, for external `.value()` /
    /// `.subscribe()` access.
    pub fn view<T: crate::memory::MemoryRead>(
        &self,
        tag: &MemoryTag,
    ) -> Option<crate::memory::TypedView<T>> {
        self.memory
            .first(tag)
            .map(|location| crate::memory::TypedView::new(location.handle()))
    }

    /// Whether the block has been marked complete.
    pub fn is_complete(&self) -> bool {
        self.meta.is_complete
    }

    /// The precedence-resolved display view.
    pub fn display_view(&self) -> DisplayView {
        let handle = self
            .memory
            .first(&MemoryTag::FragmentDisplay)
            .map(|location| location.handle());
        match handle {
            Some(handle) => DisplayView::new(self.meta.plan_fragments(), handle),
            None => {
                // Not mounted yet: resolve the plan against an empty override
                // slot that nothing can write to.
                let mut scratch = BlockMemory::default();
                let handle = scratch.push(MemoryTag::FragmentDisplay, MemoryValue::Fragments(vec![]));
                DisplayView::new(self.meta.plan_fragments(), handle)
            }
        }
    }

    /// Marks complete from outside a hook (skip, ancestor completion).
    pub(crate) fn force_complete(&mut self, reason: CompletionReason) {
        self.meta.mark_complete(reason);
    }

    pub(crate) fn mount(&mut self, env: &mut HostEnv<'_>) -> Result<Vec<Action>, InvariantViolation> {
        if self.phase != LifecyclePhase::Constructed {
            return Err(InvariantViolation::Lifecycle(self.meta.key, "mount after mount"));
        }
        self.phase = LifecyclePhase::Mounted;
        self.meta.timing.started = Some(env.clock.now());
        // Every block carries a display-override slot from birth; the display
        // view and external `memory:set` writes both target it.
        self.memory
            .push(MemoryTag::FragmentDisplay, MemoryValue::Fragments(Vec::new()));
        Ok(self.run_hook(env, "mount", |behavior, ctx| behavior.on_mount(ctx)))
    }

    pub(crate) fn next(&mut self, env: &mut HostEnv<'_>) -> Result<NextOutcome, InvariantViolation> {
        if self.phase != LifecyclePhase::Mounted {
            return Err(InvariantViolation::Lifecycle(self.meta.key, "next while not mounted"));
        }
        let mutations_before = self.memory.mutation_count();
        let complete_before = self.meta.is_complete;

        let mut actions = self.run_hook(env, "next", |behavior, ctx| behavior.on_next(ctx));

        // Completion always ends the batch with a pop of this block.
        if self.meta.is_complete
            && !actions
                .iter()
                .any(|action| matches!(action, Action::PopBlock { .. }))
        {
            actions.push(Action::PopBlock {
                key: Some(self.meta.key),
            });
        }

        let progressed = !actions.is_empty()
            || self.memory.mutation_count() != mutations_before
            || self.meta.is_complete != complete_before;
        Ok(NextOutcome { actions, progressed })
    }

    pub(crate) fn unmount(&mut self, env: &mut HostEnv<'_>) -> Result<Vec<Action>, InvariantViolation> {
        if self.phase != LifecyclePhase::Mounted {
            return Err(InvariantViolation::Lifecycle(self.meta.key, "unmount while not mounted"));
        }
        self.phase = LifecyclePhase::Unmounted;
        let actions = self.run_hook(env, "unmount", |behavior, ctx| behavior.on_unmount(ctx));
        self.meta.timing.ended = Some(env.clock.now());
        Ok(actions)
    }

    pub(crate) fn dispose(&mut self, env: &mut HostEnv<'_>) -> Result<(), InvariantViolation> {
        if self.phase != LifecyclePhase::Unmounted {
            return Err(InvariantViolation::Lifecycle(self.meta.key, "dispose before unmount"));
        }
        self.phase = LifecyclePhase::Disposed;
        // Reverse order for symmetry with mount.
        for index in (0..self.behaviors.len()).rev() {
            let behavior = &mut self.behaviors[index];
            let mut ctx = BehaviorContext::new(&mut self.meta, &mut self.memory, env, index);
            behavior.on_dispose(&mut ctx);
        }
        self.memory.release_all();
        Ok(())
    }

    /// Routes an event to one behavior's `on_event`.
    pub(crate) fn deliver(
        &mut self,
        behavior_index: usize,
        event: &Event,
        env: &mut HostEnv<'_>,
    ) -> Option<HandlerResponse> {
        if self.phase != LifecyclePhase::Mounted {
            return None;
        }
        let behavior = self.behaviors.get_mut(behavior_index)?;
        let mut ctx = BehaviorContext::new(&mut self.meta, &mut self.memory, env, behavior_index);
        behavior.on_event(event, &mut ctx)
    }

    /// Opens spans on every stopped timer slot of this block.
    pub(crate) fn start_spans(&mut self, now: EpochMs) {
        self.with_timer(|timer| {
            if !timer.is_running() && !timer.is_expired(now) {
                timer.open_span(now);
                true
            } else {
                false
            }
        });
    }

    /// Closes the open span on every running timer slot of this block.
    pub(crate) fn stop_spans(&mut self, now: EpochMs) {
        self.with_timer(|timer| {
            if timer.is_running() {
                timer.close_span(now);
                true
            } else {
                false
            }
        });
    }

    fn with_timer(&mut self, mut mutate: impl FnMut(&mut TimerState) -> bool) {
        let updates: Vec<TimerState> = self
            .memory
            .get_by_tag(&MemoryTag::Timer)
            .filter_map(|location| location.value())
            .filter_map(|value| match value {
                MemoryValue::Timer(mut timer) => mutate(&mut timer).then_some(timer),
                _ => None,
            })
            .collect();
        for timer in updates {
            let _ = self.memory.update(&MemoryTag::Timer, MemoryValue::Timer(timer));
        }
    }

    /// Writes into this block's memory from outside (memory-phase actions).
    pub(crate) fn write_memory(&mut self, tag: MemoryTag, value: MemoryValue) -> Result<(), MemoryTag> {
        self.memory.update(&tag, value).map(|_| ())
    }

    /// Applies a user display override: each incoming fragment replaces the
    /// same-kind override fragments, then wins resolution by origin rank.
    pub(crate) fn apply_user_display(&mut self, fragments: Vec<Fragment>) -> Result<(), MemoryTag> {
        let current = self
            .memory
            .first(&MemoryTag::FragmentDisplay)
            .and_then(|location| location.value());
        let mut merged = match current {
            Some(MemoryValue::Fragments(existing)) => existing,
            _ => Vec::new(),
        };
        merged.retain(|existing| {
            fragments
                .iter()
                .all(|incoming| incoming.kind() != existing.kind())
        });
        merged.extend(fragments);
        self.memory
            .update(&MemoryTag::FragmentDisplay, MemoryValue::Fragments(merged))
            .map(|_| ())
    }

    /// True when any of the block's timer slots has an open span.
    pub(crate) fn has_running_timer(&self) -> bool {
        self.memory
            .get_by_tag(&MemoryTag::Timer)
            .filter_map(|location| location.value())
            .any(|value| matches!(value, MemoryValue::Timer(timer) if timer.is_running()))
    }

    fn run_hook(
        &mut self,
        env: &mut HostEnv<'_>,
        hook: &'static str,
        mut call: impl FnMut(&mut Box<dyn Behavior>, &mut BehaviorContext<'_>) -> Vec<Action>,
    ) -> Vec<Action> {
        let _span = info_span!(
            "run-behavior-hook",
            block = %self.meta.key,
            kind = %self.meta.kind,
            hook,
        )
        .entered();
        let mut actions = Vec::new();
        for index in 0..self.behaviors.len() {
            let behavior = &mut self.behaviors[index];
            let mut ctx = BehaviorContext::new(&mut self.meta, &mut self.memory, env, index);
            actions.extend(call(behavior, &mut ctx));
        }
        actions
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("key", &self.meta.key)
            .field("kind", &self.meta.kind)
            .field("source_ids", &self.meta.source_ids)
            .field("is_complete", &self.meta.is_complete)
            .field("behaviors", &self.behaviors.len())
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryLocation;

    /// Records every hook invocation, for lifecycle-symmetry checks.
    struct Recorder {
        log: Rc<RefCell<Vec<&'static str>>>,
        complete_on_next: bool,
    }

    impl Behavior for Recorder {
        fn on_mount(&mut self, _ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
            self.log.borrow_mut().push("mount");
            Vec::new()
        }

        fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
            self.log.borrow_mut().push("next");
            if self.complete_on_next {
                ctx.mark_complete(CompletionReason::UserAdvanced);
            }
            Vec::new()
        }

        fn on_unmount(&mut self, _ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
            self.log.borrow_mut().push("unmount");
            Vec::new()
        }

        fn on_dispose(&mut self, _ctx: &mut BehaviorContext<'_>) {
            self.log.borrow_mut().push("dispose");
        }
    }

    fn recorder_block(
        log: &Rc<RefCell<Vec<&'static str>>>,
        complete_on_next: bool,
    ) -> Block {
        Block::new(
            BlockKey(0),
            BlockKind::Effort,
            Vec::new(),
            Vec::new(),
            vec![Box::new(Recorder {
                log: Rc::clone(log),
                complete_on_next,
            })],
        )
    }

    fn drive<R>(clock: &ManualClock, f: impl FnOnce(&mut HostEnv<'_>) -> R) -> R {
        let mut keys = KeySource::default();
        let mut requests = Vec::new();
        let mut env = HostEnv {
            clock,
            stack_index: 0,
            stack_depth: 1,
            keys: &mut keys,
            handler_requests: &mut requests,
        };
        f(&mut env)
    }

    #[test]
    fn lifecycle_runs_in_order_exactly_once() {
        let clock = ManualClock::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut block = recorder_block(&log, false);

        drive(&clock, |env| {
            block.mount(env).unwrap();
            block.next(env).unwrap();
            block.next(env).unwrap();
            block.unmount(env).unwrap();
            block.dispose(env).unwrap();
        });
        assert_eq!(
            *log.borrow(),
            vec!["mount", "next", "next", "unmount", "dispose"]
        );
    }

    #[test]
    fn out_of_order_lifecycle_is_an_invariant_violation() {
        let clock = ManualClock::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut block = recorder_block(&log, false);

        drive(&clock, |env| {
            assert!(block.next(env).is_err());
            block.mount(env).unwrap();
            assert!(block.mount(env).is_err());
            assert!(block.dispose(env).is_err());
            block.unmount(env).unwrap();
            assert!(block.unmount(env).is_err());
            block.dispose(env).unwrap();
            assert!(block.dispose(env).is_err());
        });
    }

    #[test]
    fn completion_during_next_appends_pop() {
        let clock = ManualClock::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut block = recorder_block(&log, true);

        drive(&clock, |env| {
            block.mount(env).unwrap();
            let outcome = block.next(env).unwrap();
            assert!(matches!(
                outcome.actions.last(),
                Some(Action::PopBlock { key: Some(key) }) if *key == block.key()
            ));
        });
        assert_eq!(block.meta().completion_reason(), Some(CompletionReason::UserAdvanced));
    }

    #[test]
    fn dispose_releases_memory_and_runs_reverse_order() {
        struct Tagger(&'static str, Rc<RefCell<Vec<&'static str>>>);
        impl Behavior for Tagger {
            fn on_dispose(&mut self, _ctx: &mut BehaviorContext<'_>) {
                self.1.borrow_mut().push(self.0);
            }
        }

        let clock = ManualClock::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut block = Block::new(
            BlockKey(7),
            BlockKind::Timer,
            Vec::new(),
            Vec::new(),
            vec![
                Box::new(Tagger("first", Rc::clone(&order))),
                Box::new(Tagger("second", Rc::clone(&order))),
            ],
        );

        let releases = Rc::new(RefCell::new(0));
        drive(&clock, |env| {
            block.mount(env).unwrap();
            let handle = block
                .memory()
                .first(&MemoryTag::FragmentDisplay)
                .unwrap()
                .handle();
            let r = Rc::clone(&releases);
            // Leak the subscription so it outlives the release notification.
            std::mem::forget(handle.subscribe(move |new, _| {
                if new.is_none() {
                    *r.borrow_mut() += 1;
                }
            }));
            block.unmount(env).unwrap();
            block.dispose(env).unwrap();
        });

        assert_eq!(*order.borrow(), vec!["second", "first"]);
        assert_eq!(*releases.borrow(), 1);
        assert!(block.memory().locations().iter().all(MemoryLocation::is_released));
    }

    #[test]
    fn mark_complete_is_idempotent_first_reason_wins() {
        let mut meta = BlockMeta {
            key: BlockKey(1),
            kind: BlockKind::Effort,
            source_ids: Vec::new(),
            plan: Vec::new(),
            display_label: None,
            is_complete: false,
            completion_reason: None,
            timing: ExecutionTiming::default(),
        };
        meta.mark_complete(CompletionReason::TimerExpired);
        meta.mark_complete(CompletionReason::UserSkipped);
        assert_eq!(meta.completion_reason(), Some(CompletionReason::TimerExpired));
    }
}
