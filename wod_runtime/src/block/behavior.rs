//! The behavior capability set and its per-call context.
//!
//! Behaviors hold their own config but never own memory: all state lives in
//! the block's memory, reached through [`BehaviorContext`]. The context is
//! rebuilt for every hook call, so behaviors cannot retain runtime handles —
//! the cycle-free arena rule.

use tracing::warn;
use wod_script::Fragment;

use super::{BlockKey, BlockKind, BlockMeta, CompletionReason, HostEnv};
use crate::action::Action;
use crate::clock::Clock;
use crate::event::{Event, EventKind, HandlerResponse, HandlerScope};
use crate::memory::{
    BlockMemory, DisplayView, MemoryHandle, MemoryRead, MemoryTag, MemoryValue,
};

/// A pending handler registration, collected during hook execution and
/// registered with the bus by the session.
#[derive(Clone, Debug)]
pub struct HandlerRequest {
    /// Block that owns the handler.
    pub owner: BlockKey,
    /// Index of the behavior that answers the event.
    pub behavior_index: usize,
    /// Event to match.
    pub kind: EventKind,
    /// Visibility scope.
    pub scope: HandlerScope,
}

/// A composable unit of block logic.
///
/// Hooks run in behavior-list order (dispose in reverse) and return actions;
/// they must complete quickly — a hook is not a place to wait.
pub trait Behavior {
    /// Called once when the block is pushed.
    fn on_mount(&mut self, _ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        Vec::new()
    }

    /// Called on every pump cycle while the block is on top.
    fn on_next(&mut self, _ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        Vec::new()
    }

    /// Called once when the block is popped.
    fn on_unmount(&mut self, _ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        Vec::new()
    }

    /// Called once after unmount, in reverse list order.
    fn on_dispose(&mut self, _ctx: &mut BehaviorContext<'_>) {}

    /// Called for events the behavior registered for. `None` means "not
    /// interested after all".
    fn on_event(&mut self, _event: &Event, _ctx: &mut BehaviorContext<'_>) -> Option<HandlerResponse> {
        None
    }
}

/// Everything a behavior may touch during one hook call.
pub struct BehaviorContext<'a> {
    pub(crate) meta: &'a mut BlockMeta,
    pub(crate) memory: &'a mut BlockMemory,
    pub(crate) clock: &'a dyn Clock,
    pub(crate) stack_index: usize,
    pub(crate) stack_depth: usize,
    pub(crate) behavior_index: usize,
    pub(crate) env: EnvOps<'a>,
}

/// Mutable slices of the host environment threaded through the context.
pub(crate) struct EnvOps<'a> {
    pub keys: &'a mut super::KeySource,
    pub handler_requests: &'a mut Vec<HandlerRequest>,
}

impl<'a> BehaviorContext<'a> {
    pub(crate) fn new(
        meta: &'a mut BlockMeta,
        memory: &'a mut BlockMemory,
        env: &'a mut HostEnv<'_>,
        behavior_index: usize,
    ) -> BehaviorContext<'a> {
        BehaviorContext {
            meta,
            memory,
            clock: env.clock,
            stack_index: env.stack_index,
            stack_depth: env.stack_depth,
            behavior_index,
            env: EnvOps {
                keys: &mut *env.keys,
                handler_requests: &mut *env.handler_requests,
            },
        }
    }

    /// Current time per the session clock.
    pub fn now(&self) -> wod_script::EpochMs {
        self.clock.now()
    }

    /// Key of the owning block.
    pub fn key(&self) -> BlockKey {
        self.meta.key
    }

    /// Kind of the owning block.
    pub fn kind(&self) -> BlockKind {
        self.meta.kind
    }

    /// Index of the owning block on the stack (0 = root).
    pub fn stack_index(&self) -> usize {
        self.stack_index
    }

    /// Current stack depth.
    pub fn stack_depth(&self) -> usize {
        self.stack_depth
    }

    /// Whether the block has been marked complete.
    pub fn is_complete(&self) -> bool {
        self.meta.is_complete()
    }

    /// When the block mounted, if it has.
    pub fn started_at(&self) -> Option<wod_script::EpochMs> {
        self.meta.timing.started
    }

    /// Marks the block complete. Idempotent; the first reason wins.
    pub fn mark_complete(&mut self, reason: CompletionReason) {
        self.meta.mark_complete(reason);
    }

    /// The block's plan fragment groups.
    pub fn plan_groups(&self) -> &[Vec<Fragment>] {
        self.meta.plan()
    }

    /// The block's plan fragments, flattened.
    pub fn plan_fragments(&self) -> Vec<Fragment> {
        self.meta.plan_fragments()
    }

    /// The precedence-resolved display view of this block.
    pub fn display_view(&self) -> DisplayView {
        let handle = self
            .memory
            .first(&MemoryTag::FragmentDisplay)
            .map(|location| location.handle());
        match handle {
            Some(handle) => DisplayView::new(self.meta.plan_fragments(), handle),
            // Pre-mount there is no override slot yet; resolve the plan alone.
            None => {
                let mut scratch = BlockMemory::default();
                let handle = scratch.push(MemoryTag::FragmentDisplay, MemoryValue::Fragments(vec![]));
                DisplayView::new(self.meta.plan_fragments(), handle)
            }
        }
    }

    /// Read-only access to the block's memory.
    pub fn memory(&self) -> &BlockMemory {
        self.memory
    }

    /// Typed read of the first slot with `tag`.
    pub fn get_memory<T: MemoryRead>(&self, tag: &MemoryTag) -> Option<T> {
        self.memory
            .first(tag)
            .and_then(|location| location.value())
            .as_ref()
            .and_then(T::read)
    }

    /// Allocates a new slot.
    pub fn push_memory(&mut self, tag: MemoryTag, value: MemoryValue) -> MemoryHandle {
        self.memory.push(tag, value)
    }

    /// Updates the first slot with `tag`, allocating it if absent.
    pub fn set_memory(&mut self, tag: MemoryTag, value: MemoryValue) {
        if self.memory.first(&tag).is_none() {
            self.memory.push(tag, value);
            return;
        }
        self.update_memory(tag, value);
    }

    /// Updates the first slot with `tag`. A miss or a released slot is logged
    /// and dropped, per the local-recovery policy.
    pub fn update_memory(&mut self, tag: MemoryTag, value: MemoryValue) {
        if let Err(tag) = self.memory.update(&tag, value) {
            warn!(block = %self.meta.key, %tag, "dropped write to missing or released memory");
        }
    }

    /// Appends runtime fragments to the block's `fragment:display` overrides.
    pub fn push_display_fragments(&mut self, fragments: impl IntoIterator<Item = Fragment>) {
        let mut current: Vec<Fragment> = self
            .get_memory::<Vec<Fragment>>(&MemoryTag::FragmentDisplay)
            .unwrap_or_default();
        current.extend(fragments);
        self.set_memory(MemoryTag::FragmentDisplay, MemoryValue::Fragments(current));
    }

    /// Replaces same-kind fragments in the `fragment:display` overrides with
    /// `fragment` (a moving value like the round counter, not an accumulation).
    pub fn set_display_fragment(&mut self, fragment: Fragment) {
        let mut current: Vec<Fragment> = self
            .get_memory::<Vec<Fragment>>(&MemoryTag::FragmentDisplay)
            .unwrap_or_default();
        current.retain(|existing| existing.kind() != fragment.kind());
        current.push(fragment);
        self.set_memory(MemoryTag::FragmentDisplay, MemoryValue::Fragments(current));
    }

    /// Sets the label shown in stack snapshots.
    pub fn set_display_label(&mut self, label: impl Into<String>) {
        self.meta.display_label = Some(label.into());
    }

    /// Requests a handler registration for this behavior. Usually called from
    /// `on_mount`; the session registers it once the hook returns.
    pub fn register_handler(&mut self, kind: EventKind, scope: HandlerScope) {
        self.env.handler_requests.push(HandlerRequest {
            owner: self.meta.key,
            behavior_index: self.behavior_index,
            kind,
            scope,
        });
    }

    /// Allocates a fresh block key (for behaviors that build blocks, e.g. the
    /// idle-gate injector).
    pub fn alloc_key(&mut self) -> BlockKey {
        self.env.keys.alloc()
    }
}
