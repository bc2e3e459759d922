//! Scoped handler registration and match collection.
//!
//! The bus owns registrations; actually invoking a handler needs mutable
//! access to its block, so the session collects the match list here and walks
//! it itself. Matches are snapshotted up front, which is what makes delivery
//! at-most-once: a handler registered during dispatch never sees the event
//! that was in flight.

use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::block::BlockKey;
use crate::event::{EventKind, HandlerScope};

slotmap::new_key_type! {
    /// Key of one handler registration.
    pub struct RegistrationId;
}

/// One registered handler: an (owner block, behavior) pair with a scope.
#[derive(Clone, Debug)]
pub struct HandlerRegistration {
    /// Event to match.
    pub kind: EventKind,
    /// Block that owns the handler.
    pub owner: BlockKey,
    /// Behavior index within the owner that answers the event.
    pub behavior_index: usize,
    /// Visibility scope.
    pub scope: HandlerScope,
}

/// A matched handler, ready for the session to invoke.
#[derive(Clone, Copy, Debug)]
pub struct HandlerMatch {
    /// Registration that matched.
    pub id: RegistrationId,
    /// Owner block.
    pub owner: BlockKey,
    /// Behavior index within the owner.
    pub behavior_index: usize,
}

/// Registration store with per-event indexing in registration order.
#[derive(Debug, Default)]
pub struct EventBus {
    registrations: SlotMap<RegistrationId, HandlerRegistration>,
    by_kind: FxHashMap<EventKind, Vec<RegistrationId>>,
}

impl EventBus {
    /// New, empty bus.
    pub fn new() -> EventBus {
        EventBus::default()
    }

    /// Registers a handler; fires for matching events until unregistered.
    pub fn register(&mut self, registration: HandlerRegistration) -> RegistrationId {
        let kind = registration.kind;
        let id = self.registrations.insert(registration);
        self.by_kind.entry(kind).or_default().push(id);
        id
    }

    /// Removes one registration. Removing twice is a no-op.
    pub fn unregister(&mut self, id: RegistrationId) -> bool {
        let Some(registration) = self.registrations.remove(id) else {
            return false;
        };
        if let Some(ids) = self.by_kind.get_mut(&registration.kind) {
            ids.retain(|&other| other != id);
        }
        true
    }

    /// Removes every registration owned by `owner`. Called on unmount.
    pub fn unregister_owner(&mut self, owner: BlockKey) {
        let doomed: Vec<RegistrationId> = self
            .registrations
            .iter()
            .filter(|(_, reg)| reg.owner == owner)
            .map(|(id, _)| id)
            .collect();
        for id in doomed {
            self.unregister(id);
        }
    }

    /// Collects the handlers that fire for `kind` given the current stack, in
    /// registration order.
    ///
    /// Scope filtering: `Global` always fires; `Block` requires the owner on
    /// the stack; `Active` requires the owner on top.
    pub fn matching(&self, kind: EventKind, stack_keys: &[BlockKey]) -> SmallVec<[HandlerMatch; 4]> {
        let top = stack_keys.last().copied();
        let Some(ids) = self.by_kind.get(&kind) else {
            return SmallVec::new();
        };
        ids.iter()
            .filter_map(|&id| {
                let registration = self.registrations.get(id)?;
                let fires = match registration.scope {
                    HandlerScope::Global => true,
                    HandlerScope::Block => stack_keys.contains(&registration.owner),
                    HandlerScope::Active => top == Some(registration.owner),
                };
                fires.then_some(HandlerMatch {
                    id,
                    owner: registration.owner,
                    behavior_index: registration.behavior_index,
                })
            })
            .collect()
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(kind: EventKind, owner: u64, scope: HandlerScope) -> HandlerRegistration {
        HandlerRegistration {
            kind,
            owner: BlockKey(owner),
            behavior_index: 0,
            scope,
        }
    }

    #[test]
    fn scope_filtering_against_stack() {
        let mut bus = EventBus::new();
        bus.register(registration(EventKind::Stop, 0, HandlerScope::Block));
        bus.register(registration(EventKind::Stop, 1, HandlerScope::Active));
        bus.register(registration(EventKind::Stop, 9, HandlerScope::Global));

        // Both on stack, 1 on top: all three fire.
        let stack = [BlockKey(0), BlockKey(1)];
        let matches = bus.matching(EventKind::Stop, &stack);
        assert_eq!(matches.len(), 3);

        // 1 popped: the active handler goes quiet, the block and global ones
        // still fire.
        let stack = [BlockKey(0)];
        let matches = bus.matching(EventKind::Stop, &stack);
        let owners: Vec<BlockKey> = matches.iter().map(|m| m.owner).collect();
        assert_eq!(owners, vec![BlockKey(0), BlockKey(9)]);

        // Owner gone entirely: only global.
        let matches = bus.matching(EventKind::Stop, &[]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].owner, BlockKey(9));
    }

    #[test]
    fn matches_in_registration_order() {
        let mut bus = EventBus::new();
        for owner in 0..4 {
            bus.register(registration(EventKind::Tick, owner, HandlerScope::Global));
        }
        let matches = bus.matching(EventKind::Tick, &[]);
        let owners: Vec<u64> = matches.iter().map(|m| m.owner.0).collect();
        assert_eq!(owners, vec![0, 1, 2, 3]);
    }

    #[test]
    fn unregister_owner_clears_everything_it_owns() {
        let mut bus = EventBus::new();
        let keep = bus.register(registration(EventKind::Start, 1, HandlerScope::Global));
        bus.register(registration(EventKind::Start, 2, HandlerScope::Global));
        bus.register(registration(EventKind::Tick, 2, HandlerScope::Block));

        bus.unregister_owner(BlockKey(2));
        assert_eq!(bus.len(), 1);
        assert!(bus.unregister(keep));
        // Double unregister is a no-op.
        assert!(!bus.unregister(keep));
        assert!(bus.is_empty());
    }
}
