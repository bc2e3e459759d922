//! A single tagged, subscribable memory slot.
//!
//! The owning block holds the [`MemoryLocation`]; everything else sees the
//! slot through weak [`MemoryHandle`]s, so a released location can never be
//! revived by a stale reader.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use slotmap::SlotMap;

use super::{MemoryTag, MemoryValue};
use crate::subscriber::ListenerKey;

/// Listener signature: `(new, old)`; release delivers `(None, last)` once.
pub type MemoryListener = Box<dyn FnMut(Option<&MemoryValue>, Option<&MemoryValue>)>;

pub(super) struct LocationInner {
    tag: MemoryTag,
    value: MemoryValue,
    released: bool,
    listeners: SlotMap<ListenerKey, Option<MemoryListener>>,
    order: Vec<ListenerKey>,
}

/// An owned memory slot. Created by a behavior (through its context) or by
/// block construction; released exactly once when the block is disposed.
pub struct MemoryLocation {
    inner: Rc<RefCell<LocationInner>>,
}

impl MemoryLocation {
    pub(super) fn new(tag: MemoryTag, value: MemoryValue) -> MemoryLocation {
        MemoryLocation {
            inner: Rc::new(RefCell::new(LocationInner {
                tag,
                value,
                released: false,
                listeners: SlotMap::with_key(),
                order: Vec::new(),
            })),
        }
    }

    /// The slot's tag.
    pub fn tag(&self) -> MemoryTag {
        self.inner.borrow().tag.clone()
    }

    /// A clone of the current value, or `None` once released.
    pub fn value(&self) -> Option<MemoryValue> {
        let inner = self.inner.borrow();
        (!inner.released).then(|| inner.value.clone())
    }

    /// Replaces the value and notifies subscribers with `(new, old)`.
    /// A write of an equal value is a no-op (no notification); a write to a
    /// released slot is rejected. Returns whether the value changed.
    pub fn update(&self, value: MemoryValue) -> Result<bool, MemoryTag> {
        let old = {
            let mut inner = self.inner.borrow_mut();
            if inner.released {
                return Err(inner.tag.clone());
            }
            if inner.value == value {
                return Ok(false);
            }
            std::mem::replace(&mut inner.value, value.clone())
        };
        notify(&self.inner, Some(&value), Some(&old));
        Ok(true)
    }

    /// Registers a listener; notified synchronously on every change, in
    /// registration order.
    pub fn subscribe(&self, listener: impl FnMut(Option<&MemoryValue>, Option<&MemoryValue>) + 'static) -> MemorySubscription {
        subscribe_inner(&self.inner, Box::new(listener))
    }

    /// A weak external view of this slot.
    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            tag: self.tag(),
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Releases the slot: every subscriber gets exactly one `(None, last)`
    /// call, then the listener set is dropped. Idempotent.
    pub fn release(&self) {
        let last = {
            let mut inner = self.inner.borrow_mut();
            if inner.released {
                return;
            }
            inner.released = true;
            inner.value.clone()
        };
        notify(&self.inner, None, Some(&last));
        let mut inner = self.inner.borrow_mut();
        inner.listeners.clear();
        inner.order.clear();
    }

    /// True once released.
    pub fn is_released(&self) -> bool {
        self.inner.borrow().released
    }
}

impl std::fmt::Debug for MemoryLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MemoryLocation")
            .field("tag", &inner.tag)
            .field("released", &inner.released)
            .field("subscribers", &inner.listeners.len())
            .finish_non_exhaustive()
    }
}

/// Weak read/subscribe view of a [`MemoryLocation`]. Never keeps the slot
/// alive past its owning block.
#[derive(Clone)]
pub struct MemoryHandle {
    tag: MemoryTag,
    inner: Weak<RefCell<LocationInner>>,
}

impl MemoryHandle {
    /// The slot's tag.
    pub fn tag(&self) -> &MemoryTag {
        &self.tag
    }

    /// A clone of the current value; `None` once released or dropped.
    pub fn value(&self) -> Option<MemoryValue> {
        let inner = self.inner.upgrade()?;
        let inner = inner.borrow();
        (!inner.released).then(|| inner.value.clone())
    }

    /// Registers a listener, if the slot is still live.
    pub fn subscribe(&self, listener: impl FnMut(Option<&MemoryValue>, Option<&MemoryValue>) + 'static) -> Option<MemorySubscription> {
        let inner = self.inner.upgrade()?;
        if inner.borrow().released {
            return None;
        }
        Some(subscribe_inner(&inner, Box::new(listener)))
    }

    /// True when the slot has been released or its block dropped.
    pub fn is_released(&self) -> bool {
        self.inner
            .upgrade()
            .is_none_or(|inner| inner.borrow().released)
    }
}

impl std::fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHandle")
            .field("tag", &self.tag)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Unsubscribe capability for a memory listener. Dropping it removes the
/// listener; releasing twice is a no-op.
pub struct MemorySubscription {
    inner: Weak<RefCell<LocationInner>>,
    key: ListenerKey,
    released: bool,
}

impl MemorySubscription {
    /// Removes the listener now instead of at drop.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.borrow_mut();
            inner.listeners.remove(self.key);
            inner.order.retain(|&k| k != self.key);
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

fn subscribe_inner(inner: &Rc<RefCell<LocationInner>>, listener: MemoryListener) -> MemorySubscription {
    let key = {
        let mut borrow = inner.borrow_mut();
        let key = borrow.listeners.insert(Some(listener));
        borrow.order.push(key);
        key
    };
    MemorySubscription {
        inner: Rc::downgrade(inner),
        key,
        released: false,
    }
}

// Take-call-return so listeners can touch the registry from inside the
// callback without a double borrow.
fn notify(inner: &Rc<RefCell<LocationInner>>, new: Option<&MemoryValue>, old: Option<&MemoryValue>) {
    let keys: Vec<ListenerKey> = inner.borrow().order.clone();
    for key in keys {
        let taken = inner.borrow_mut().listeners.get_mut(key).and_then(Option::take);
        let Some(mut listener) = taken else {
            continue;
        };
        listener(new, old);
        if let Some(slot) = inner.borrow_mut().listeners.get_mut(key) {
            *slot = Some(listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::super::MemoryValue;
    use super::*;

    fn flag_location(value: bool) -> MemoryLocation {
        MemoryLocation::new(MemoryTag::Handler("rest".into()), MemoryValue::Flag(value))
    }

    #[test]
    fn update_notifies_with_new_and_old() {
        let location = flag_location(false);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = location.subscribe(move |new, old| {
            s.borrow_mut().push((new.cloned(), old.cloned()));
        });

        location.update(MemoryValue::Flag(true)).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![(Some(MemoryValue::Flag(true)), Some(MemoryValue::Flag(false)))]
        );
    }

    #[test]
    fn release_notifies_once_and_rejects_updates() {
        let location = flag_location(true);
        let releases = Rc::new(RefCell::new(0));
        let r = Rc::clone(&releases);
        let _sub = location.subscribe(move |new, old| {
            if new.is_none() {
                assert_eq!(old, Some(&MemoryValue::Flag(true)));
                *r.borrow_mut() += 1;
            }
        });

        location.release();
        location.release();
        assert_eq!(*releases.borrow(), 1);
        assert!(location.update(MemoryValue::Flag(false)).is_err());
        assert_eq!(location.value(), None);
    }

    #[test]
    fn handle_outlives_location_safely() {
        let location = flag_location(true);
        let handle = location.handle();
        assert_eq!(handle.value(), Some(MemoryValue::Flag(true)));

        drop(location);
        assert!(handle.is_released());
        assert_eq!(handle.value(), None);
        assert!(handle.subscribe(|_, _| {}).is_none());
    }

    #[test]
    fn unsubscribed_listener_not_called() {
        let location = flag_location(false);
        let count = Rc::new(RefCell::new(0));
        let c = Rc::clone(&count);
        let sub = location.subscribe(move |_, _| *c.borrow_mut() += 1);

        location.update(MemoryValue::Flag(true)).unwrap();
        sub.unsubscribe();
        location.update(MemoryValue::Flag(false)).unwrap();
        assert_eq!(*count.borrow(), 1);
    }
}
