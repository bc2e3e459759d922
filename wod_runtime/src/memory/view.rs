//! Typed read/subscribe views over memory slots.
//!
//! The old duck-typed "shim" (`.value` plus `subscribe` on an ad-hoc object)
//! becomes a trait: [`MemoryView`] with one concrete impl per tag family.
//! [`TypedView`] covers the behavior-state tags; the `fragment:display` view
//! lives in [`super::display`] since it resolves rather than reads.

use std::marker::PhantomData;

use wod_script::Fragment;

use super::location::{MemoryHandle, MemorySubscription};
use super::state::{ChildrenStatus, RoundState, TimerState};
use super::MemoryValue;

/// Extraction of a typed value out of a [`MemoryValue`].
pub trait MemoryRead: Sized {
    /// Returns the typed value if the variant matches.
    fn read(value: &MemoryValue) -> Option<Self>;
}

impl MemoryRead for TimerState {
    fn read(value: &MemoryValue) -> Option<Self> {
        match value {
            MemoryValue::Timer(state) => Some(state.clone()),
            _ => None,
        }
    }
}

impl MemoryRead for RoundState {
    fn read(value: &MemoryValue) -> Option<Self> {
        match value {
            MemoryValue::Round(state) => Some(*state),
            _ => None,
        }
    }
}

impl MemoryRead for ChildrenStatus {
    fn read(value: &MemoryValue) -> Option<Self> {
        match value {
            MemoryValue::Children(status) => Some(*status),
            _ => None,
        }
    }
}

impl MemoryRead for Vec<Fragment> {
    fn read(value: &MemoryValue) -> Option<Self> {
        match value {
            MemoryValue::Fragments(fragments) => Some(fragments.clone()),
            _ => None,
        }
    }
}

impl MemoryRead for bool {
    fn read(value: &MemoryValue) -> Option<Self> {
        match value {
            MemoryValue::Flag(flag) => Some(*flag),
            _ => None,
        }
    }
}

/// A `.value()` + `.subscribe()` view of some slice of block memory.
pub trait MemoryView {
    /// What the view yields.
    type Value;

    /// Current value, `None` once the backing slot is gone.
    fn value(&self) -> Option<Self::Value>;

    /// Subscribes to changes with `(new, old)` typed values; returns `None`
    /// when the backing slot is already gone.
    fn subscribe(
        &self,
        listener: impl FnMut(Option<Self::Value>, Option<Self::Value>) + 'static,
    ) -> Option<MemorySubscription>;
}

/// Typed view over the first slot with a given tag.
pub struct TypedView<T> {
    handle: MemoryHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedView<T> {
    /// Wraps a handle.
    pub fn new(handle: MemoryHandle) -> TypedView<T> {
        TypedView {
            handle,
            _marker: PhantomData,
        }
    }

    /// The underlying handle.
    pub fn handle(&self) -> &MemoryHandle {
        &self.handle
    }
}

impl<T: MemoryRead + 'static> MemoryView for TypedView<T> {
    type Value = T;

    fn value(&self) -> Option<T> {
        self.handle.value().as_ref().and_then(T::read)
    }

    fn subscribe(
        &self,
        mut listener: impl FnMut(Option<T>, Option<T>) + 'static,
    ) -> Option<MemorySubscription> {
        self.handle.subscribe(move |new, old| {
            listener(new.and_then(T::read), old.and_then(T::read));
        })
    }
}
