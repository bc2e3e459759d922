//! Session-level subscriber registries (stack, output, UI feeds).
//!
//! Listeners are plain `FnMut` closures invoked synchronously, in registration
//! order. Unsubscribing is a capability: dropping (or explicitly releasing)
//! the returned [`FeedSubscription`] removes the listener; releasing twice is
//! a no-op.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Key for one registered listener.
    pub struct ListenerKey;
}

type Listener<T> = Box<dyn FnMut(&T)>;

struct Registry<T> {
    // `Option` so a listener can be taken out during notification, letting it
    // re-enter the registry (subscribe/unsubscribe) without aliasing.
    listeners: SlotMap<ListenerKey, Option<Listener<T>>>,
    order: Vec<ListenerKey>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Registry {
            listeners: SlotMap::with_key(),
            order: Vec::new(),
        }
    }
}

/// A set of listeners for one feed of `T` values.
pub(crate) struct SubscriberSet<T> {
    inner: Rc<RefCell<Registry<T>>>,
}

impl<T> Default for SubscriberSet<T> {
    fn default() -> Self {
        SubscriberSet {
            inner: Rc::new(RefCell::new(Registry::default())),
        }
    }
}

impl<T: 'static> SubscriberSet<T> {
    /// Registers `listener`; it stays live until the returned subscription is
    /// released or dropped.
    pub fn subscribe(&self, listener: impl FnMut(&T) + 'static) -> FeedSubscription {
        let mut registry = self.inner.borrow_mut();
        let key = registry.listeners.insert(Some(Box::new(listener)));
        registry.order.push(key);
        FeedSubscription {
            release: ReleaseFn::new(Rc::downgrade(&self.inner), key),
        }
    }

    /// Invokes every live listener with `value`, in registration order.
    pub fn notify(&self, value: &T) {
        let keys: Vec<ListenerKey> = self.inner.borrow().order.clone();
        for key in keys {
            let taken = self
                .inner
                .borrow_mut()
                .listeners
                .get_mut(key)
                .and_then(Option::take);
            let Some(mut listener) = taken else {
                continue;
            };
            listener(value);
            // Put it back unless it unsubscribed itself meanwhile.
            if let Some(slot) = self.inner.borrow_mut().listeners.get_mut(key) {
                *slot = Some(listener);
            }
        }
    }

    /// Number of live listeners.
    pub fn len(&self) -> usize {
        self.inner.borrow().listeners.len()
    }
}

/// Type-erased removal closure shared by all registries.
struct ReleaseFn {
    remove: Option<Box<dyn FnOnce()>>,
}

impl ReleaseFn {
    fn new<T: 'static>(registry: Weak<RefCell<Registry<T>>>, key: ListenerKey) -> ReleaseFn {
        ReleaseFn {
            remove: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    let mut registry = registry.borrow_mut();
                    registry.listeners.remove(key);
                    registry.order.retain(|&k| k != key);
                }
            })),
        }
    }
}

/// Unsubscribe capability for a session feed. Dropping it releases the
/// listener; [`FeedSubscription::unsubscribe`] does the same eagerly.
pub struct FeedSubscription {
    release: ReleaseFn,
}

impl FeedSubscription {
    /// Removes the listener. Safe to call after the feed is gone.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(remove) = self.release.remove.take() {
            remove();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn notifies_in_registration_order() {
        let set = SubscriberSet::<u32>::default();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let a = Rc::clone(&seen);
        let _sub_a = set.subscribe(move |v| a.borrow_mut().push(("a", *v)));
        let b = Rc::clone(&seen);
        let _sub_b = set.subscribe(move |v| b.borrow_mut().push(("b", *v)));

        set.notify(&7);
        assert_eq!(*seen.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_drop_releases() {
        let set = SubscriberSet::<u32>::default();
        let seen = Rc::new(RefCell::new(0_u32));

        let s = Rc::clone(&seen);
        let sub = set.subscribe(move |v| *s.borrow_mut() += *v);
        set.notify(&1);
        sub.unsubscribe();
        set.notify(&1);
        assert_eq!(*seen.borrow(), 1);

        let s = Rc::clone(&seen);
        {
            let _sub = set.subscribe(move |v| *s.borrow_mut() += *v);
            set.notify(&10);
        }
        set.notify(&10);
        assert_eq!(*seen.borrow(), 11);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_notify() {
        let set = SubscriberSet::<u32>::default();
        let slot: Rc<RefCell<Option<FeedSubscription>>> = Rc::new(RefCell::new(None));
        let count = Rc::new(RefCell::new(0_u32));

        let slot2 = Rc::clone(&slot);
        let count2 = Rc::clone(&count);
        let sub = set.subscribe(move |_| {
            *count2.borrow_mut() += 1;
            // Release own subscription from inside the callback.
            if let Some(sub) = slot2.borrow_mut().take() {
                sub.unsubscribe();
            }
        });
        *slot.borrow_mut() = Some(sub);

        set.notify(&0);
        set.notify(&0);
        assert_eq!(*count.borrow(), 1);
    }
}
