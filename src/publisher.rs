//! Typed event publisher for lifecycle notifications.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Handle returned by [`Publisher::subscribe`]; pass it back to
/// [`Publisher::unsubscribe`] to remove the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<E> = Rc<RefCell<dyn FnMut(&E)>>;

struct Registry<E> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Callback<E>)>,
}

/// A list of typed observers, dispatched to on the network sequence.
///
/// Dispatch snapshots the subscriber list first, so a callback may subscribe
/// or unsubscribe (through a clone of the publisher) without affecting the
/// in-flight delivery. A callback that re-entrantly publishes is skipped for
/// that inner dispatch rather than borrowed twice.
pub struct Publisher<E> {
    registry: Rc<RefCell<Registry<E>>>,
}

impl<E> Clone for Publisher<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Rc::clone(&self.registry),
        }
    }
}

impl<E> Default for Publisher<E> {
    fn default() -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }
}

impl<E> Publisher<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl FnMut(&E) + 'static) -> SubscriptionId {
        let mut registry = self.registry.borrow_mut();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry
            .subscribers
            .push((id, Rc::new(RefCell::new(callback)) as Callback<E>));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.borrow_mut();
        let before = registry.subscribers.len();
        registry.subscribers.retain(|(sub, _)| *sub != id);
        registry.subscribers.len() != before
    }

    pub fn publish(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .registry
            .borrow()
            .subscribers
            .iter()
            .map(|(_, callback)| Rc::clone(callback))
            .collect();

        for callback in snapshot {
            if let Ok(mut callback) = callback.try_borrow_mut() {
                (*callback)(event);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.borrow().subscribers.len()
    }
}

impl<E> fmt::Debug for Publisher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delivers_to_every_subscriber() {
        let publisher = Publisher::<u32>::new();
        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));

        let sink = Rc::clone(&first);
        publisher.subscribe(move |event| sink.set(*event));
        let sink = Rc::clone(&second);
        publisher.subscribe(move |event| sink.set(*event));

        publisher.publish(&7);

        assert_eq!(first.get(), 7);
        assert_eq!(second.get(), 7);
    }

    #[test]
    fn unsubscribed_callbacks_are_not_invoked() {
        let publisher = Publisher::<u32>::new();
        let count = Rc::new(Cell::new(0));

        let sink = Rc::clone(&count);
        let id = publisher.subscribe(move |_| sink.set(sink.get() + 1));

        publisher.publish(&1);
        assert!(publisher.unsubscribe(id));
        assert!(!publisher.unsubscribe(id));
        publisher.publish(&2);

        assert_eq!(count.get(), 1);
    }

    #[test]
    fn a_callback_may_unsubscribe_itself_during_dispatch() {
        let publisher = Publisher::<u32>::new();
        let count = Rc::new(Cell::new(0));

        let handle = publisher.clone();
        let id = Rc::new(Cell::new(None));

        let sink = Rc::clone(&count);
        let own_id = Rc::clone(&id);
        let subscription = publisher.subscribe(move |_| {
            sink.set(sink.get() + 1);
            if let Some(id) = own_id.get() {
                handle.unsubscribe(id);
            }
        });
        id.set(Some(subscription));

        publisher.publish(&1);
        publisher.publish(&2);

        assert_eq!(count.get(), 1);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn a_subscription_added_during_dispatch_misses_the_current_event() {
        let publisher = Publisher::<u32>::new();
        let late = Rc::new(Cell::new(0));

        let handle = publisher.clone();
        let late_sink = Rc::clone(&late);
        publisher.subscribe(move |_| {
            let sink = Rc::clone(&late_sink);
            handle.subscribe(move |event| sink.set(*event));
        });

        publisher.publish(&1);
        assert_eq!(late.get(), 0);

        publisher.publish(&2);
        assert_eq!(late.get(), 2);
    }
}
