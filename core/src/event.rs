use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};
use crossbeam_skiplist::SkipSet;

/// A notification that can be dispatched to listeners.
pub trait Event: fmt::Debug + Send + Sync {}

type Callback<E> = dyn Fn(&E) + Send + Sync;

struct ListenerEntry<E: Event> {
    // Weak so that dropping the `Listener` deregisters it.
    callback: Weak<Callback<E>>,
    order: usize,
}

impl<E: Event> Eq for ListenerEntry<E> {}

impl<E: Event> PartialEq for ListenerEntry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl<E: Event> Ord for ListenerEntry<E> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order.cmp(&other.order)
    }
}

impl<E: Event> PartialOrd for ListenerEntry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

static LISTENER_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Listeners for one event type, called in registration order.
///
/// Listeners only ever receive a shared reference to the event, so an observer can never
/// write back into the state of whatever emitted it.
pub struct ListenerList<E: Event> {
    inner: SkipSet<ListenerEntry<E>>,
}

impl<E: Event + 'static> ListenerList<E> {
    pub fn new() -> Self {
        ListenerList {
            inner: SkipSet::new(),
        }
    }

    /// Calls every live listener with `event`. Entries whose `Listener` has been dropped are
    /// removed along the way.
    ///
    /// Crate-private: only emitters inside this crate dispatch.
    pub(crate) fn dispatch(&self, event: &E) {
        for entry in self.inner.iter() {
            match entry.callback.upgrade() {
                Some(callback) => callback(event),
                None => {
                    entry.remove();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<E: Event + 'static> Default for ListenerList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for ListenerList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerList")
            .field("listener_count", &self.inner.len())
            .finish()
    }
}

/// An active listener registration. Keep it alive for as long as the callback should fire;
/// dropping it deregisters the callback.
pub struct Listener<E: Event> {
    #[allow(dead_code)] // held for its strong count only
    arc: Arc<Callback<E>>,
    order: usize,
}

impl<E: Event + 'static> Listener<E> {
    pub fn new<F>(listeners: &ListenerList<E>, callback: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let order = LISTENER_ID_COUNTER.fetch_add(1, Ordering::SeqCst);
        let arc: Arc<Callback<E>> = Arc::new(callback);
        listeners.inner.insert(ListenerEntry {
            callback: Arc::downgrade(&arc),
            order,
        });
        Listener { arc, order }
    }
}

impl<E: Event> fmt::Debug for Listener<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("order", &self.order).finish()
    }
}

/// Defines a struct with one public [`ListenerList`] field per event type.
macro_rules! define_event_listeners {
    ($(#[$meta:meta])* $struct_name:ident { $($field_name:ident: $event_type:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Default)]
        pub struct $struct_name {
            $(
                pub $field_name: $crate::event::ListenerList<$event_type>,
            )*
        }

        impl $struct_name {
            pub fn new() -> Self {
                Self {
                    $(
                        $field_name: $crate::event::ListenerList::new(),
                    )*
                }
            }
        }
    };
}

pub(crate) use define_event_listeners;
