use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ShareError;
use crate::network::types::{ConnectionStatus, NetworkInterface, RateSample};

/// Notifications pushed to observers of the connection state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    /// Only sent when the status actually changed
    StatusChanged(ConnectionStatus),
    /// Device or upstream changed; `None` means forgotten
    InterfaceChanged {
        device: Option<NetworkInterface>,
        upstream: Option<NetworkInterface>,
    },
    BusyChanged(bool),
    RateChanged(RateSample),
    Error(ShareError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&StateEvent) + Send + Sync>;

/// Observer registry. Delivery is synchronous, on whichever task mutated the
/// state, in subscription order.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns false when `id` was not (or no longer) subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn emit(&self, event: StateEvent) {
        // Snapshot first: a listener may subscribe or unsubscribe re-entrantly.
        let listeners: Vec<Listener> = self.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(bus: &EventBus) -> (SubscriptionId, Arc<Mutex<Vec<StateEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = bus.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        (id, seen)
    }

    #[test]
    fn test_delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let (_, a) = recorder(&bus);
        let (_, b) = recorder(&bus);
        bus.emit(StateEvent::BusyChanged(true));
        assert_eq!(*a.lock().unwrap(), vec![StateEvent::BusyChanged(true)]);
        assert_eq!(*b.lock().unwrap(), vec![StateEvent::BusyChanged(true)]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (id, seen) = recorder(&bus);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(StateEvent::StatusChanged(ConnectionStatus::Connected));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let (bus2, slot2) = (bus.clone(), slot.clone());
        let id = bus.subscribe(move |_| {
            if let Some(id) = *slot2.lock().unwrap() {
                bus2.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        bus.emit(StateEvent::BusyChanged(false));
        assert_eq!(bus.listener_count(), 0);
    }
}
