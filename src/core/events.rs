//! Telemetry fan-out
//! Subscribers register a callback per event; `publish` calls each of them
//! synchronously, in unspecified order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::core::bluetooth::protocol::HeightSample;

/// Events published on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeskEvent {
    /// A new height/speed sample arrived (notification or poll)
    HeightChanged,
}

pub type SampleCallback = Arc<dyn Fn(HeightSample) + Send + Sync>;

/// Returned by `subscribe`, consumed by `unsubscribe`
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    event: DeskEvent,
    id: u64,
}

impl SubscriptionHandle {
    pub fn event(&self) -> DeskEvent {
        self.event
    }
}

/// Per-event subscriber registry
///
/// The registry lock is never held while callbacks run: `publish` takes a
/// snapshot first, so a callback may subscribe or unsubscribe (itself included)
/// without deadlocking. A removal made during a dispatch is complete before the
/// next `publish` starts.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<DeskEvent, Vec<(u64, SampleCallback)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<DeskEvent, Vec<(u64, SampleCallback)>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<F>(&self, event: DeskEvent, callback: F) -> SubscriptionHandle
    where
        F: Fn(HeightSample) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry()
            .entry(event)
            .or_default()
            .push((id, Arc::new(callback)));
        debug!("Subscriber {} added for {:?}", id, event);
        SubscriptionHandle { event, id }
    }

    /// Removes a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut registry = self.registry();
        let Some(callbacks) = registry.get_mut(&handle.event) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(id, _)| *id != handle.id);
        let removed = callbacks.len() != before;
        if removed {
            debug!("Subscriber {} removed from {:?}", handle.id, handle.event);
        }
        removed
    }

    pub fn publish(&self, event: DeskEvent, sample: HeightSample) {
        let snapshot: Vec<SampleCallback> = match self.registry().get(&event) {
            Some(callbacks) => callbacks.iter().map(|(_, cb)| cb.clone()).collect(),
            None => return,
        };

        for callback in snapshot {
            callback(sample);
        }
    }

    pub fn subscriber_count(&self, event: DeskEvent) -> usize {
        self.registry().get(&event).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sample(height: f64) -> HeightSample {
        HeightSample::new(height, 0.0)
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            bus.subscribe(DeskEvent::HeightChanged, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.publish(DeskEvent::HeightChanged, sample(100.0));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_is_idempotent() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let handle = bus.subscribe(DeskEvent::HeightChanged, move |s| {
            seen_cb.lock().unwrap().push(s.height_mm);
        });

        bus.publish(DeskEvent::HeightChanged, sample(1.0));
        assert!(bus.unsubscribe(&handle));
        assert!(!bus.unsubscribe(&handle));
        bus.publish(DeskEvent::HeightChanged, sample(2.0));

        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
        assert_eq!(bus.subscriber_count(DeskEvent::HeightChanged), 0);
    }

    #[test]
    fn test_callback_can_remove_itself_during_dispatch() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        let bus_cb = bus.clone();
        let calls_cb = calls.clone();
        let slot_cb = slot.clone();
        let handle = bus.subscribe(DeskEvent::HeightChanged, move |_| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = slot_cb.lock().unwrap().take() {
                bus_cb.unsubscribe(&handle);
            }
        });
        *slot.lock().unwrap() = Some(handle);

        bus.publish(DeskEvent::HeightChanged, sample(1.0));
        bus.publish(DeskEvent::HeightChanged, sample(2.0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removal_during_dispatch_keeps_current_delivery() {
        let bus = Arc::new(EventBus::new());
        let second_calls = Arc::new(AtomicUsize::new(0));
        let second_slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        let bus_cb = bus.clone();
        let slot_cb = second_slot.clone();
        bus.subscribe(DeskEvent::HeightChanged, move |_| {
            if let Some(handle) = slot_cb.lock().unwrap().as_ref() {
                bus_cb.unsubscribe(handle);
            }
        });
        let counter = second_calls.clone();
        let second = bus.subscribe(DeskEvent::HeightChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        *second_slot.lock().unwrap() = Some(second);

        bus.publish(DeskEvent::HeightChanged, sample(1.0));
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        bus.publish(DeskEvent::HeightChanged, sample(2.0));
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_during_dispatch_does_not_deadlock() {
        let bus = Arc::new(EventBus::new());
        let bus_cb = bus.clone();
        bus.subscribe(DeskEvent::HeightChanged, move |_| {
            bus_cb.subscribe(DeskEvent::HeightChanged, |_| {});
        });

        bus.publish(DeskEvent::HeightChanged, sample(1.0));
        assert_eq!(bus.subscriber_count(DeskEvent::HeightChanged), 2);
    }
}
