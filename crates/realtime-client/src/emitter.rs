//! String-keyed multi-listener event emitter.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::events::Event;

/// Handle returned by [`EventEmitter::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Synchronous emitter: `emit` calls every listener registered for the
/// event's name, in the caller's task.
///
/// Listeners may call `on`/`off` (or any client method) from inside a
/// callback. A listener removed while an emit is in flight is not invoked by
/// that emit. A panicking listener is logged and does not stop the others.
pub struct EventEmitter {
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners
            .entry(event.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered under `event`.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let Some(set) = listeners.get_mut(event) else {
            return false;
        };
        let before = set.len();
        set.retain(|(lid, _)| *lid != id);
        let removed = set.len() != before;
        if set.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Dispatch `event` to its listeners. Returns how many were invoked.
    pub fn emit(&self, event: &Event) -> usize {
        let name = event.name();
        let snapshot: Vec<(ListenerId, Handler)> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            match listeners.get(name.as_ref()) {
                Some(set) => set.clone(),
                None => return 0,
            }
        };

        let mut invoked = 0;
        for (id, handler) in snapshot {
            if !self.is_registered(&name, id) {
                continue;
            }
            invoked += 1;
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(event = %name, "event listener panicked");
            }
        }
        invoked
    }

    pub fn listener_count(&self, event: &str) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.get(event).map_or(0, Vec::len)
    }

    /// Names with at least one listener, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = listeners.keys().cloned().collect();
        names.sort();
        names
    }

    fn is_registered(&self, event: &str, id: ListenerId) -> bool {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners
            .get(event)
            .is_some_and(|set| set.iter().any(|(lid, _)| *lid == id))
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::events::names;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &Event| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn emit_with_no_listeners() {
        let emitter = EventEmitter::new();
        assert_eq!(emitter.emit(&Event::Connected), 0);
    }

    #[test]
    fn every_listener_runs_once() {
        let emitter = EventEmitter::new();
        let (a, fa) = counter();
        let (b, fb) = counter();
        emitter.on(names::CONNECTED, fa);
        emitter.on(names::CONNECTED, fb);

        assert_eq!(emitter.emit(&Event::Connected), 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_only_see_their_event() {
        let emitter = EventEmitter::new();
        let (count, f) = counter();
        emitter.on(names::AUTHENTICATED, f);
        emitter.emit(&Event::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn off_stops_delivery() {
        let emitter = EventEmitter::new();
        let (count, f) = counter();
        let id = emitter.on(names::CONNECTED, f);
        assert!(emitter.off(names::CONNECTED, id));
        assert!(!emitter.off(names::CONNECTED, id));
        emitter.emit(&Event::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(emitter.event_names().is_empty());
    }

    #[test]
    fn off_from_inside_another_listener_skips_removed_one() {
        let emitter = Arc::new(EventEmitter::new());
        let (count, f) = counter();
        let victim = Arc::new(Mutex::new(None::<ListenerId>));

        // The first listener removes the second before it gets its turn.
        let em = emitter.clone();
        let v = victim.clone();
        let c1 = count.clone();
        let first = emitter.on(names::CONNECTED, move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *v.lock().unwrap() {
                em.off(names::CONNECTED, id);
            }
        });
        let second = emitter.on(names::CONNECTED, f);
        *victim.lock().unwrap() = Some(second);

        emitter.emit(&Event::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(names::CONNECTED), 1);

        emitter.emit(&Event::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(emitter.off(names::CONNECTED, first));
    }

    #[test]
    fn listener_may_remove_itself() {
        let emitter = Arc::new(EventEmitter::new());
        let count = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(Mutex::new(None::<ListenerId>));

        let em = emitter.clone();
        let s = slot.clone();
        let c = count.clone();
        let id = emitter.on(names::CONNECTED, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *s.lock().unwrap() {
                em.off(names::CONNECTED, id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        emitter.emit(&Event::Connected);
        emitter.emit(&Event::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let emitter = EventEmitter::new();
        let (count, f) = counter();
        emitter.on(names::ERROR, |_| panic!("listener bug"));
        emitter.on(names::ERROR, f);

        let invoked = emitter.emit(&Event::Error {
            message: "boom".into(),
        });
        assert_eq!(invoked, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channel_events_use_channel_keys() {
        let emitter = EventEmitter::new();
        let (count, f) = counter();
        emitter.on("dashboard_kpi_data", f);
        emitter.emit(&Event::ChannelData {
            channel: "dashboard_kpi".into(),
            data: serde_json::json!({"total": 5}),
        });
        emitter.emit(&Event::ChannelData {
            channel: "live_metrics".into(),
            data: serde_json::Value::Null,
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.event_names(), vec!["dashboard_kpi_data".to_string()]);
    }
}
