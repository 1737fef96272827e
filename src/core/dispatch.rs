//! Ordered observer list for typed network events.
//!
//! Handlers run synchronously on the task that processes the inbound unit,
//! in registration order. Every invocation is isolated with `catch_unwind`,
//! so a panicking handler cannot keep the event from the handlers after it.

use crate::core::traits::EventHandler;
use crate::core::types::NetworkEvent;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{error, trace};

/// Identifier returned on registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub struct HandlerDispatcher {
    handlers: RwLock<Vec<(HandlerId, Arc<dyn EventHandler>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for HandlerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDispatcher")
            .field("handlers", &self.len())
            .finish_non_exhaustive()
    }
}

impl HandlerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&self, handler: H) -> HandlerId
    where
        H: EventHandler + 'static,
    {
        self.register_arc(Arc::new(handler))
    }

    pub fn register_arc(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write_handlers().push((id, handler));
        id
    }

    /// Remove a handler. Returns false if the id was unknown.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.write_handlers();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Channel fan-out: every event is cloned into the returned receiver.
    /// The forwarding handler is dropped once the receiver is.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<NetworkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(ChannelHandler { tx });
        rx
    }

    pub fn len(&self) -> usize {
        self.read_handlers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every handler. Returns how many handlers
    /// completed without panicking.
    pub fn dispatch(&self, event: &NetworkEvent) -> usize {
        self.prune_closed();
        // Snapshot so handlers may (un)register from inside a callback
        let snapshot: Vec<(HandlerId, Arc<dyn EventHandler>)> = self.read_handlers().clone();
        trace!(handlers = snapshot.len(), ?event, "Dispatching event");

        let mut delivered = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(handler = ?id, %reason, "Event handler panicked");
                }
            }
        }
        delivered
    }

    fn prune_closed(&self) {
        if !self.read_handlers().iter().any(|(_, h)| h.is_closed()) {
            return;
        }
        self.write_handlers().retain(|(id, handler)| {
            let closed = handler.is_closed();
            if closed {
                trace!(handler = ?id, "Removing closed handler");
            }
            !closed
        });
    }

    fn read_handlers(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, Vec<(HandlerId, Arc<dyn EventHandler>)>> {
        self.handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_handlers(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, Vec<(HandlerId, Arc<dyn EventHandler>)>> {
        self.handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

struct ChannelHandler {
    tx: mpsc::UnboundedSender<NetworkEvent>,
}

impl EventHandler for ChannelHandler {
    fn handle(&self, event: &NetworkEvent) {
        // A send error means the receiver is gone, pruned on the next dispatch
        let _ = self.tx.send(event.clone());
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_dispatch_in_registration_order() {
        let dispatcher = HandlerDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            dispatcher.register(move |_: &NetworkEvent| log.lock().unwrap().push(name));
        }

        assert_eq!(dispatcher.dispatch(&NetworkEvent::Connected), 3);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let dispatcher = HandlerDispatcher::new();
        let hits = Arc::new(AtomicU64::new(0));

        let before = Arc::clone(&hits);
        dispatcher.register(move |_: &NetworkEvent| {
            before.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.register(|_: &NetworkEvent| panic!("handler failure"));
        let after = Arc::clone(&hits);
        dispatcher.register(move |_: &NetworkEvent| {
            after.fetch_add(1, Ordering::SeqCst);
        });

        let delivered = dispatcher.dispatch(&NetworkEvent::Disconnected);
        assert_eq!(delivered, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // The dispatcher remains usable after a panic
        assert_eq!(dispatcher.dispatch(&NetworkEvent::Connected), 2);
    }

    #[test]
    fn test_unregister() {
        let dispatcher = HandlerDispatcher::new();
        let id = dispatcher.register(|_: &NetworkEvent| {});
        assert_eq!(dispatcher.len(), 1);
        assert!(dispatcher.unregister(id));
        assert!(!dispatcher.unregister(id));
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_subscribe_receives_events() {
        let dispatcher = HandlerDispatcher::new();
        let mut rx = dispatcher.subscribe();

        dispatcher.dispatch(&NetworkEvent::SessionAssigned("S1".to_string()));
        assert_eq!(
            rx.try_recv().unwrap(),
            NetworkEvent::SessionAssigned("S1".to_string())
        );

        drop(rx);
        // The orphaned forwarder is removed before delivery
        assert_eq!(dispatcher.dispatch(&NetworkEvent::Connected), 0);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_dropped_subscriptions_do_not_accumulate() {
        let dispatcher = HandlerDispatcher::new();
        dispatcher.register(|_: &NetworkEvent| {});
        for _ in 0..100 {
            drop(dispatcher.subscribe());
        }
        let mut live = dispatcher.subscribe();
        assert_eq!(dispatcher.len(), 102);

        assert_eq!(dispatcher.dispatch(&NetworkEvent::Connected), 2);
        assert_eq!(dispatcher.len(), 2);
        assert_eq!(live.try_recv().unwrap(), NetworkEvent::Connected);
    }
}
