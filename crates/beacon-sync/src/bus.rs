use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::{trace, warn};

use beacon_types::events::SocketEvent;

use crate::error::SyncError;

pub type Handler = Arc<dyn Fn(&SocketEvent) + Send + Sync>;

/// Anything that delivers named socket events to listeners.
pub trait EventSource: Send + Sync {
    /// Registers `handler` for events named `event`. The listener stays
    /// attached until the returned subscription is dropped.
    fn on(&self, event: &'static str, handler: Handler) -> Subscription;
}

/// Detaches its listener when dropped.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

struct BusInner {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<&'static str, Vec<(u64, Handler)>>>,
}

impl BusInner {
    fn remove(&self, event: &'static str, id: u64) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = handlers.get_mut(event) {
            list.retain(|(handler_id, _)| *handler_id != id);
            if list.is_empty() {
                handlers.remove(event);
            }
        }
    }
}

/// In-process fan-out of gateway events to the cache bridges.
#[derive(Clone)]
pub struct LocalEventBus {
    inner: Arc<BusInner>,
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                handlers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Calls every handler registered for the event's name. Handlers run
    /// outside the registry lock, so they may subscribe or unsubscribe.
    pub fn publish(&self, event: &SocketEvent) -> usize {
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event.name())
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        trace!("bus: {} -> {} handler(s)", event.name(), handlers.len());
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Parses one text frame from the gateway and publishes it.
    pub fn publish_text(&self, text: &str) -> Result<usize, SyncError> {
        let event: SocketEvent = serde_json::from_str(text).inspect_err(|e| {
            warn!("bus: dropping malformed event: {}", e);
        })?;
        Ok(self.publish(&event))
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
            .map_or(0, Vec::len)
    }
}

impl EventSource for LocalEventBus {
    fn on(&self, event: &'static str, handler: Handler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event)
            .or_default()
            .push((id, handler));

        let inner: Weak<BusInner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.remove(event, id);
            }
        })
    }
}
