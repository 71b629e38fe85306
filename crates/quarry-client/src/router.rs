use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use quarry_core::protocol::InboundFrame;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Identifies one registered frame handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler_{}", self.0)
    }
}

/// Fan-out of inbound frames to every registered handler.
///
/// There is no correlation between frames and queries: each handler sees
/// everything and filters by content.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: DashMap<HandlerId, mpsc::UnboundedSender<InboundFrame>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a handler. It stays registered until the subscription is
    /// dropped or [`HandlerRegistry::remove`] is called.
    pub fn add(self: &Arc<Self>) -> FrameSubscription {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.handlers.insert(id, tx);
        debug!(handler = %id, total = self.handlers.len(), "handler registered");
        FrameSubscription {
            id,
            rx,
            registry: Arc::downgrade(self),
        }
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        let removed = self.handlers.remove(&id).is_some();
        if removed {
            debug!(handler = %id, total = self.handlers.len(), "handler removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Deliver `frame` to every handler. Returns how many received it.
    pub fn dispatch(&self, frame: &InboundFrame) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.handlers.iter() {
            if entry.value().send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            let _ = self.handlers.remove(&id);
        }
        trace!(frame_type = frame.frame_type(), delivered, "frame dispatched");
        delivered
    }
}

/// Receiving end of one handler registration.
#[derive(Debug)]
pub struct FrameSubscription {
    id: HandlerId,
    rx: mpsc::UnboundedReceiver<InboundFrame>,
    registry: Weak<HandlerRegistry>,
}

impl FrameSubscription {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<InboundFrame> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<InboundFrame> {
        self.rx.try_recv().ok()
    }
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let _ = registry.remove(self.id);
        }
    }
}
