use crate::core::{DataAction, Result};
use crate::data::ChangePayload;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Type alias for the future a change handler returns.
pub type ChangeHandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Type alias for a subscribed change handler.
pub type ChangeHandler = Arc<dyn Fn(DataChangeMessage) -> ChangeHandlerFuture + Send + Sync>;

/// One announcement on the bus: which action hit which payload.
///
/// Consumers receive their own clone and must treat the payload as
/// immutable; convergence happens by adopting it, never by editing it.
#[derive(Debug, Clone)]
pub struct DataChangeMessage {
    pub action: DataAction,
    pub data: ChangePayload,
}

/// Handle returned by [`MessageBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    handler: ChangeHandler,
}

/// In-process fan-out of data-change announcements.
///
/// Delivery is deterministic: subscribers are invoked in registration order,
/// one at a time, and `publish` returns only after the last handler
/// finished. A failing handler is logged and skipped over, it never stops
/// delivery and never surfaces to the publisher. Unsubscribing flips an
/// active flag that is checked right before each invocation, so a handler
/// may safely unsubscribe itself or a later subscriber while a delivery is
/// in flight.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self, handler: ChangeHandler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let subscriber = Subscriber {
            id,
            active: Arc::new(AtomicBool::new(true)),
            handler,
        };
        self.lock_subscribers().push(subscriber);
        Subscription { id }
    }

    /// Idempotent: unknown or already removed subscriptions are a no-op.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut subscribers = self.lock_subscribers();
        if let Some(pos) = subscribers.iter().position(|s| s.id == subscription.id) {
            subscribers[pos].active.store(false, Ordering::SeqCst);
            subscribers.remove(pos);
        }
    }

    /// Delivers `message` to every subscriber registered at call time, in
    /// registration order, awaiting each handler before the next.
    pub async fn publish(&self, message: DataChangeMessage) {
        let snapshot: Vec<(Arc<AtomicBool>, ChangeHandler)> = self
            .lock_subscribers()
            .iter()
            .map(|s| (s.active.clone(), s.handler.clone()))
            .collect();

        for (active, handler) in snapshot {
            if !active.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(err) = handler(message.clone()).await {
                warn!(error = %err, "change handler failed");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        // Delivery must keep working even if a handler panicked elsewhere.
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
