use crate::bus::{EventKind, StreamingEvent};
use dashmap::DashMap;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, trace, warn};

type HandlerFn = dyn Fn(&StreamingEvent) + Send + Sync;

struct Handler {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Arc<HandlerFn>,
}

struct BusInner {
    handlers: DashMap<EventKind, Vec<Handler>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, kind: EventKind, id: u64) {
        let mut now_empty = false;
        if let Some(mut list) = self.handlers.get_mut(&kind) {
            list.retain(|h| h.id != id);
            now_empty = list.is_empty();
        }
        if now_empty {
            self.handlers.remove_if(&kind, |_, list| list.is_empty());
        }
    }
}

/// In-process publish/subscribe hub shared by every component of one client.
///
/// Handlers run synchronously on the emitting task, in registration order.
/// Events are not persisted: a handler registered after an emission never
/// sees it. Cloning the bus yields another handle to the same hub.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&StreamingEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        self.inner.handlers.entry(kind).or_default().push(Handler {
            id,
            active: active.clone(),
            callback: Arc::new(handler),
        });
        trace!("Registered handler {} for {}", id, kind);

        Subscription {
            kind,
            id,
            active,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Registers a handler whose work is spawned onto the current tokio
    /// runtime. `emit` does not wait for it.
    pub fn on_async<F, Fut>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(StreamingEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on(kind, move |event| {
            let work = handler(event.clone());
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(work);
                }
                Err(_) => warn!("No tokio runtime available, dropping async {} handler", kind),
            }
        })
    }

    /// Delivers `event` to every handler registered for its kind.
    ///
    /// The handler list is snapshotted first, so registrations made during
    /// delivery take effect from the next emission. A handler unsubscribed
    /// during delivery is skipped if it has not run yet. A panicking handler
    /// is logged and does not prevent the remaining handlers from running.
    pub fn emit(&self, event: StreamingEvent) {
        let kind = event.kind();

        let snapshot: Vec<(Arc<AtomicBool>, Arc<HandlerFn>)> = match self.inner.handlers.get(&kind)
        {
            Some(list) => list
                .iter()
                .map(|h| (h.active.clone(), h.callback.clone()))
                .collect(),
            None => {
                trace!("No handlers for {}", kind);
                return;
            }
        };

        for (active, callback) in snapshot {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                error!("Handler for {} panicked: {}", kind, panic_message(&*panic));
            }
        }
    }

    /// Removes every handler registered for `kind`.
    pub fn off(&self, kind: EventKind) {
        if let Some((_, list)) = self.inner.handlers.remove(&kind) {
            for handler in list {
                handler.active.store(false, Ordering::Release);
            }
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .handlers
            .get(&kind)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.handlers.iter().map(|list| list.len()).sum()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle returned by [`EventBus::on`].
///
/// Dropping it leaves the handler registered; call [`Subscription::unsubscribe`].
#[must_use = "the handler stays registered until unsubscribe is called"]
pub struct Subscription {
    kind: EventKind,
    id: u64,
    active: Arc<AtomicBool>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Idempotent. Takes effect immediately, including for an emission that
    /// is currently being delivered.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.kind, self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Subscriptions owned by one component, released together.
#[derive(Debug, Default)]
pub struct Subscriptions {
    items: Vec<Subscription>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.items.push(subscription);
    }

    pub fn unsubscribe_all(&mut self) {
        for subscription in self.items.drain(..) {
            subscription.unsubscribe();
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
