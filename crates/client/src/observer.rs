//! Bridges `ReceiveStreamElement` pushes into message events for whatever
//! applies Turbo Stream elements on the client.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use turbopush_shared::RECEIVE_STREAM_ELEMENT;

use crate::ws::connection::{lock, HandlerId, HubConnection};

/// Where stream sources get wired up, e.g. the page's Turbo session.
pub trait StreamSourceRegistry: Send + Sync {
    fn connect_stream_source(&self, observer: &StreamObserver);
    fn disconnect_stream_source(&self, observer: &StreamObserver);
}

/// One pushed element, exactly as the server rendered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachState {
    Detached,
    Attached(HandlerId),
}

struct Inner {
    connection: HubConnection,
    registry: Arc<dyn StreamSourceRegistry>,
    // Serializes attach and detach; `state` stays free for the registry to read.
    transition: Mutex<()>,
    state: Mutex<AttachState>,
    listeners: Mutex<BTreeMap<ListenerId, Listener>>,
    next_listener: AtomicU64,
}

impl Inner {
    fn emit(&self, event: &MessageEvent) {
        let listeners: Vec<Listener> = lock(&self.listeners).values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }
}

/// A stream source fed by a hub connection.
///
/// Starts detached. While attached, every `ReceiveStreamElement` invocation
/// is forwarded to the listeners as a [`MessageEvent`].
#[derive(Clone)]
pub struct StreamObserver {
    inner: Arc<Inner>,
}

impl StreamObserver {
    pub fn new(connection: HubConnection, registry: Arc<dyn StreamSourceRegistry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                connection,
                registry,
                transition: Mutex::new(()),
                state: Mutex::new(AttachState::Detached),
                listeners: Mutex::new(BTreeMap::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    pub fn connection(&self) -> &HubConnection {
        &self.inner.connection
    }

    pub fn is_attached(&self) -> bool {
        matches!(*lock(&self.inner.state), AttachState::Attached(_))
    }

    /// Start forwarding stream elements. The observer only reports itself
    /// attached once the registry has connected it.
    pub fn attach(&self) {
        let _transition = lock(&self.inner.transition);
        if self.is_attached() {
            return;
        }

        // The connection must not keep the observer alive.
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handler = self.inner.connection.on(RECEIVE_STREAM_ELEMENT, move |arguments| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match arguments.first() {
                Some(Value::String(element)) => inner.emit(&MessageEvent {
                    data: element.clone(),
                }),
                other => tracing::warn!("Ignoring stream element with arguments {:?}", other),
            }
        });

        self.inner.registry.connect_stream_source(self);
        *lock(&self.inner.state) = AttachState::Attached(handler);
    }

    pub fn detach(&self) {
        let _transition = lock(&self.inner.transition);
        let handler = match *lock(&self.inner.state) {
            AttachState::Detached => return,
            AttachState::Attached(handler) => handler,
        };

        self.inner.registry.disconnect_stream_source(self);
        self.inner.connection.off(RECEIVE_STREAM_ELEMENT, handler);
        *lock(&self.inner.state) = AttachState::Detached;
    }

    pub fn add_listener(&self, listener: impl Fn(&MessageEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).insert(id, Arc::new(listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        lock(&self.inner.listeners).remove(&id).is_some()
    }

    fn ptr_eq(&self, other: &StreamObserver) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for StreamObserver {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl std::fmt::Debug for StreamObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamObserver")
            .field("attached", &self.is_attached())
            .field("listeners", &lock(&self.inner.listeners).len())
            .finish()
    }
}
