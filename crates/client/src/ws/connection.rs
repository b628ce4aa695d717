//! Hub connection with named method handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use turbopush_shared::HubMessage;
use uuid::Uuid;

use crate::error::ClientError;

/// Connection state for a hub connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Callback run for each inbound invocation of a method.
pub type MethodHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Identifies one registration made with [`HubConnection::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Outstanding invocations, keyed by id and tagged with the socket they were
/// sent on.
type PendingInvocations = HashMap<String, (u64, oneshot::Sender<Result<(), String>>)>;

/// The writer of one started socket. `generation` increases with every start.
struct Outbound {
    generation: u64,
    sender: mpsc::UnboundedSender<HubMessage>,
}

#[derive(Default)]
struct Shared {
    handlers: Mutex<HashMap<String, Vec<(HandlerId, MethodHandler)>>>,
    next_handler: AtomicU64,
    next_generation: AtomicU64,
    outbound: Mutex<Option<Outbound>>,
    pending: Mutex<PendingInvocations>,
    state: Mutex<ConnectionState>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Method names are matched case-insensitively.
fn method_key(method: &str) -> String {
    method.to_ascii_lowercase()
}

/// A client connection to a hub endpoint.
///
/// Handlers may be registered before or after [`start`](Self::start). Inbound
/// messages are handled one at a time in arrival order.
#[derive(Clone, Default)]
pub struct HubConnection {
    shared: Arc<Shared>,
}

impl HubConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.state).clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.shared.state) = state;
    }

    /// Register `handler` for invocations of `method`.
    pub fn on(&self, method: &str, handler: impl Fn(&[Value]) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId(self.shared.next_handler.fetch_add(1, Ordering::Relaxed));
        lock(&self.shared.handlers)
            .entry(method_key(method))
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a registration. Returns whether it was present.
    pub fn off(&self, method: &str, id: HandlerId) -> bool {
        let mut handlers = lock(&self.shared.handlers);
        let key = method_key(method);
        let Some(registered) = handlers.get_mut(&key) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|(handler_id, _)| *handler_id != id);
        let removed = registered.len() != before;
        if registered.is_empty() {
            handlers.remove(&key);
        }
        removed
    }

    pub fn handler_count(&self, method: &str) -> usize {
        lock(&self.shared.handlers)
            .get(&method_key(method))
            .map_or(0, Vec::len)
    }

    /// Open the websocket and start the read and write tasks.
    ///
    /// Starting again replaces the current socket; the old one is closed.
    pub async fn start(&self, url: &str) -> Result<(), ClientError> {
        self.set_state(ConnectionState::Connecting);

        let (ws_stream, _response) = match connect_async(url).await {
            Ok(connected) => connected,
            Err(e) => {
                // A failed restart keeps whatever socket is still open.
                let outbound = lock(&self.shared.outbound);
                self.set_state(match *outbound {
                    Some(_) => ConnectionState::Connected,
                    None => ConnectionState::Disconnected,
                });
                drop(outbound);
                return Err(ClientError::Connect {
                    url: url.to_string(),
                    source: Box::new(e),
                });
            }
        };
        tracing::info!("Hub connection to {} established", url);

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<HubMessage>();
        let generation = self.attach_outbound(outbound);

        // Spawn write task
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match serde_json::to_string(&message) {
                    Ok(json) => {
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            tracing::error!("Hub send failed: {}", e);
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to encode hub message: {}", e),
                }
            }
            let _ = write.close().await;
        });

        // Spawn read task
        let connection = self.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<HubMessage>(text.as_str()) {
                        Ok(message) => connection.handle_message(message),
                        Err(e) => tracing::error!("Failed to parse hub message: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("Hub read error: {}", e);
                        break;
                    }
                }
            }
            connection.closed(generation);
        });

        Ok(())
    }

    pub(crate) fn attach_outbound(&self, sender: mpsc::UnboundedSender<HubMessage>) -> u64 {
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut outbound = lock(&self.shared.outbound);
        *outbound = Some(Outbound { generation, sender });
        self.set_state(ConnectionState::Connected);
        generation
    }

    /// Called when the socket of `generation` has stopped reading. A socket
    /// that has since been replaced leaves the current one alone.
    pub(crate) fn closed(&self, generation: u64) {
        let mut outbound = lock(&self.shared.outbound);
        if outbound.as_ref().is_some_and(|current| current.generation == generation) {
            outbound.take();
            self.set_state(ConnectionState::Disconnected);
        }
        drop(outbound);

        // Dropping the senders fails the invokes sent on that socket.
        lock(&self.shared.pending).retain(|_, (sent_on, _)| *sent_on != generation);
        tracing::info!("Hub connection closed");
    }

    /// Close the connection once queued messages have been written.
    pub fn stop(&self) {
        let _outbound = lock(&self.shared.outbound).take();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Invoke a hub method without waiting for it to complete.
    pub fn send(&self, method: &str, arguments: Vec<Value>) -> Result<(), ClientError> {
        lock(&self.shared.outbound)
            .as_ref()
            .ok_or(ClientError::NotConnected)?
            .sender
            .send(HubMessage::invocation(method, arguments))
            .map_err(|_| ClientError::Disconnected)
    }

    /// Invoke a hub method and wait for its completion.
    pub async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<(), ClientError> {
        let invocation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        let message = HubMessage::Invocation {
            invocation_id: Some(invocation_id.clone()),
            target: method.to_string(),
            arguments,
        };
        // Registered under the outbound lock so a fast completion finds it.
        {
            let outbound = lock(&self.shared.outbound);
            let current = outbound.as_ref().ok_or(ClientError::NotConnected)?;
            lock(&self.shared.pending).insert(invocation_id.clone(), (current.generation, tx));
            if current.sender.send(message).is_err() {
                lock(&self.shared.pending).remove(&invocation_id);
                return Err(ClientError::Disconnected);
            }
        }

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(ClientError::Invocation {
                method: method.to_string(),
                error,
            }),
            Err(_) => Err(ClientError::Disconnected),
        }
    }

    /// Route one inbound message to its handlers or pending invocation.
    pub fn handle_message(&self, message: HubMessage) {
        match message {
            HubMessage::Invocation {
                target, arguments, ..
            } => {
                // Handlers run without the registry lock so they may call on/off.
                let handlers: Vec<MethodHandler> = lock(&self.shared.handlers)
                    .get(&method_key(&target))
                    .map(|registered| registered.iter().map(|(_, h)| h.clone()).collect())
                    .unwrap_or_default();

                if handlers.is_empty() {
                    tracing::warn!("No client method with the name '{}' found", target);
                }
                for handler in handlers {
                    handler(&arguments);
                }
            }
            HubMessage::Completion {
                invocation_id,
                error,
            } => {
                if let Some((_, tx)) = lock(&self.shared.pending).remove(&invocation_id) {
                    let _ = tx.send(error.map_or(Ok(()), Err));
                }
            }
            HubMessage::Ping => {}
            HubMessage::Close { error } => {
                tracing::info!("Server requested close: {}", error.unwrap_or_default());
                self.stop();
            }
        }
    }
}
