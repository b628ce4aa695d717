//! WebSocket hub: connection tracking, group membership, method invocation
//! and fragment delivery.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use turbopush_shared::{ConnectionId, Destination, DispatchError, HubMessage, RenderedFragment};

use crate::context::{ConnectionContext, HttpMetadata};
use crate::dispatch::{Dispatcher, PushConnection};
use crate::state::AppState;

pub type Outbound = mpsc::UnboundedSender<HubMessage>;

#[derive(Default)]
struct Connections {
    clients: HashMap<ConnectionId, Outbound>,
    groups: HashMap<String, HashSet<ConnectionId>>,
}

/// Live hub connections and the groups they belong to.
#[derive(Clone, Default)]
pub struct HubRegistry {
    inner: Arc<RwLock<Connections>>,
}

impl HubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection. Messages for it are queued on `outbound` in
    /// delivery order.
    pub async fn register(&self, connection_id: ConnectionId, outbound: Outbound) {
        let mut connections = self.inner.write().await;
        connections.clients.insert(connection_id, outbound);
    }

    /// Forget a connection and drop it from every group.
    pub async fn unregister(&self, connection_id: ConnectionId) {
        let mut connections = self.inner.write().await;
        connections.clients.remove(&connection_id);
        connections.groups.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
    }

    pub async fn add_to_group(&self, connection_id: ConnectionId, group: &str) {
        let mut connections = self.inner.write().await;
        connections
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(connection_id);
    }

    pub async fn remove_from_group(&self, connection_id: ConnectionId, group: &str) {
        let mut connections = self.inner.write().await;
        if let Some(members) = connections.groups.get_mut(group) {
            members.remove(&connection_id);
            if members.is_empty() {
                connections.groups.remove(group);
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    pub async fn group_members(&self, group: &str) -> HashSet<ConnectionId> {
        self.inner
            .read()
            .await
            .groups
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    /// Queue `message` for every connection behind `destination`.
    ///
    /// A single addressed client must be connected; wider destinations skip
    /// clients that have gone away.
    pub async fn send(
        &self,
        destination: &Destination,
        message: HubMessage,
    ) -> Result<usize, DispatchError> {
        let connections = self.inner.read().await;

        let targets: Vec<&Outbound> = match destination {
            Destination::Client(id) => {
                let outbound = connections.clients.get(id).ok_or_else(|| {
                    DispatchError::transport(format!("connection {} is not connected", id))
                })?;
                outbound
                    .send(message)
                    .map_err(|_| DispatchError::transport(format!("connection {} is closing", id)))?;
                return Ok(1);
            }
            Destination::All => connections.clients.values().collect(),
            Destination::AllExcept(excluded) => connections
                .clients
                .iter()
                .filter(|(id, _)| !excluded.contains(id))
                .map(|(_, outbound)| outbound)
                .collect(),
            Destination::Clients(ids) => ids
                .iter()
                .filter_map(|id| connections.clients.get(id))
                .collect(),
            Destination::Group(name) => connections
                .groups
                .get(name)
                .map(|members| {
                    members
                        .iter()
                        .filter_map(|id| connections.clients.get(id))
                        .collect()
                })
                .unwrap_or_default(),
        };

        let mut sent = 0;
        for outbound in targets {
            if outbound.send(message.clone()).is_ok() {
                sent += 1;
            }
        }
        Ok(sent)
    }
}

#[async_trait]
impl PushConnection for HubRegistry {
    async fn deliver(
        &self,
        destination: &Destination,
        fragment: &RenderedFragment,
    ) -> Result<(), DispatchError> {
        let sent = self.send(destination, HubMessage::stream_element(fragment)).await?;
        tracing::debug!("Queued fragment for {} connection(s) via {}", sent, destination);
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum HubMethodError {
    #[error("unknown hub method '{0}'")]
    UnknownMethod(String),

    #[error("invalid arguments for '{method}': {message}")]
    InvalidArguments { method: String, message: String },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Fetch argument `index` of an invocation as a string.
pub fn string_argument<'a>(
    method: &str,
    arguments: &'a [Value],
    index: usize,
) -> Result<&'a str, HubMethodError> {
    arguments
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| HubMethodError::InvalidArguments {
            method: method.to_string(),
            message: format!("expected a string at position {}", index),
        })
}

/// The connection a hub method is running on, plus what it needs to push
/// fragments to other clients.
#[derive(Clone)]
pub struct HubCallerContext {
    connection: ConnectionContext,
    hub: HubRegistry,
    dispatcher: Arc<Dispatcher>,
}

impl HubCallerContext {
    pub fn new(connection: ConnectionContext, hub: HubRegistry, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            connection,
            hub,
            dispatcher,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.connection_id
    }

    pub fn connection(&self) -> &ConnectionContext {
        &self.connection
    }

    pub fn groups(&self) -> &HubRegistry {
        &self.hub
    }

    /// Render `view_name` for this connection and push it to `destination`.
    pub async fn send_partial_view<M: Serialize>(
        &self,
        destination: Destination,
        view_name: &str,
        model: M,
    ) -> Result<(), DispatchError> {
        self.dispatcher
            .send_partial_view_from_connection(&self.connection, destination, view_name, model)
            .await
    }
}

/// Application methods clients can invoke over the hub.
#[async_trait]
pub trait HubHandler: Send + Sync {
    async fn on_connected(&self, _caller: &HubCallerContext) -> Result<(), HubMethodError> {
        Ok(())
    }

    async fn on_disconnected(&self, _caller: &HubCallerContext) {}

    async fn invoke(
        &self,
        caller: &HubCallerContext,
        method: &str,
        arguments: Vec<Value>,
    ) -> Result<(), HubMethodError>;
}

/// WebSocket upgrade handler. The upgrade request's metadata stays with the
/// connection so hub methods can render views.
pub async fn ws_handler(
    State(state): State<AppState>,
    http: HttpMetadata,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, http, state))
}

async fn handle_socket(socket: WebSocket, http: HttpMetadata, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let connection_id = ConnectionId::new();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<HubMessage>();
    state.hub.register(connection_id, outbound.clone()).await;
    tracing::info!("Hub connection {} opened from {}", connection_id, http.uri);

    let caller = HubCallerContext::new(
        ConnectionContext::new(connection_id, Some(http)),
        state.hub.clone(),
        state.dispatcher.clone(),
    );

    // Task to forward queued messages to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to encode hub message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    if let Err(e) = state.handler.on_connected(&caller).await {
        tracing::warn!("on_connected failed for {}: {}", connection_id, e);
    }

    // Main receive loop
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if handle_text(&state, &caller, &outbound, text.as_str()).await.is_break() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!("Hub connection {} read error: {}", connection_id, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup
    state.hub.unregister(connection_id).await;
    state.handler.on_disconnected(&caller).await;
    send_task.abort();

    tracing::info!("Hub connection {} closed", connection_id);
}

async fn handle_text(
    state: &AppState,
    caller: &HubCallerContext,
    outbound: &Outbound,
    text: &str,
) -> ControlFlow<()> {
    let message = match serde_json::from_str::<HubMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Ignoring malformed hub message from {}: {}", caller.connection_id(), e);
            return ControlFlow::Continue(());
        }
    };

    match message {
        HubMessage::Invocation {
            invocation_id,
            target,
            arguments,
        } => {
            tracing::debug!("Connection {} invoking {}", caller.connection_id(), target);

            let result = state.handler.invoke(caller, &target, arguments).await;
            if let Err(e) = &result {
                tracing::warn!("Hub method {} failed: {}", target, e);
            }

            if let Some(invocation_id) = invocation_id {
                let completion = HubMessage::completion(invocation_id, result.map_err(|e| e.to_string()));
                if outbound.send(completion).is_err() {
                    tracing::debug!("Connection {} gone before completion of {}", caller.connection_id(), target);
                }
            }
        }
        HubMessage::Ping => {
            if outbound.send(HubMessage::Ping).is_err() {
                tracing::debug!("Connection {} gone before ping reply", caller.connection_id());
            }
        }
        HubMessage::Close { error } => {
            if let Some(error) = error {
                tracing::debug!("Connection {} closing: {}", caller.connection_id(), error);
            }
            return ControlFlow::Break(());
        }
        HubMessage::Completion { .. } => {}
    }

    ControlFlow::Continue(())
}
