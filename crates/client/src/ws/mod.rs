//! WebSocket hub connection.
//!
//! [`HubConnection`] speaks the JSON hub protocol from `turbopush-shared`:
//! the server invokes client methods by name, the client invokes hub methods
//! and waits for their completion.

pub mod connection;

pub use connection::{ConnectionState, HandlerId, HubConnection, MethodHandler};
