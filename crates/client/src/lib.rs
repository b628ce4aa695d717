//! Client side of turbopush: a hub connection and the stream observer that
//! turns pushed Turbo Stream elements into message events.

pub mod error;
pub mod observer;
pub mod ws;

pub use error::ClientError;
pub use observer::{ListenerId, MessageEvent, StreamObserver, StreamSourceRegistry};
pub use ws::{ConnectionState, HandlerId, HubConnection, MethodHandler};
