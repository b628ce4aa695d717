//! Values passed between the dispatch pipeline and the realtime transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DispatchError;

/// Identifier of one open hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The set of connected clients a fragment is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Every connected client.
    All,
    /// Every connected client except the listed ones.
    AllExcept(Vec<ConnectionId>),
    /// A single client.
    Client(ConnectionId),
    /// Several specific clients.
    Clients(Vec<ConnectionId>),
    /// Every member of a named group.
    Group(String),
}

impl Destination {
    pub fn group(name: impl Into<String>) -> Self {
        Destination::Group(name.into())
    }

    /// Rejects destinations that can never address anyone.
    pub fn validate(&self) -> Result<(), DispatchError> {
        match self {
            Destination::Clients(ids) if ids.is_empty() => Err(DispatchError::InvalidArgument {
                name: "destination",
            }),
            Destination::Group(name) if name.trim().is_empty() => {
                Err(DispatchError::InvalidArgument {
                    name: "destination",
                })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::All => write!(f, "all"),
            Destination::AllExcept(ids) => write!(f, "all except {} client(s)", ids.len()),
            Destination::Client(id) => write!(f, "client {}", id),
            Destination::Clients(ids) => write!(f, "{} client(s)", ids.len()),
            Destination::Group(name) => write!(f, "group '{}'", name),
        }
    }
}

/// Markup produced by rendering a view, already wrapped in its
/// `<turbo-stream>` envelope by the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderedFragment(String);

impl RenderedFragment {
    pub fn new(markup: impl Into<String>) -> Self {
        Self(markup.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for RenderedFragment {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RenderedFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_client_list_is_rejected() {
        let err = Destination::Clients(vec![]).validate().unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InvalidArgument { name: "destination" }
        ));
    }

    #[test]
    fn blank_group_is_rejected() {
        assert!(Destination::group("  ").validate().is_err());
        assert!(Destination::group("room-1").validate().is_ok());
    }

    #[test]
    fn broadcast_destinations_are_valid() {
        assert!(Destination::All.validate().is_ok());
        assert!(Destination::AllExcept(vec![]).validate().is_ok());
        assert!(Destination::Client(ConnectionId::new()).validate().is_ok());
    }

    #[test]
    fn connection_id_round_trips_through_display() {
        let id = ConnectionId::new();
        let parsed: ConnectionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
