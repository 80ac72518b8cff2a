//! Push channel wire messages
//!
//! JSON messages exchanged over the persistent alert connection. Inbound
//! kinds the client does not recognize deserialize to [`ServerMessage::Unknown`]
//! and are ignored, so new server message types never break old clients.

use serde::{Deserialize, Serialize};

use crate::alerts::Alert;

/// Server-to-client messages
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A behavior alert for a monitored participant
    BehaviorAlert { alert: Alert },
    /// Subscription acknowledged; the channel is fully active
    ConnectionSuccess {
        #[serde(default)]
        message: Option<String>,
    },
    /// Informational roster size update
    ParticipantsUpdate { count: u32 },
    /// Server-initiated liveness probe; the client answers with a pong
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Answer to a client ping
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Free-form informational message
    Info {
        #[serde(default)]
        message: Option<String>,
    },
    /// Any message kind this client does not know
    #[serde(other)]
    Unknown,
}

/// Subscription request, sent first on every new connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeMessage {
    pub channel: String,
}

/// Typed client-to-server control messages
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Request alerts buffered while the client was away
    GetAlerts,
    /// Liveness probe
    Ping { timestamp: i64 },
    /// Answer to a server ping
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
}

/// Client-to-server messages
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Subscribe(SubscribeMessage),
    Control(ControlMessage),
}

impl ClientMessage {
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Self::Subscribe(SubscribeMessage {
            channel: channel.into(),
        })
    }

    pub fn get_alerts() -> Self {
        Self::Control(ControlMessage::GetAlerts)
    }

    pub fn ping(timestamp: i64) -> Self {
        Self::Control(ControlMessage::Ping { timestamp })
    }

    pub fn pong(timestamp: Option<i64>) -> Self {
        Self::Control(ControlMessage::Pong { timestamp })
    }
}
