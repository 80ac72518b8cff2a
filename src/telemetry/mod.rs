//! Persistent alert push channel: wire protocol, socket seam, worker, and
//! the one-connection-per-channel registry.

mod channel;
mod protocol;
mod registry;
mod socket;

pub use channel::{ChannelStatus, TelemetryChannel};
pub use protocol::{ClientMessage, ControlMessage, ServerMessage, SubscribeMessage};
pub use registry::ChannelRegistry;
pub use socket::{PushConnector, PushSocket, WsConnector, WsPushSocket};
