//! Media session lifecycle
//!
//! [`SessionController`] owns the join/leave/publish state machine and the
//! remote participant roster; the transport itself sits behind the
//! [`Transport`] trait.

pub mod controller;
pub mod transport;
pub mod types;

pub use controller::{SessionController, SessionEvent};
pub use transport::{
    FrameSource, LocalTrack, RawFrame, RemoteTrack, Transport, TransportEvent, VolumeLevel,
};
pub use types::{ConnectionState, MediaKind, RemoteParticipant, Session, SessionCredentials};
