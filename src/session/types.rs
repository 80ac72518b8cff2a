use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::session::transport::{FrameSource, LocalTrack};

/// Media session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Credentials for joining a channel on the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub app_id: String,
    pub channel: String,
    pub token: Option<String>,
    pub uid: u64,
    pub username: String,
    /// Whether this endpoint is the monitoring authority for the channel
    pub is_host: bool,
}

/// Local media session state, owned exclusively by the controller
pub struct Session {
    pub connection_state: ConnectionState,
    pub audio_track: Option<Arc<dyn LocalTrack>>,
    pub video_track: Option<Arc<dyn LocalTrack>>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            audio_track: None,
            video_track: None,
            audio_enabled: false,
            video_enabled: false,
        }
    }

    /// Drop track handles and observable flags back to the initial state
    pub(crate) fn reset(&mut self) {
        self.connection_state = ConnectionState::Disconnected;
        self.audio_track = None;
        self.video_track = None;
        self.audio_enabled = false;
        self.video_enabled = false;
    }
}

/// A remote endpoint in the session, tracked from transport events
#[derive(Clone)]
pub struct RemoteParticipant {
    pub uid: u64,
    pub display_name: String,
    pub video: Option<Arc<dyn FrameSource>>,
    pub has_audio: bool,
    pub speaking: bool,
}

impl RemoteParticipant {
    pub(crate) fn new(uid: u64) -> Self {
        Self {
            uid,
            display_name: format!("User {}", uid),
            video: None,
            has_audio: false,
            speaking: false,
        }
    }
}

impl std::fmt::Debug for RemoteParticipant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteParticipant")
            .field("uid", &self.uid)
            .field("display_name", &self.display_name)
            .field("has_video", &self.video.is_some())
            .field("has_audio", &self.has_audio)
            .field("speaking", &self.speaking)
            .finish()
    }
}

/// Snapshot of the participant roster, keyed by uid
pub type Roster = HashMap<u64, RemoteParticipant>;
