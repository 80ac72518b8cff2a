//! Transport seam
//!
//! The real-time media service (join/publish/leave, track creation, event
//! delivery) sits behind these traits. The engine holds a single transport
//! instance for the lifetime of the page; event listeners are registered
//! once via [`Transport::subscribe`], not per component.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::session::types::{ConnectionState, MediaKind, SessionCredentials};

/// Raw captured frame, tightly packed RGB24
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

/// A source of still frames for sampling (local camera or remote video track)
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Capture the current frame
    ///
    /// Suspends while the device or decoder produces the frame. Fails with
    /// `Acquisition` once the underlying track is gone.
    async fn capture(&self) -> Result<RawFrame>;
}

/// A local media track owned by the session controller
#[async_trait]
pub trait LocalTrack: Send + Sync {
    fn kind(&self) -> MediaKind;

    /// Enable or mute the track without unpublishing it
    async fn set_enabled(&self, enabled: bool) -> Result<()>;

    /// Stop capture and release the device; the handle is dead afterwards
    async fn close(&self);

    /// Frame source for sampling; `None` for audio tracks
    fn frame_source(&self) -> Option<Arc<dyn FrameSource>>;
}

/// Handle to a remote participant's published track
#[derive(Clone)]
pub struct RemoteTrack {
    pub kind: MediaKind,
    /// Present for video tracks that can be sampled
    pub frames: Option<Arc<dyn FrameSource>>,
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("kind", &self.kind)
            .field("has_frames", &self.frames.is_some())
            .finish()
    }
}

/// Per-participant audio level report (0-100)
#[derive(Debug, Clone, Copy)]
pub struct VolumeLevel {
    pub uid: u64,
    pub level: u8,
}

/// Events delivered by the transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ConnectionStateChanged(ConnectionState),
    UserJoined { uid: u64 },
    UserLeft { uid: u64 },
    UserPublished { uid: u64, track: RemoteTrack },
    UserUnpublished { uid: u64, kind: MediaKind },
    VolumeIndicator(Vec<VolumeLevel>),
}

/// External real-time media service
///
/// Implementations wrap the vendor SDK. All methods are non-blocking; state
/// confirmation arrives asynchronously through [`TransportEvent`]s.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Join the named channel; confirmation arrives as a
    /// `ConnectionStateChanged(Connected)` event
    async fn join(&self, credentials: &SessionCredentials) -> Result<()>;

    async fn create_audio_track(&self) -> Result<Arc<dyn LocalTrack>>;

    async fn create_video_track(&self) -> Result<Arc<dyn LocalTrack>>;

    /// Publish local tracks; only valid after the Connected state has been
    /// observed (tracks published mid-negotiation may be silently dropped)
    async fn publish(&self, tracks: &[Arc<dyn LocalTrack>]) -> Result<()>;

    async fn leave(&self) -> Result<()>;

    /// Subscribe to transport events
    ///
    /// Events published after this call are delivered in order; there is no
    /// replay of earlier events.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}
