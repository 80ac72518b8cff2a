//! Media session lifecycle controller
//!
//! Owns the join/leave/publish state machine. The join sequence is strictly
//! ordered: track acquisition, transport join, confirmed Connected state,
//! publish, then the ready signal. Publishing before the transport confirms
//! the connection is forbidden (tracks sent mid-negotiation may be silently
//! dropped), so confirmation is awaited with a bounded wait.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{AppError, Result};
use crate::session::transport::{FrameSource, Transport, TransportEvent};
use crate::session::types::{
    ConnectionState, MediaKind, RemoteParticipant, Roster, Session, SessionCredentials,
};

/// Capacity of the session event channel
const SESSION_EVENT_CAPACITY: usize = 64;

/// Events emitted by the controller for the monitoring layer
#[derive(Clone)]
pub enum SessionEvent {
    /// Join completed and tracks are published; carries the local video
    /// frame source when a camera was acquired
    Ready {
        audio: bool,
        video: Option<Arc<dyn FrameSource>>,
    },
    /// The session was torn down
    Left,
    /// A remote participant published a sampleable video track
    RemoteVideoAdded {
        uid: u64,
        display_name: String,
        source: Arc<dyn FrameSource>,
    },
    /// A remote video track went away (unpublished or participant left)
    RemoteVideoRemoved { uid: u64 },
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready { audio, video } => f
                .debug_struct("Ready")
                .field("audio", audio)
                .field("video", &video.is_some())
                .finish(),
            Self::Left => write!(f, "Left"),
            Self::RemoteVideoAdded { uid, display_name, .. } => f
                .debug_struct("RemoteVideoAdded")
                .field("uid", uid)
                .field("display_name", display_name)
                .finish(),
            Self::RemoteVideoRemoved { uid } => f
                .debug_struct("RemoteVideoRemoved")
                .field("uid", uid)
                .finish(),
        }
    }
}

/// Media session controller
///
/// At most one Connecting/Connected session per instance. All session state
/// (track handles, enabled flags, roster) is owned here; the UI and the
/// monitor layer only see snapshots and events.
pub struct SessionController {
    transport: Arc<dyn Transport>,
    credentials: SessionCredentials,
    config: SessionConfig,
    session: tokio::sync::RwLock<Session>,
    roster: parking_lot::RwLock<Roster>,
    /// Serializes join/leave so concurrent calls cannot interleave
    op_lock: tokio::sync::Mutex<()>,
    /// Latest transport-reported connection state, fed by the event pump
    transport_state_tx: watch::Sender<ConnectionState>,
    transport_state_rx: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl SessionController {
    /// Create the controller and start its transport event pump
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: SessionCredentials,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (transport_state_tx, transport_state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);

        // Subscribe before returning: a join can start (and the transport
        // confirm it) before the pump task is first polled, and events sent
        // while no receiver exists are dropped, not buffered.
        let transport_events = transport.subscribe();

        let controller = Arc::new(Self {
            transport,
            credentials,
            config,
            session: tokio::sync::RwLock::new(Session::new()),
            roster: parking_lot::RwLock::new(Roster::new()),
            op_lock: tokio::sync::Mutex::new(()),
            transport_state_tx,
            transport_state_rx,
            events,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(Self::run_event_pump(Arc::clone(&controller), transport_events));
        controller
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Credentials this controller joins with
    pub fn credentials(&self) -> &SessionCredentials {
        &self.credentials
    }

    /// Current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        self.session.read().await.connection_state
    }

    /// Whether local audio/video are currently enabled
    pub async fn capabilities(&self) -> (bool, bool) {
        let session = self.session.read().await;
        (session.audio_enabled, session.video_enabled)
    }

    /// Snapshot of the remote participant roster
    pub fn participants(&self) -> Vec<RemoteParticipant> {
        self.roster.read().values().cloned().collect()
    }

    /// Join the session
    ///
    /// A no-op while a join is in progress or the session is connected.
    /// Acquisition failures degrade the corresponding capability without
    /// failing the join; transport failures roll back and surface.
    pub async fn join(&self) -> Result<()> {
        let _guard = self.op_lock.lock().await;

        {
            let session = self.session.read().await;
            if session.connection_state != ConnectionState::Disconnected {
                info!(
                    channel = %self.credentials.channel,
                    state = %session.connection_state,
                    "join ignored, session already active"
                );
                return Ok(());
            }
        }

        // A previous session may still be winding down on the shared
        // transport; drain it before starting over.
        if *self.transport_state_rx.borrow() != ConnectionState::Disconnected {
            debug!(channel = %self.credentials.channel, "transport not settled, leaving first");
            if let Err(e) = self.transport.leave().await {
                warn!(error = %e, "pre-join transport leave failed");
            }
            let mut state_rx = self.transport_state_rx.clone();
            self.wait_for_state(&mut state_rx, ConnectionState::Disconnected, "disconnected state")
                .await?;
        }

        self.session.write().await.connection_state = ConnectionState::Connecting;

        // Acquire tracks independently: no camera must not cost the microphone.
        let audio_track = match self.transport.create_audio_track().await {
            Ok(track) => Some(track),
            Err(e) => {
                warn!(
                    uid = self.credentials.uid,
                    error = %e,
                    "microphone acquisition failed, continuing without audio"
                );
                None
            }
        };
        let video_track = match self.transport.create_video_track().await {
            Ok(track) => Some(track),
            Err(e) => {
                warn!(
                    uid = self.credentials.uid,
                    error = %e,
                    "camera acquisition failed, continuing without video"
                );
                None
            }
        };

        // Snapshot the state receiver before the join call so the Connected
        // confirmation cannot slip past unseen.
        let mut state_rx = self.transport_state_rx.clone();

        if let Err(e) = self.transport.join(&self.credentials).await {
            error!(
                channel = %self.credentials.channel,
                uid = self.credentials.uid,
                error = %e,
                "transport join failed"
            );
            close_track(audio_track).await;
            close_track(video_track).await;
            self.session.write().await.reset();
            return Err(e);
        }

        {
            let mut session = self.session.write().await;
            session.audio_enabled = audio_track.is_some();
            session.video_enabled = video_track.is_some();
            session.audio_track = audio_track.clone();
            session.video_track = video_track.clone();
        }

        if let Err(e) = self
            .wait_for_state(&mut state_rx, ConnectionState::Connected, "connected state")
            .await
        {
            warn!(
                channel = %self.credentials.channel,
                error = %e,
                "no connected confirmation, rolling back join"
            );
            self.teardown_session(true).await;
            return Err(AppError::Transport(format!(
                "no connected confirmation within {}ms",
                self.config.state_wait_timeout_ms
            )));
        }

        self.session.write().await.connection_state = ConnectionState::Connected;

        let tracks: Vec<_> = [audio_track.clone(), video_track.clone()]
            .into_iter()
            .flatten()
            .collect();
        if !tracks.is_empty() {
            if let Err(e) = self.transport.publish(&tracks).await {
                error!(
                    channel = %self.credentials.channel,
                    uid = self.credentials.uid,
                    error = %e,
                    "publish failed, rolling back join"
                );
                self.teardown_session(true).await;
                return Err(e);
            }
        }

        info!(
            channel = %self.credentials.channel,
            uid = self.credentials.uid,
            audio = audio_track.is_some(),
            video = video_track.is_some(),
            "session ready"
        );
        let _ = self.events.send(SessionEvent::Ready {
            audio: audio_track.is_some(),
            video: video_track.and_then(|t| t.frame_source()),
        });
        Ok(())
    }

    /// Leave the session
    ///
    /// Idempotent. Local tracks are stopped before the transport leave so no
    /// capture races a closed track, and observable state is reset even if
    /// the transport call fails.
    pub async fn leave(&self) {
        let _guard = self.op_lock.lock().await;
        self.teardown_session(false).await;
    }

    /// Toggle the local audio track; a no-op when no track was acquired
    pub async fn toggle_audio(&self) -> Result<()> {
        let (track, enabled) = {
            let session = self.session.read().await;
            (session.audio_track.clone(), session.audio_enabled)
        };
        let Some(track) = track else {
            debug!("audio toggle ignored, no local audio track");
            return Ok(());
        };
        track.set_enabled(!enabled).await?;
        self.session.write().await.audio_enabled = !enabled;
        Ok(())
    }

    /// Toggle the local video track; a no-op when no track was acquired
    pub async fn toggle_video(&self) -> Result<()> {
        let (track, enabled) = {
            let session = self.session.read().await;
            (session.video_track.clone(), session.video_enabled)
        };
        let Some(track) = track else {
            debug!("video toggle ignored, no local video track");
            return Ok(());
        };
        track.set_enabled(!enabled).await?;
        self.session.write().await.video_enabled = !enabled;
        Ok(())
    }

    /// Stop the event pump; the controller is unusable afterwards
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Close tracks, leave the transport if needed, reset state.
    ///
    /// `rollback` marks a failed join: the Left event is suppressed because
    /// no Ready was ever emitted.
    async fn teardown_session(&self, rollback: bool) {
        let (audio, video, state) = {
            let mut session = self.session.write().await;
            (
                session.audio_track.take(),
                session.video_track.take(),
                session.connection_state,
            )
        };

        let had_session = state != ConnectionState::Disconnected;
        if !had_session && audio.is_none() && video.is_none() {
            return;
        }

        // Tracks first: captures must not race a closed transport.
        close_track(audio).await;
        close_track(video).await;

        if had_session {
            if let Err(e) = self.transport.leave().await {
                warn!(
                    channel = %self.credentials.channel,
                    error = %e,
                    "transport leave failed, resetting state anyway"
                );
            }
        }

        self.session.write().await.reset();
        self.roster.write().clear();

        if !rollback {
            info!(channel = %self.credentials.channel, "session left");
            let _ = self.events.send(SessionEvent::Left);
        }
    }

    async fn wait_for_state(
        &self,
        rx: &mut watch::Receiver<ConnectionState>,
        target: ConnectionState,
        operation: &'static str,
    ) -> Result<()> {
        let timeout_ms = self.config.state_wait_timeout_ms;
        tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            rx.wait_for(|state| *state == target),
        )
        .await
        .map_err(|_| AppError::Timeout {
            operation,
            timeout_ms,
        })?
        .map_err(|_| AppError::Transport("transport event stream closed".to_string()))?;
        Ok(())
    }

    /// Consume transport events: connection state into the watch channel,
    /// roster maintenance, and remote-video notifications for the monitor
    /// layer.
    async fn run_event_pump(self: Arc<Self>, mut rx: broadcast::Receiver<TransportEvent>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event) => self.handle_transport_event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "transport event pump lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!(channel = %self.credentials.channel, "transport event pump exiting");
    }

    fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionStateChanged(state) => {
                debug!(state = %state, "transport connection state changed");
                let _ = self.transport_state_tx.send(state);
            }
            TransportEvent::UserJoined { uid } => {
                debug!(uid, "participant joined");
                self.roster
                    .write()
                    .entry(uid)
                    .or_insert_with(|| RemoteParticipant::new(uid));
            }
            TransportEvent::UserLeft { uid } => {
                debug!(uid, "participant left");
                let removed = self.roster.write().remove(&uid);
                if removed.map(|p| p.video.is_some()).unwrap_or(false) {
                    let _ = self.events.send(SessionEvent::RemoteVideoRemoved { uid });
                }
            }
            TransportEvent::UserPublished { uid, track } => {
                let mut roster = self.roster.write();
                let participant = roster
                    .entry(uid)
                    .or_insert_with(|| RemoteParticipant::new(uid));
                match track.kind {
                    MediaKind::Video => {
                        participant.video = track.frames.clone();
                        let display_name = participant.display_name.clone();
                        drop(roster);
                        if let Some(source) = track.frames {
                            debug!(uid, "remote video published");
                            let _ = self.events.send(SessionEvent::RemoteVideoAdded {
                                uid,
                                display_name,
                                source,
                            });
                        }
                    }
                    MediaKind::Audio => {
                        participant.has_audio = true;
                    }
                }
            }
            TransportEvent::UserUnpublished { uid, kind } => {
                let mut roster = self.roster.write();
                let Some(participant) = roster.get_mut(&uid) else {
                    return;
                };
                match kind {
                    MediaKind::Video => {
                        if participant.video.take().is_some() {
                            drop(roster);
                            debug!(uid, "remote video unpublished");
                            let _ = self.events.send(SessionEvent::RemoteVideoRemoved { uid });
                        }
                    }
                    MediaKind::Audio => {
                        participant.has_audio = false;
                    }
                }
            }
            TransportEvent::VolumeIndicator(levels) => {
                let mut roster = self.roster.write();
                for level in levels {
                    if let Some(participant) = roster.get_mut(&level.uid) {
                        participant.speaking = level.level > self.config.speaking_threshold;
                    }
                }
            }
        }
    }
}

async fn close_track(track: Option<Arc<dyn crate::session::transport::LocalTrack>>) {
    if let Some(track) = track {
        track.close().await;
    }
}
