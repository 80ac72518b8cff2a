//! Resilient alert push channel
//!
//! One [`TelemetryChannel`] per joined session. The worker task owns the
//! socket: it subscribes, requests buffered alerts, heartbeats, dispatches
//! inbound messages, and reconnects with bounded exponential backoff when
//! the connection drops. Exhausting the reconnect budget parks the channel
//! in a terminal error status; an explicit close sends a normal closure and
//! suppresses reconnection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alerts::AlertStore;
use crate::config::ChannelConfig;
use crate::error::{AppError, Result};
use crate::telemetry::protocol::{ClientMessage, ServerMessage};
use crate::telemetry::registry::ChannelRegistry;
use crate::telemetry::socket::{PushConnector, PushSocket};

/// Push connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    /// Socket open, subscription sent
    Connected,
    /// Subscription acknowledged by the server
    Active,
    Disconnected,
    /// Reconnect budget exhausted; no further automatic attempts
    Error,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Active => write!(f, "active"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Handle to an open push channel and its worker task
pub struct TelemetryChannel {
    channel_id: String,
    status: Arc<RwLock<ChannelStatus>>,
    reconnect_attempts: Arc<AtomicU32>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryChannel {
    /// Open the push channel for a session
    ///
    /// Fails with `Channel` when one is already registered for this channel
    /// id (e.g. a remounted view racing its predecessor's teardown).
    pub fn open(
        channel_id: impl Into<String>,
        url: impl Into<String>,
        connector: Arc<dyn PushConnector>,
        alerts: Arc<AlertStore>,
        registry: Arc<ChannelRegistry>,
        config: ChannelConfig,
    ) -> Result<Self> {
        let channel_id = channel_id.into();
        if !registry.register(&channel_id) {
            return Err(AppError::Channel(format!(
                "push channel already open for {}",
                channel_id
            )));
        }

        let status = Arc::new(RwLock::new(ChannelStatus::Connecting));
        let reconnect_attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let worker = ChannelWorker {
            channel_id: channel_id.clone(),
            url: url.into(),
            connector,
            alerts,
            registry,
            config,
            status: Arc::clone(&status),
            reconnect_attempts: Arc::clone(&reconnect_attempts),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        Ok(Self {
            channel_id,
            status,
            reconnect_attempts,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.read()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Tear the channel down: normal closure, no reconnect
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Why a connected session ended
enum SessionEnd {
    /// Explicit teardown; do not reconnect
    Cancelled,
    /// Connection lost; reconnect if budget remains
    Lost(String),
}

/// What the session loop should do next
enum Step {
    Cancelled,
    RequestReplay,
    Heartbeat,
    Inbound(Option<Result<ServerMessage>>),
}

struct ChannelWorker {
    channel_id: String,
    url: String,
    connector: Arc<dyn PushConnector>,
    alerts: Arc<AlertStore>,
    registry: Arc<ChannelRegistry>,
    config: ChannelConfig,
    status: Arc<RwLock<ChannelStatus>>,
    reconnect_attempts: Arc<AtomicU32>,
    cancel: CancellationToken,
}

impl ChannelWorker {
    async fn run(self) {
        let mut attempts: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                *self.status.write() = ChannelStatus::Disconnected;
                break;
            }
            *self.status.write() = ChannelStatus::Connecting;

            let connect = tokio::time::timeout(
                Duration::from_millis(self.config.connect_timeout_ms),
                self.connector.connect(&self.url),
            );
            let socket = tokio::select! {
                _ = self.cancel.cancelled() => {
                    *self.status.write() = ChannelStatus::Disconnected;
                    break;
                }
                result = connect => match result {
                    Ok(Ok(socket)) => Some(socket),
                    Ok(Err(e)) => {
                        warn!(
                            channel = %self.channel_id,
                            attempt = attempts + 1,
                            error = %e,
                            "push channel open failed"
                        );
                        None
                    }
                    Err(_) => {
                        warn!(
                            channel = %self.channel_id,
                            attempt = attempts + 1,
                            timeout_ms = self.config.connect_timeout_ms,
                            "push channel open timed out"
                        );
                        None
                    }
                },
            };

            if let Some(mut socket) = socket {
                attempts = 0;
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                *self.status.write() = ChannelStatus::Connected;
                info!(channel = %self.channel_id, "push channel connected");

                match self.run_session(socket.as_mut()).await {
                    SessionEnd::Cancelled => {
                        if let Err(e) = socket.close().await {
                            debug!(channel = %self.channel_id, error = %e, "close frame not sent");
                        }
                        *self.status.write() = ChannelStatus::Disconnected;
                        break;
                    }
                    SessionEnd::Lost(reason) => {
                        warn!(channel = %self.channel_id, reason = %reason, "push channel lost");
                    }
                }
            }

            if attempts >= self.config.max_reconnect_attempts {
                error!(
                    channel = %self.channel_id,
                    attempts = attempts + 1,
                    "push channel reconnect budget exhausted"
                );
                *self.status.write() = ChannelStatus::Error;
                break;
            }

            let delay_ms = self.config.backoff_delay_ms(attempts);
            attempts += 1;
            self.reconnect_attempts.store(attempts, Ordering::SeqCst);
            *self.status.write() = ChannelStatus::Disconnected;
            debug!(
                channel = %self.channel_id,
                attempt = attempts,
                delay_ms,
                "push channel reconnect scheduled"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
        }

        self.registry.unregister(&self.channel_id);
        debug!(channel = %self.channel_id, "push channel worker exiting");
    }

    async fn run_session(&self, socket: &mut dyn PushSocket) -> SessionEnd {
        if let Err(e) = socket
            .send(&ClientMessage::subscribe(self.channel_id.clone()))
            .await
        {
            return SessionEnd::Lost(format!("subscribe failed: {}", e));
        }

        let replay = tokio::time::sleep(Duration::from_millis(self.config.alert_replay_delay_ms));
        tokio::pin!(replay);
        let mut replay_requested = false;

        let heartbeat_period = Duration::from_millis(self.config.heartbeat_interval_ms);
        let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_period, heartbeat_period);

        // Any inbound traffic counts as liveness; a whole heartbeat interval
        // without it means the peer is silently gone.
        let mut saw_inbound = true;

        loop {
            let step = {
                let inbound = socket.recv();
                tokio::pin!(inbound);
                tokio::select! {
                    _ = self.cancel.cancelled() => Step::Cancelled,
                    _ = &mut replay, if !replay_requested => Step::RequestReplay,
                    _ = heartbeat.tick() => Step::Heartbeat,
                    message = &mut inbound => Step::Inbound(message),
                }
            };

            match step {
                Step::Cancelled => return SessionEnd::Cancelled,
                Step::RequestReplay => {
                    replay_requested = true;
                    if let Err(e) = socket.send(&ClientMessage::get_alerts()).await {
                        return SessionEnd::Lost(format!("alert replay request failed: {}", e));
                    }
                }
                Step::Heartbeat => {
                    if !saw_inbound {
                        return SessionEnd::Lost("no traffic since last heartbeat".to_string());
                    }
                    saw_inbound = false;
                    let timestamp = chrono::Utc::now().timestamp_millis();
                    if let Err(e) = socket.send(&ClientMessage::ping(timestamp)).await {
                        return SessionEnd::Lost(format!("heartbeat ping failed: {}", e));
                    }
                }
                Step::Inbound(None) => return SessionEnd::Lost("closed by server".to_string()),
                Step::Inbound(Some(Err(e))) => return SessionEnd::Lost(e.to_string()),
                Step::Inbound(Some(Ok(message))) => {
                    saw_inbound = true;
                    if let Err(e) = self.dispatch(message, socket).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
            }
        }
    }

    async fn dispatch(&self, message: ServerMessage, socket: &mut dyn PushSocket) -> Result<()> {
        match message {
            ServerMessage::BehaviorAlert { alert } => {
                if self.alerts.append(alert.clone()) {
                    info!(
                        channel = %self.channel_id,
                        user_id = alert.user_id,
                        severity = %alert.severity,
                        "behavior alert received"
                    );
                } else {
                    debug!(
                        channel = %self.channel_id,
                        user_id = alert.user_id,
                        "duplicate alert dropped"
                    );
                }
            }
            ServerMessage::ConnectionSuccess { message } => {
                *self.status.write() = ChannelStatus::Active;
                info!(channel = %self.channel_id, message = ?message, "push channel active");
            }
            ServerMessage::ParticipantsUpdate { count } => {
                debug!(channel = %self.channel_id, count, "participants update");
            }
            ServerMessage::Ping { timestamp } => {
                socket.send(&ClientMessage::pong(timestamp)).await?;
            }
            ServerMessage::Pong { .. } => {
                debug!(channel = %self.channel_id, "heartbeat pong");
            }
            ServerMessage::Info { message } => {
                debug!(channel = %self.channel_id, message = ?message, "info message");
            }
            ServerMessage::Unknown => {
                debug!(channel = %self.channel_id, "unrecognized push message ignored");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Alert, Severity};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    enum ConnectOutcome {
        Fail,
        Succeed(Vec<ServerMessage>),
    }

    struct FakeConnector {
        script: Mutex<VecDeque<ConnectOutcome>>,
        connect_calls: AtomicU32,
        sent: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    impl FakeConnector {
        fn new(script: Vec<ConnectOutcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                connect_calls: AtomicU32::new(0),
                sent: Arc::new(Mutex::new(Vec::new())),
            })
        }

        fn always_failing() -> Arc<Self> {
            Self::new(Vec::new())
        }
    }

    #[async_trait]
    impl PushConnector for FakeConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn PushSocket>> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().pop_front() {
                Some(ConnectOutcome::Succeed(inbound)) => Ok(Box::new(FakeSocket {
                    inbound: inbound.into(),
                    sent: Arc::clone(&self.sent),
                })),
                Some(ConnectOutcome::Fail) | None => {
                    Err(AppError::Channel("connection refused".to_string()))
                }
            }
        }
    }

    struct FakeSocket {
        inbound: VecDeque<ServerMessage>,
        sent: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    #[async_trait]
    impl PushSocket for FakeSocket {
        async fn send(&mut self, message: &ClientMessage) -> Result<()> {
            self.sent.lock().push(serde_json::to_value(message)?);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<ServerMessage>> {
            match self.inbound.pop_front() {
                Some(message) => Some(Ok(message)),
                // Stay silent until the heartbeat declares the peer dead.
                None => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    None
                }
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn alert(user_id: u64, timestamp: &str) -> ServerMessage {
        ServerMessage::BehaviorAlert {
            alert: Alert {
                user_id,
                username: None,
                message: "No face visible".to_string(),
                severity: Severity::Medium,
                timestamp: timestamp.to_string(),
                behaviors: vec![],
            },
        }
    }

    fn open_channel(
        connector: Arc<FakeConnector>,
        registry: Arc<ChannelRegistry>,
        alerts: Arc<AlertStore>,
    ) -> TelemetryChannel {
        TelemetryChannel::open(
            "room-1",
            "ws://localhost:8000/ws/behavior",
            connector,
            alerts,
            registry,
            ChannelConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failures_reach_terminal_error() {
        let connector = FakeConnector::always_failing();
        let registry = Arc::new(ChannelRegistry::new());
        let channel = open_channel(
            Arc::clone(&connector),
            Arc::clone(&registry),
            Arc::new(AlertStore::new()),
        );

        // Backoff delays sum to well under a minute.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(channel.status(), ChannelStatus::Error);
        assert_eq!(connector.connect_calls.load(Ordering::SeqCst), 6);

        // Terminal: no further attempts no matter how long we wait.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.connect_calls.load(Ordering::SeqCst), 6);

        // The worker released the open marker on exit.
        assert!(!registry.is_open("room-1"));
        channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_dispatch_and_liveness() {
        let connector = FakeConnector::new(vec![ConnectOutcome::Succeed(vec![
            ServerMessage::ConnectionSuccess { message: None },
            alert(5, "2026-08-30T12:00:00"),
            alert(5, "2026-08-30T12:00:00"),
            ServerMessage::Ping { timestamp: Some(777) },
        ])]);
        let alerts = Arc::new(AlertStore::new());
        let channel = open_channel(
            Arc::clone(&connector),
            Arc::new(ChannelRegistry::new()),
            Arc::clone(&alerts),
        );

        // First heartbeat sends a ping; the silent peer then fails the
        // liveness check on the second interval, and reconnects exhaust.
        tokio::time::sleep(Duration::from_secs(120)).await;

        // Duplicate alert was dropped.
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts.snapshot()[0].user_id, 5);

        let sent = connector.sent.lock().clone();
        assert_eq!(sent[0], serde_json::json!({"channel": "room-1"}));
        assert!(sent.contains(&serde_json::json!({"type": "get_alerts"})));
        assert!(sent.contains(&serde_json::json!({"type": "pong", "timestamp": 777})));
        assert!(sent
            .iter()
            .any(|m| m.get("type").map(|t| t == "ping").unwrap_or(false)));

        channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_suppresses_reconnect() {
        let connector = FakeConnector::new(vec![ConnectOutcome::Succeed(vec![
            ServerMessage::ConnectionSuccess { message: None },
        ])]);
        let registry = Arc::new(ChannelRegistry::new());
        let channel = open_channel(
            Arc::clone(&connector),
            Arc::clone(&registry),
            Arc::new(AlertStore::new()),
        );

        // Let the worker connect and go active.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(channel.status(), ChannelStatus::Active);

        channel.close().await;
        assert_eq!(channel.status(), ChannelStatus::Disconnected);
        assert_eq!(connector.connect_calls.load(Ordering::SeqCst), 1);
        assert!(!registry.is_open("room-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_open_for_same_channel_rejected() {
        let registry = Arc::new(ChannelRegistry::new());
        let channel = open_channel(
            FakeConnector::new(vec![ConnectOutcome::Succeed(vec![])]),
            Arc::clone(&registry),
            Arc::new(AlertStore::new()),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = TelemetryChannel::open(
            "room-1",
            "ws://localhost:8000/ws/behavior",
            FakeConnector::always_failing(),
            Arc::new(AlertStore::new()),
            Arc::clone(&registry),
            ChannelConfig::default(),
        );
        assert!(matches!(second, Err(AppError::Channel(_))));

        channel.close().await;
        // After teardown the channel id is free again.
        assert!(registry.register("room-1"));
    }
}
