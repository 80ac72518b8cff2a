//! Monitoring supervisor
//!
//! Bridges session events to per-source samplers: when the session becomes
//! ready it announces the monitoring session to the analyzer and starts
//! sampling the local camera; remote video tracks get a sampler each for as
//! long as they are published. Leaving the session stops everything.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::{Analyzer, MonitorStartRequest};
use crate::config::SamplerConfig;
use crate::sampler::{FrameEncoder, FrameSampler};
use crate::session::{FrameSource, SessionCredentials, SessionEvent};

/// Supervises one sampler per monitored video source
pub struct MonitorSupervisor {
    samplers: Arc<Mutex<HashMap<u64, FrameSampler>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorSupervisor {
    pub fn spawn(
        events: broadcast::Receiver<SessionEvent>,
        credentials: SessionCredentials,
        analyzer: Arc<dyn Analyzer>,
        encoder: Arc<dyn FrameEncoder>,
        config: SamplerConfig,
    ) -> Self {
        let samplers = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let worker = SupervisorWorker {
            events,
            credentials,
            analyzer,
            encoder,
            config,
            samplers: Arc::clone(&samplers),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            samplers,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Uids currently being sampled
    pub fn monitored_uids(&self) -> Vec<u64> {
        self.samplers.lock().keys().copied().collect()
    }

    pub fn sampler_count(&self) -> usize {
        self.samplers.lock().len()
    }

    /// Stop the supervisor and every sampler it manages
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let samplers: Vec<_> = {
            let mut map = self.samplers.lock();
            map.drain().map(|(_, sampler)| sampler).collect()
        };
        for sampler in samplers {
            sampler.stop().await;
        }
    }
}

struct SupervisorWorker {
    events: broadcast::Receiver<SessionEvent>,
    credentials: SessionCredentials,
    analyzer: Arc<dyn Analyzer>,
    encoder: Arc<dyn FrameEncoder>,
    config: SamplerConfig,
    samplers: Arc<Mutex<HashMap<u64, FrameSampler>>>,
    cancel: CancellationToken,
}

impl SupervisorWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.events.recv() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "monitor supervisor lagged behind session events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        self.stop_all().await;
        debug!("monitor supervisor exiting");
    }

    async fn handle_event(&self, event: SessionEvent) {
        match event {
            // Only the monitoring authority announces sessions and uploads
            // frames; everyone else just holds the call.
            SessionEvent::Ready { .. } | SessionEvent::RemoteVideoAdded { .. }
                if !self.credentials.is_host =>
            {
                debug!(uid = self.credentials.uid, "not the monitoring authority, ignoring");
            }
            SessionEvent::Ready { video, .. } => {
                let request = MonitorStartRequest {
                    channel_name: self.credentials.channel.clone(),
                    uid: self.credentials.uid,
                    username: self.credentials.username.clone(),
                };
                // The analyzer may already know this session; failure here
                // must not keep the local camera unmonitored.
                if let Err(e) = self.analyzer.start_monitoring(&request).await {
                    warn!(channel = %self.credentials.channel, error = %e, "monitoring start failed");
                }
                if let Some(source) = video {
                    info!(uid = self.credentials.uid, "monitoring local camera");
                    self.start_sampler(
                        self.credentials.uid,
                        self.credentials.username.clone(),
                        source,
                    )
                    .await;
                }
            }
            SessionEvent::RemoteVideoAdded {
                uid,
                display_name,
                source,
            } => {
                info!(uid, name = %display_name, "monitoring remote video");
                self.start_sampler(uid, display_name, source).await;
            }
            SessionEvent::RemoteVideoRemoved { uid } => {
                let sampler = self.samplers.lock().remove(&uid);
                if let Some(sampler) = sampler {
                    info!(uid, "remote video gone, sampler stopped");
                    sampler.stop().await;
                }
            }
            SessionEvent::Left => {
                info!("session left, stopping all samplers");
                self.stop_all().await;
            }
        }
    }

    async fn start_sampler(&self, uid: u64, username: String, source: Arc<dyn FrameSource>) {
        let sampler = FrameSampler::spawn(
            uid,
            username,
            self.credentials.channel.clone(),
            source,
            Arc::clone(&self.encoder),
            Arc::clone(&self.analyzer),
            self.config.clone(),
        );
        // A republished track replaces any sampler still running for the uid.
        let previous = self.samplers.lock().insert(uid, sampler);
        if let Some(previous) = previous {
            previous.stop().await;
        }
    }

    async fn stop_all(&self) {
        let samplers: Vec<_> = {
            let mut map = self.samplers.lock();
            map.drain().map(|(_, sampler)| sampler).collect()
        };
        for sampler in samplers {
            sampler.stop().await;
        }
    }
}
