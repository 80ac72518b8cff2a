//! Periodic frame sampling loop
//!
//! One [`FrameSampler`] per monitored video source. Each cycle captures a
//! frame, compresses it, and uploads it to the analyzer, retrying the same
//! frame with backoff before giving up on it. A run of failed cycles opens a
//! circuit breaker that pauses sampling for a fixed interval instead of
//! hammering a down analyzer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::analyzer::{Analyzer, FrameUpload};
use crate::config::SamplerConfig;
use crate::error::Result;
use crate::sampler::encoder::FrameEncoder;
use crate::sampler::interval::sampling_interval_ms;
use crate::session::FrameSource;

/// Mutable sampler state, shared with the handle
#[derive(Debug, Clone)]
pub struct SamplerState {
    /// Sampling suspended while false; ticks are consumed but skipped
    pub enabled: bool,
    /// A cycle is mid-flight; overlapping ticks are skipped
    pub upload_in_flight: bool,
    /// A retry backoff sleep is pending within the current cycle
    pub retry_scheduled: bool,
    /// Retries consumed by the current or last cycle
    pub retry_count: u32,
    /// Failed cycles since the last success or breaker reset
    pub consecutive_errors: u32,
    /// This source's hash-derived sampling period
    pub interval_ms: u64,
    pub last_capture: Option<Instant>,
}

/// Handle to one per-source sampling task
pub struct FrameSampler {
    uid: u64,
    state: Arc<Mutex<SamplerState>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FrameSampler {
    pub fn spawn(
        uid: u64,
        username: impl Into<String>,
        channel_name: impl Into<String>,
        source: Arc<dyn FrameSource>,
        encoder: Arc<dyn FrameEncoder>,
        analyzer: Arc<dyn Analyzer>,
        config: SamplerConfig,
    ) -> Self {
        let username = username.into();
        let interval_ms = sampling_interval_ms(&username, uid, &config);
        let state = Arc::new(Mutex::new(SamplerState {
            enabled: true,
            upload_in_flight: false,
            retry_scheduled: false,
            retry_count: 0,
            consecutive_errors: 0,
            interval_ms,
            last_capture: None,
        }));
        let cancel = CancellationToken::new();

        let worker = SamplerWorker {
            uid,
            username,
            channel_name: channel_name.into(),
            source,
            encoder,
            analyzer,
            config,
            state: Arc::clone(&state),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            uid,
            state,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn state(&self) -> SamplerState {
        self.state.lock().clone()
    }

    /// Suspend or resume sampling without tearing the task down
    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    /// Stop the sampling task and wait for it to exit
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

struct SamplerWorker {
    uid: u64,
    username: String,
    channel_name: String,
    source: Arc<dyn FrameSource>,
    encoder: Arc<dyn FrameEncoder>,
    analyzer: Arc<dyn Analyzer>,
    config: SamplerConfig,
    state: Arc<Mutex<SamplerState>>,
    cancel: CancellationToken,
}

impl SamplerWorker {
    async fn run(self) {
        let period = Duration::from_millis(self.state.lock().interval_ms);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(
            uid = self.uid,
            interval_ms = period.as_millis() as u64,
            "sampler started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            {
                let state = self.state.lock();
                if !state.enabled || state.upload_in_flight || state.retry_scheduled {
                    continue;
                }
                if let Some(last) = state.last_capture {
                    if last.elapsed() < Duration::from_millis(self.config.min_interval_ms) {
                        continue;
                    }
                }
            }

            let cycle_ok = self.run_cycle().await;
            if self.cancel.is_cancelled() {
                break;
            }

            if cycle_ok {
                let mut state = self.state.lock();
                state.consecutive_errors = 0;
                state.retry_count = 0;
            } else {
                let errors = {
                    let mut state = self.state.lock();
                    state.consecutive_errors += 1;
                    state.consecutive_errors
                };
                if errors > self.config.circuit_failure_threshold {
                    warn!(
                        uid = self.uid,
                        errors,
                        pause_ms = self.config.circuit_pause_ms,
                        "sampler circuit open, pausing uploads"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(self.config.circuit_pause_ms)) => {}
                    }
                    self.state.lock().consecutive_errors = 0;
                    ticker.reset();
                }
            }
        }
        debug!(uid = self.uid, "sampler stopped");
    }

    /// One capture-encode-upload cycle; true on success
    async fn run_cycle(&self) -> bool {
        self.state.lock().upload_in_flight = true;
        let result = self.capture_and_upload().await;
        {
            let mut state = self.state.lock();
            state.upload_in_flight = false;
            state.retry_scheduled = false;
        }
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(uid = self.uid, error = %e, "sampling cycle failed");
                false
            }
        }
    }

    async fn capture_and_upload(&self) -> Result<()> {
        let frame = self.source.capture().await?;
        self.state.lock().last_capture = Some(Instant::now());
        let jpeg = self.encoder.encode(&frame)?;

        // Same frame across attempts; a retried upload must not capture anew.
        let mut last_error = None;
        for attempt in 0..self.config.max_upload_attempts {
            if attempt > 0 {
                let delay = self.config.retry_delay_ms(attempt - 1);
                {
                    let mut state = self.state.lock();
                    state.retry_scheduled = true;
                    state.retry_count = attempt;
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                }
                self.state.lock().retry_scheduled = false;
            }

            let upload = FrameUpload {
                frame: jpeg.clone(),
                user_id: self.uid,
                channel_name: self.channel_name.clone(),
                username: self.username.clone(),
            };
            match self.analyzer.analyze_frame(upload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(uid = self.uid, attempt = attempt + 1, error = %e, "upload attempt failed");
                    last_error = Some(e);
                }
            }
        }
        // max_upload_attempts is at least 1, so an error is always recorded
        Err(last_error.unwrap_or_else(|| {
            crate::error::AppError::Upload("no upload attempts configured".to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::MonitorStartRequest;
    use crate::error::AppError;
    use crate::session::RawFrame;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        captures: AtomicU32,
    }

    #[async_trait]
    impl FrameSource for CountingSource {
        async fn capture(&self) -> Result<RawFrame> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            Ok(RawFrame {
                width: 4,
                height: 4,
                data: Bytes::from(vec![0u8; 48]),
            })
        }
    }

    struct StubEncoder;

    impl FrameEncoder for StubEncoder {
        fn encode(&self, _frame: &RawFrame) -> Result<Bytes> {
            Ok(Bytes::from_static(b"jpeg"))
        }
    }

    /// Fails the first `fail_first` uploads, then succeeds
    struct FlakyAnalyzer {
        fail_first: u32,
        uploads: AtomicU32,
    }

    impl FlakyAnalyzer {
        fn failing_first(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                uploads: AtomicU32::new(0),
            })
        }

        fn always_failing() -> Arc<Self> {
            Self::failing_first(u32::MAX)
        }
    }

    #[async_trait]
    impl Analyzer for FlakyAnalyzer {
        async fn analyze_frame(&self, _upload: FrameUpload) -> Result<()> {
            let call = self.uploads.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(AppError::Upload("analyzer unavailable".to_string()))
            } else {
                Ok(())
            }
        }

        async fn start_monitoring(&self, _request: &MonitorStartRequest) -> Result<()> {
            Ok(())
        }
    }

    fn spawn_sampler(
        source: Arc<CountingSource>,
        analyzer: Arc<FlakyAnalyzer>,
    ) -> FrameSampler {
        FrameSampler::spawn(
            7,
            "alice",
            "room-1",
            source,
            Arc::new(StubEncoder),
            analyzer,
            SamplerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_once_per_interval() {
        let source = Arc::new(CountingSource {
            captures: AtomicU32::new(0),
        });
        let analyzer = FlakyAnalyzer::failing_first(0);
        let sampler = spawn_sampler(Arc::clone(&source), Arc::clone(&analyzer));

        let interval = sampler.state().interval_ms;
        tokio::time::sleep(Duration::from_millis(interval * 3 + 100)).await;
        assert_eq!(source.captures.load(Ordering::SeqCst), 3);
        assert_eq!(analyzer.uploads.load(Ordering::SeqCst), 3);
        sampler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_same_frame_then_recovers() {
        let source = Arc::new(CountingSource {
            captures: AtomicU32::new(0),
        });
        let analyzer = FlakyAnalyzer::failing_first(2);
        let sampler = spawn_sampler(Arc::clone(&source), Arc::clone(&analyzer));

        let interval = sampler.state().interval_ms;
        // One tick plus both retry backoffs (500 + 1000 ms).
        tokio::time::sleep(Duration::from_millis(interval + 2_000)).await;

        // One capture fed all three attempts.
        assert_eq!(source.captures.load(Ordering::SeqCst), 1);
        assert_eq!(analyzer.uploads.load(Ordering::SeqCst), 3);
        let state = sampler.state();
        assert_eq!(state.consecutive_errors, 0);
        assert_eq!(state.retry_count, 0);
        sampler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_pauses_sampling() {
        let source = Arc::new(CountingSource {
            captures: AtomicU32::new(0),
        });
        let analyzer = FlakyAnalyzer::always_failing();
        let sampler = spawn_sampler(Arc::clone(&source), Arc::clone(&analyzer));

        let interval = sampler.state().interval_ms;
        // Six failed cycles, each burning 3 attempts with 1.5s of backoff.
        tokio::time::sleep(Duration::from_millis(interval * 6 + 2_000)).await;
        assert_eq!(source.captures.load(Ordering::SeqCst), 6);
        assert_eq!(analyzer.uploads.load(Ordering::SeqCst), 18);
        assert_eq!(sampler.state().consecutive_errors, 6);

        // Mid-pause: no new captures.
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(source.captures.load(Ordering::SeqCst), 6);

        // Pause over, error run reset, sampling resumes on the next tick.
        tokio::time::sleep(Duration::from_millis(4_500 + interval + 2_000)).await;
        assert_eq!(source.captures.load(Ordering::SeqCst), 7);
        assert_eq!(sampler.state().consecutive_errors, 1);
        sampler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_sampler_skips_ticks() {
        let source = Arc::new(CountingSource {
            captures: AtomicU32::new(0),
        });
        let sampler = spawn_sampler(Arc::clone(&source), FlakyAnalyzer::failing_first(0));
        sampler.set_enabled(false);

        let interval = sampler.state().interval_ms;
        tokio::time::sleep(Duration::from_millis(interval * 3 + 100)).await;
        assert_eq!(source.captures.load(Ordering::SeqCst), 0);

        sampler.set_enabled(true);
        tokio::time::sleep(Duration::from_millis(interval)).await;
        assert_eq!(source.captures.load(Ordering::SeqCst), 1);
        sampler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_the_loop() {
        let source = Arc::new(CountingSource {
            captures: AtomicU32::new(0),
        });
        let sampler = spawn_sampler(Arc::clone(&source), FlakyAnalyzer::failing_first(0));

        let interval = sampler.state().interval_ms;
        tokio::time::sleep(Duration::from_millis(interval + 100)).await;
        assert_eq!(source.captures.load(Ordering::SeqCst), 1);

        sampler.stop().await;
        tokio::time::sleep(Duration::from_millis(interval * 5)).await;
        assert_eq!(source.captures.load(Ordering::SeqCst), 1);
    }
}
