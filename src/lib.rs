//! Client-side resilience engine for monitored live sessions
//!
//! A host runs an audio/video session whose participants are watched by a
//! remote behavior analyzer. This crate keeps that arrangement alive on an
//! unreliable network: the session controller drives the join/leave/publish
//! state machine with bounded waits and rollback, the telemetry channel
//! holds a reconnecting push connection for behavior alerts, and per-source
//! frame samplers feed the analyzer with rate-limited JPEG captures guarded
//! by retries and a circuit breaker.
//!
//! The media transport and analyzer service sit behind traits
//! ([`session::Transport`], [`analyzer::Analyzer`]); everything above them
//! is plain tokio.

pub mod alerts;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod monitor;
pub mod sampler;
pub mod session;
pub mod telemetry;

pub use error::{AppError, Result};
