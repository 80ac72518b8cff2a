//! Engine configuration
//!
//! Plain serde structs with defaults carrying the tuning constants for the
//! session controller, push channel, and frame samplers.

mod schema;

pub use schema::{
    push_channel_url, AnalyzerConfig, ChannelConfig, EngineConfig, SamplerConfig, SessionConfig,
};
