//! Periodic frame capture, JPEG compression, and analyzer upload.

mod encoder;
mod interval;
mod worker;

pub use encoder::{FrameEncoder, JpegFrameEncoder};
pub use interval::sampling_interval_ms;
pub use worker::{FrameSampler, SamplerState};
