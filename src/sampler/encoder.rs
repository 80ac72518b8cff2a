//! JPEG frame encoder
//!
//! Captured RGB frames are compressed to JPEG before upload; the analyzer
//! decodes nothing else. Behind a trait so the sampling loop can be tested
//! without a codec.

use bytes::Bytes;

use crate::error::{AppError, Result};
use crate::session::RawFrame;

/// Compresses captured frames for upload
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &RawFrame) -> Result<Bytes>;
}

/// turbojpeg-backed encoder for RGB24 frames
pub struct JpegFrameEncoder {
    quality: i32,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100) as i32,
        }
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&self, frame: &RawFrame) -> Result<Bytes> {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let expected = width * height * 3;
        if frame.data.len() < expected {
            return Err(AppError::Encode(format!(
                "RGB frame too small: {} < {}",
                frame.data.len(),
                expected
            )));
        }

        let image = turbojpeg::Image {
            pixels: &frame.data[..expected],
            width,
            pitch: width * 3,
            height,
            format: turbojpeg::PixelFormat::RGB,
        };
        let jpeg = turbojpeg::compress(image, self.quality, turbojpeg::Subsamp::Sub2x2)
            .map_err(|e| AppError::Encode(format!("JPEG compression failed: {}", e)))?;
        Ok(Bytes::from(jpeg.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undersized_frame_rejected() {
        let encoder = JpegFrameEncoder::new(80);
        let frame = RawFrame {
            width: 64,
            height: 64,
            data: Bytes::from(vec![0u8; 16]),
        };
        assert!(matches!(encoder.encode(&frame), Err(AppError::Encode(_))));
    }

    #[test]
    fn test_rgb_frame_encodes_to_jpeg() {
        let encoder = JpegFrameEncoder::new(80);
        let frame = RawFrame {
            width: 32,
            height: 32,
            data: Bytes::from(vec![128u8; 32 * 32 * 3]),
        };
        let jpeg = encoder.encode(&frame).unwrap();
        // JPEG SOI marker
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
