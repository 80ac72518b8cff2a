//! Behavior analyzer HTTP client
//!
//! The analyzer ingests JPEG frames over multipart POST and runs detection
//! server-side; alerts come back over the push channel, not in the upload
//! response. Behind a trait so sampling and supervision logic can be tested
//! against scripted outcomes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use crate::config::AnalyzerConfig;
use crate::error::{AppError, Result};

/// One captured frame ready for upload
#[derive(Debug, Clone)]
pub struct FrameUpload {
    pub frame: Bytes,
    pub user_id: u64,
    pub channel_name: String,
    pub username: String,
}

/// Request to start a monitoring session for a channel
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStartRequest {
    pub channel_name: String,
    pub uid: u64,
    pub username: String,
}

/// Analyzer service operations used by the client
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze_frame(&self, upload: FrameUpload) -> Result<()>;
    async fn start_monitoring(&self, request: &MonitorStartRequest) -> Result<()>;
}

/// reqwest-backed analyzer client
pub struct HttpAnalyzer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AppError::Upload(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze_frame(&self, upload: FrameUpload) -> Result<()> {
        let part = reqwest::multipart::Part::bytes(upload.frame.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| AppError::Upload(format!("multipart frame part: {}", e)))?;
        let form = reqwest::multipart::Form::new()
            .part("frame", part)
            .text("userId", upload.user_id.to_string())
            .text("channelName", upload.channel_name.clone())
            .text("username", upload.username.clone());

        let response = self
            .client
            .post(format!("{}/api/behavior/analyze", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::Upload(format!("frame upload failed: {}", e)))?;
        response
            .error_for_status()
            .map_err(|e| AppError::Upload(format!("analyzer rejected frame: {}", e)))?;
        debug!(
            user_id = upload.user_id,
            channel = %upload.channel_name,
            bytes = upload.frame.len(),
            "frame uploaded"
        );
        Ok(())
    }

    async fn start_monitoring(&self, request: &MonitorStartRequest) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/behavior/start", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::Upload(format!("monitoring start failed: {}", e)))?;
        response
            .error_for_status()
            .map_err(|e| AppError::Upload(format!("monitoring start rejected: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_wire_format() {
        let request = MonitorStartRequest {
            channel_name: "room-1".to_string(),
            uid: 42,
            username: "alice".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"channelName": "room-1", "uid": 42, "username": "alice"})
        );
    }
}
