//! Contract with the external rendering service.
//!
//! The gateway is slow and occasionally wrong: a successful response is only
//! accepted after [`validate_render`] has checked it against the constraints
//! that were sent with the request.

mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{parse_aspect_ratio, RenderBounds};
use crate::models::RenderKind;

pub use http::{GatewayHealth, HttpGenerationGateway};

const ASPECT_RATIO_TOLERANCE: f64 = 0.02;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("generation service unreachable: {0}")]
    Transport(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation rejected: {0}")]
    Rejected(String),
    #[error("malformed generation response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        GatewayError::Transport(error.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderConstraints {
    pub min_duration_seconds: f64,
    pub max_duration_seconds: f64,
    pub aspect_ratio: String,
}

impl From<&RenderBounds> for RenderConstraints {
    fn from(bounds: &RenderBounds) -> Self {
        Self {
            min_duration_seconds: bounds.min_duration_seconds,
            max_duration_seconds: bounds.max_duration_seconds,
            aspect_ratio: bounds.aspect_ratio.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderRequest {
    pub job_id: String,
    /// Sent as the `Idempotency-Key` header, never in the body.
    #[serde(skip)]
    pub idempotency_key: String,
    pub kind: RenderKind,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_text: Option<String>,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub constraints: RenderConstraints,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssetPayload {
    Bytes(Vec<u8>),
    Reference(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub asset: AssetPayload,
    pub duration_seconds: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<u64>,
    pub model: Option<String>,
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Renders one unit of content.
    ///
    /// `request.idempotency_key` names the attempt, not the job. A stale
    /// reclaim of an attempt that never finished repeats the key, so the
    /// gateway can return the render it already paid for. Once a failure has
    /// been recorded, or an operator retried the episode, the next attempt
    /// carries `{job_id}:{manual_retries}.{failures}`, so a rejected render
    /// is not served again from the gateway's cache.
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput, GatewayError>;
}

/// Checks a gateway "ok" against the constraints. The returned message is the
/// human-readable failure reason shown to submitters.
pub fn validate_render(
    kind: RenderKind,
    output: &RenderOutput,
    constraints: &RenderConstraints,
) -> Result<(), String> {
    if let AssetPayload::Bytes(bytes) = &output.asset {
        if bytes.is_empty() {
            return Err(format!("{kind} asset is empty"));
        }
    }
    if let AssetPayload::Reference(reference) = &output.asset {
        if reference.trim().is_empty() {
            return Err(format!("{kind} asset reference is empty"));
        }
    }

    let duration = output.duration_seconds;
    if !duration.is_finite()
        || duration < constraints.min_duration_seconds
        || duration > constraints.max_duration_seconds
    {
        return Err(format!(
            "{kind} duration out of bounds: {duration:.1}s outside {:.1}s..{:.1}s",
            constraints.min_duration_seconds, constraints.max_duration_seconds
        ));
    }

    if kind == RenderKind::Video {
        if let (Some(width), Some(height), Some(expected)) = (
            output.width,
            output.height,
            parse_aspect_ratio(&constraints.aspect_ratio),
        ) {
            if height == 0 {
                return Err("video reported zero height".to_string());
            }
            let actual = width as f64 / height as f64;
            if ((actual - expected) / expected).abs() > ASPECT_RATIO_TOLERANCE {
                return Err(format!(
                    "video aspect ratio {width}x{height} does not match {}",
                    constraints.aspect_ratio
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints() -> RenderConstraints {
        RenderConstraints {
            min_duration_seconds: 180.0,
            max_duration_seconds: 360.0,
            aspect_ratio: "16:9".into(),
        }
    }

    fn output(duration: f64, width: u32, height: u32) -> RenderOutput {
        RenderOutput {
            asset: AssetPayload::Bytes(vec![0, 1, 2]),
            duration_seconds: duration,
            width: Some(width),
            height: Some(height),
            seed: None,
            model: Some("HunyuanVideo".into()),
        }
    }

    #[test]
    fn accepts_output_within_bounds() {
        assert!(validate_render(RenderKind::Video, &output(240.0, 1280, 720), &constraints()).is_ok());
    }

    #[test]
    fn rejects_short_render_with_readable_reason() {
        let err = validate_render(RenderKind::Audio, &output(170.0, 1280, 720), &constraints())
            .unwrap_err();
        assert_eq!(err, "audio duration out of bounds: 170.0s outside 180.0s..360.0s");
    }

    #[test]
    fn rejects_wrong_aspect_ratio_for_video_only() {
        let square = output(200.0, 720, 720);
        assert!(validate_render(RenderKind::Video, &square, &constraints())
            .unwrap_err()
            .contains("aspect ratio"));
        assert!(validate_render(RenderKind::Audio, &square, &constraints()).is_ok());
    }

    #[test]
    fn rejects_empty_asset_and_nan_duration() {
        let mut empty = output(200.0, 1280, 720);
        empty.asset = AssetPayload::Bytes(Vec::new());
        assert!(validate_render(RenderKind::Video, &empty, &constraints()).is_err());
        assert!(validate_render(RenderKind::Video, &output(f64::NAN, 1280, 720), &constraints()).is_err());
    }
}
