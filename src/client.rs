//! Inference service adapter.
//!
//! The gateway's only link to the inference service is this HTTP client:
//! it POSTs the raw image body with `class_name` + `conf` parameters,
//! enforces a bounded timeout, and parses the typed response envelope
//! strictly. Every failure mode maps to a distinct [`InferenceError`] so
//! the orchestrator can surface distinct response codes.

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use url::Url;

use crate::detect::{BoundingBox, DetectionBatch};
use crate::error::InferenceError;

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    status: String,
    message: String,
    data: Option<WireData>,
}

#[derive(Debug, Deserialize)]
struct WireData {
    detections: Option<Vec<BoundingBox>>,
}

#[derive(Clone)]
pub struct InferenceClient {
    agent: ureq::Agent,
    endpoint: String,
}

impl InferenceClient {
    /// Build a client for the configured endpoint with a bounded timeout.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(endpoint).map_err(|e| anyhow!("invalid detect url: {e}"))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(anyhow!(
                "unsupported detect url scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            endpoint: endpoint.to_string(),
        })
    }

    /// Ask the inference service for detections.
    ///
    /// An empty batch is success; every failure is one of the typed kinds.
    pub fn infer(
        &self,
        image_bytes: &[u8],
        content_type: &str,
        class_name: &str,
        confidence_threshold: f32,
    ) -> Result<DetectionBatch, InferenceError> {
        if image_bytes.is_empty() {
            return Err(InferenceError::InvalidRequest("empty image body".into()));
        }
        if class_name.is_empty() {
            return Err(InferenceError::InvalidRequest("empty class name".into()));
        }
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(InferenceError::InvalidRequest(format!(
                "confidence threshold {confidence_threshold} outside [0, 1]"
            )));
        }

        let response = self
            .agent
            .post(&self.endpoint)
            .query("class_name", class_name)
            .query("conf", &format!("{confidence_threshold}"))
            .set("Content-Type", content_type)
            .send_bytes(image_bytes);

        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let message = response
                    .into_string()
                    .ok()
                    .and_then(|body| extract_error_message(&body))
                    .unwrap_or_else(|| format!("inference service returned status {code}"));
                return Err(match code {
                    400 => InferenceError::InvalidImage(message),
                    415 => InferenceError::DecodeFailure(message),
                    503 => InferenceError::ServiceUnavailable(message),
                    _ => InferenceError::InferenceFailure(message),
                });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(InferenceError::ServiceUnavailable(transport.to_string()));
            }
        };

        let body = response
            .into_string()
            .map_err(|e| InferenceError::MalformedResponse(format!("unreadable body: {e}")))?;
        parse_envelope(&body)
    }
}

/// Parse the inference response envelope, strictly.
///
/// `status` must be `"success"` and `data.detections` must be present (an
/// empty list is fine); anything else is a format error, never coerced.
fn parse_envelope(body: &str) -> Result<DetectionBatch, InferenceError> {
    let envelope: WireEnvelope = serde_json::from_str(body)
        .map_err(|e| InferenceError::MalformedResponse(format!("invalid envelope json: {e}")))?;
    if envelope.status != "success" {
        return Err(InferenceError::MalformedResponse(format!(
            "unexpected envelope status '{}': {}",
            envelope.status, envelope.message
        )));
    }
    envelope
        .data
        .and_then(|data| data.detections)
        .ok_or_else(|| {
            InferenceError::MalformedResponse("envelope missing data.detections".into())
        })
}

fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(|message| message.as_str())
        .map(|message| message.to_string())
}
