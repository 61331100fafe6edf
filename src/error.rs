//! Typed error kinds for the detection pipeline.
//!
//! Every stage failure is a distinct variant so callers can map each one to
//! a distinct response code. Daemons and backends keep `anyhow` for their
//! own plumbing; these enums are the contract surface.

use thiserror::Error;

/// Failures of the inference service adapter.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Request parameters were rejected before any network call.
    #[error("invalid inference request: {0}")]
    InvalidRequest(String),

    /// The service judged the payload to not be an image at all.
    #[error("uploaded payload is not a valid image: {0}")]
    InvalidImage(String),

    /// The service received the payload but could not decode it.
    #[error("inference service failed to decode image: {0}")]
    DecodeFailure(String),

    /// The model raised during prediction.
    #[error("model inference failed: {0}")]
    InferenceFailure(String),

    /// The service was unreachable or did not answer within the timeout.
    #[error("inference service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The service answered but the response violated the expected shape.
    #[error("malformed inference response: {0}")]
    MalformedResponse(String),
}

/// Failures of the detection gateway pipeline.
///
/// All of these abort the whole request: no DetectionRecord is ever written
/// for a request that failed at any stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported media type '{0}': expected an image upload")]
    UnsupportedMediaType(String),

    #[error(transparent)]
    Detection(#[from] InferenceError),

    /// The gateway's own decode of the original failed. Distinct from
    /// [`InferenceError::DecodeFailure`], which is the service's decode.
    #[error("failed to read uploaded image: {0}")]
    ImageReadFailure(String),

    /// A detection's coordinates are unusable against the decoded image.
    #[error("detection {index} has unusable coordinates: {detail}")]
    BoxOutOfBounds { index: usize, detail: String },

    #[error("failed to write artifact: {0}")]
    ArtifactWriteFailure(String),

    #[error("failed to persist detection record: {0}")]
    RecordWriteFailure(String),
}

/// Failures of the history query surface.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query parameter: {0}")]
    InvalidParameter(String),
}
