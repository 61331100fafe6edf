//! Spotter - person detection pipeline.
//!
//! Two cooperating services share this crate:
//!
//! - `spotterd`, the detection gateway: accepts an uploaded image, persists
//!   the original, asks the inference service for person bounding boxes,
//!   draws annotations, extracts per-box crops, and commits a
//!   [`DetectionRecord`] that the history endpoints page through.
//! - `inferd`, the inference service: wraps a [`DetectorBackend`] behind a
//!   small HTTP contract (`POST /api/v1/detect` with `class_name` + `conf`).
//!
//! The boundary between the two is an explicit HTTP call with a typed
//! envelope; the gateway never links the model in-process.
//!
//! # Module Structure
//!
//! - `detect`: bounding-box types, backend trait, registry, backends
//! - `client`: inference service adapter used by the gateway
//! - `pipeline`: the orchestrator (validate, ingest, infer, annotate, commit)
//! - `annotate`: box clamping, rectangle/label drawing, cropping
//! - `artifacts`: filesystem artifact store and resolver
//! - `storage`: detection record store (SQLite + in-memory) and history queries
//! - `api`: HTTP plumbing plus the gateway and inference servers

use anyhow::Result;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod annotate;
pub mod api;
pub mod artifacts;
pub mod client;
pub mod config;
pub mod detect;
pub mod error;
pub mod pipeline;
pub mod storage;

pub use annotate::{LabelFont, PixelRect};
pub use artifacts::ArtifactStore;
pub use client::InferenceClient;
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use detect::{BackendRegistry, BoundingBox, DetectionBatch, DetectorBackend, StubBackend};
pub use error::{InferenceError, PipelineError, QueryError};
pub use pipeline::{DetectOptions, DetectionPipeline, ImageUpload};
pub use storage::{
    DetectionRecord, InMemoryRecordStore, NewDetectionRecord, PageRequest, RecordFilter,
    RecordStore, SqliteRecordStore,
};

/// Hard cap on accepted upload bodies.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Default target class for the gateway pipeline.
pub const DEFAULT_CLASS_NAME: &str = "person";

/// Current wall clock in whole seconds since the Unix epoch.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Generate a 128-bit random request identifier, hex encoded.
///
/// Identifiers key every artifact a request produces; two requests must
/// never share one, so this stays at full RNG width.
pub fn new_request_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
