//! Detection orchestrator.
//!
//! One request moves through `Received -> Ingested -> Inferred -> Annotated
//! -> Persisted -> Completed`; a failure in any stage aborts the whole
//! request and no DetectionRecord is written. Artifacts written before the
//! failure stay on disk as cleanup-eligible orphans.

use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use crate::annotate::{self, LabelFont, PixelRect};
use crate::artifacts::{normalize_extension, ArtifactStore};
use crate::client::InferenceClient;
use crate::error::PipelineError;
use crate::storage::{DetectionRecord, NewDetectionRecord, RecordStore};
use crate::DEFAULT_CLASS_NAME;

/// One uploaded image, as received by the gateway.
#[derive(Clone, Debug)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub original_filename: String,
    pub content_type: String,
}

/// Per-request overrides for the inference call.
#[derive(Clone, Debug, Default)]
pub struct DetectOptions {
    pub class_name: Option<String>,
    pub confidence_threshold: Option<f32>,
}

pub struct DetectionPipeline {
    client: InferenceClient,
    artifacts: Arc<ArtifactStore>,
    store: Arc<Mutex<dyn RecordStore>>,
    font: LabelFont,
    confidence_threshold: f32,
}

impl DetectionPipeline {
    pub fn new(
        client: InferenceClient,
        artifacts: Arc<ArtifactStore>,
        store: Arc<Mutex<dyn RecordStore>>,
        font: LabelFont,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            client,
            artifacts,
            store,
            font,
            confidence_threshold,
        }
    }

    /// Run one upload through the full pipeline and commit its record.
    pub fn process(
        &self,
        upload: &ImageUpload,
        options: &DetectOptions,
    ) -> Result<DetectionRecord, PipelineError> {
        // Received: reject non-image payloads before any inference call.
        if !upload.content_type.starts_with("image/") {
            return Err(PipelineError::UnsupportedMediaType(
                upload.content_type.clone(),
            ));
        }
        if upload.bytes.is_empty() {
            return Err(PipelineError::UnsupportedMediaType("empty body".into()));
        }

        let request_id = crate::new_request_id();
        let ext = normalize_extension(&upload.original_filename);
        let digest = Sha256::digest(&upload.bytes);
        log::info!(
            "request {}: ingest '{}' ({} bytes, sha256={})",
            request_id,
            upload.original_filename,
            upload.bytes.len(),
            hex::encode(digest)
        );

        // Ingested: the original is on disk before any processing, so a
        // partial failure still leaves traceable input.
        self.artifacts
            .save_original(&request_id, ext, &upload.bytes)
            .map_err(|e| PipelineError::ArtifactWriteFailure(e.to_string()))?;

        // Inferred.
        let class_name = options
            .class_name
            .as_deref()
            .unwrap_or(DEFAULT_CLASS_NAME);
        let confidence_threshold = options
            .confidence_threshold
            .unwrap_or(self.confidence_threshold);
        let batch = self.client.infer(
            &upload.bytes,
            &upload.content_type,
            class_name,
            confidence_threshold,
        )?;
        log::info!(
            "request {}: {} detection(s) for class '{}' at conf >= {}",
            request_id,
            batch.len(),
            class_name,
            confidence_threshold
        );

        // The gateway decodes independently of the service's own decode.
        let decoded = image::load_from_memory(&upload.bytes)
            .map_err(|e| PipelineError::ImageReadFailure(e.to_string()))?
            .to_rgb8();
        let (width, height) = decoded.dimensions();

        // Validate every box before drawing anything; a single unusable box
        // aborts the request rather than corrupting people_count.
        let rects: Vec<PixelRect> = batch
            .iter()
            .enumerate()
            .map(|(index, detection)| annotate::clamp_box(detection, width, height, index))
            .collect::<Result<_, _>>()?;

        // Annotated: labels are 1-based on a shared working copy; crops come
        // from the pristine decode.
        let mut working = decoded.clone();
        for (index, rect) in rects.iter().enumerate() {
            let label = format!("Person {}", index + 1);
            annotate::draw_detection(&mut working, rect, &label, &self.font);
        }
        for (index, rect) in rects.iter().enumerate() {
            let crop = annotate::crop_region(&decoded, rect);
            self.artifacts
                .save_result_image(&format!("{request_id}_crop_{index}.{ext}"), &crop)
                .map_err(|e| PipelineError::ArtifactWriteFailure(e.to_string()))?;
        }
        let annotated_name = format!("{request_id}.{ext}");
        self.artifacts
            .save_result_image(&annotated_name, &working)
            .map_err(|e| PipelineError::ArtifactWriteFailure(e.to_string()))?;

        // Persisted: the record commits only after every artifact exists.
        let timestamp = crate::now_s()
            .map_err(|e| PipelineError::RecordWriteFailure(e.to_string()))?
            as i64;
        let new_record = NewDetectionRecord {
            timestamp,
            people_count: rects.len() as i64,
            result_image_url: format!("/images/{annotated_name}"),
            original_filename: upload.original_filename.clone(),
        };
        let record = {
            let mut store = self
                .store
                .lock()
                .map_err(|_| PipelineError::RecordWriteFailure("record store lock poisoned".into()))?;
            store
                .insert(&new_record)
                .map_err(|e| PipelineError::RecordWriteFailure(e.to_string()))?
        };

        log::info!(
            "request {}: completed, record id {} with {} person(s)",
            request_id,
            record.id,
            record.people_count
        );
        Ok(record)
    }
}
