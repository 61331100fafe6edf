use anyhow::Result;
use image::RgbImage;

use crate::detect::result::DetectionBatch;

/// Detector backend trait.
///
/// Implementations run one decoded frame through a model and return the
/// detections that match the requested class at or above the confidence
/// threshold, in the model's native output order. They must treat the frame
/// as read-only and must not retain it beyond the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier, used for registry lookup and logging.
    fn name(&self) -> &'static str;

    /// Run detection on a decoded RGB frame.
    ///
    /// `class_name` is guaranteed non-empty and `confidence_threshold` is in
    /// `[0, 1]` by the time a backend sees them; the service validates both.
    fn detect(
        &mut self,
        image: &RgbImage,
        class_name: &str,
        confidence_threshold: f32,
    ) -> Result<DetectionBatch>;

    /// Optional warm-up hook, called once before serving.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
