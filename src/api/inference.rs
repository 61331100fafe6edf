//! Inference service HTTP surface.
//!
//! One route does the work: `POST /api/v1/detect` with a raw image body and
//! `class_name` + `conf` query parameters, answered with the typed envelope
//! `{status, message, data: {detections}}`. Zero detections is a success
//! with an empty list, never `data: null`.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::api::{spawn_server, ApiHandle, Handler, HttpRequest, HttpResponse};
use crate::detect::BackendRegistry;

const MAX_CLASS_NAME_LEN: usize = 50;
const DEFAULT_CONFIDENCE: f32 = 0.5;

pub struct InferenceServer {
    addr: String,
    registry: Arc<BackendRegistry>,
}

impl InferenceServer {
    pub fn new(addr: &str, registry: Arc<BackendRegistry>) -> Self {
        Self {
            addr: addr.to_string(),
            registry,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let registry = self.registry;
        let handler: Handler = Arc::new(move |request| route(request, &registry));
        spawn_server("inference api", &self.addr, handler)
    }
}

fn route(request: &HttpRequest, registry: &BackendRegistry) -> HttpResponse {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => HttpResponse::json(200, json!({"status": "ok"})),
        ("POST", "/api/v1/detect") | ("POST", "/api/v1/detect/") => {
            handle_detect(request, registry)
        }
        ("GET", "/api/v1/detect") | ("GET", "/api/v1/detect/") => {
            HttpResponse::error(405, "Method not allowed")
        }
        _ => HttpResponse::error(404, "Not found"),
    }
}

fn handle_detect(request: &HttpRequest, registry: &BackendRegistry) -> HttpResponse {
    let class_name = request
        .query_param("class_name")
        .unwrap_or_else(|| crate::DEFAULT_CLASS_NAME.to_string());
    if class_name.trim().is_empty() || class_name.len() > MAX_CLASS_NAME_LEN {
        return HttpResponse::error(400, "class_name must be 1-50 characters");
    }

    let confidence_threshold = match request.query_param("conf") {
        Some(conf) => match conf.parse::<f32>() {
            Ok(conf) if (0.0..=1.0).contains(&conf) => conf,
            _ => return HttpResponse::error(400, "conf must be a float within [0, 1]"),
        },
        None => DEFAULT_CONFIDENCE,
    };

    if request.body.is_empty() {
        return HttpResponse::error(400, "Uploaded file is not a valid image");
    }

    let image = match image::load_from_memory(&request.body) {
        Ok(image) => image.to_rgb8(),
        Err(err) => {
            log::warn!("image decode failed: {err}");
            return HttpResponse::error(400, "Could not decode image file");
        }
    };

    match registry.detect(&image, &class_name, confidence_threshold) {
        Ok(detections) => {
            log::info!(
                "detection completed: {} '{}' box(es) at conf >= {}",
                detections.len(),
                class_name,
                confidence_threshold
            );
            let message = if detections.is_empty() {
                "No objects detected"
            } else {
                "Detection completed successfully"
            };
            HttpResponse::success(message, json!({ "detections": detections }))
        }
        Err(err) => {
            log::error!("model inference failed: {err}");
            HttpResponse::error(500, "Model inference failed")
        }
    }
}
