//! Detection gateway HTTP surface.
//!
//! Routes:
//! - `GET  /`                      welcome envelope
//! - `GET  /health`                liveness probe
//! - `POST /api/v1/detect`         run the detection pipeline
//! - `GET  /images/{filename}`     fetch a stored artifact
//! - `GET  /api/v1/history`        paged history with filters
//! - `GET  /api/v1/history/count`  filtered count
//! - `GET  /api/v1/history/{id}`   one record

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, SecondsFormat};
use serde_json::json;

use crate::api::{spawn_server, ApiHandle, Handler, HttpRequest, HttpResponse};
use crate::artifacts::{ArtifactStore, ResolveError};
use crate::error::{InferenceError, PipelineError, QueryError};
use crate::pipeline::{DetectOptions, DetectionPipeline, ImageUpload};
use crate::storage::{DetectionRecord, PageRequest, RecordFilter, RecordStore};

pub struct GatewayServer {
    addr: String,
    pipeline: Arc<DetectionPipeline>,
    artifacts: Arc<ArtifactStore>,
    store: Arc<Mutex<dyn RecordStore>>,
}

impl GatewayServer {
    pub fn new(
        addr: &str,
        pipeline: Arc<DetectionPipeline>,
        artifacts: Arc<ArtifactStore>,
        store: Arc<Mutex<dyn RecordStore>>,
    ) -> Self {
        Self {
            addr: addr.to_string(),
            pipeline,
            artifacts,
            store,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let pipeline = self.pipeline;
        let artifacts = self.artifacts;
        let store = self.store;
        let handler: Handler =
            Arc::new(move |request| route(request, &pipeline, &artifacts, &store));
        spawn_server("gateway api", &self.addr, handler)
    }
}

fn route(
    request: &HttpRequest,
    pipeline: &DetectionPipeline,
    artifacts: &ArtifactStore,
    store: &Arc<Mutex<dyn RecordStore>>,
) -> HttpResponse {
    let method = request.method.as_str();
    let path = request.path.as_str();

    if let Some(reference) = path.strip_prefix("/images/") {
        return match method {
            "GET" => handle_image(artifacts, reference),
            _ => HttpResponse::error(405, "Method not allowed"),
        };
    }

    match path {
        "/" => match method {
            "GET" => HttpResponse::success(
                "Welcome to the person detection gateway",
                serde_json::Value::Null,
            ),
            _ => HttpResponse::error(405, "Method not allowed"),
        },
        "/health" => match method {
            "GET" => HttpResponse::json(200, json!({"status": "ok"})),
            _ => HttpResponse::error(405, "Method not allowed"),
        },
        "/api/v1/detect" | "/api/v1/detect/" => match method {
            "POST" => handle_detect(request, pipeline),
            _ => HttpResponse::error(405, "Method not allowed"),
        },
        "/api/v1/history" | "/api/v1/history/" => match method {
            "GET" => handle_history(request, store),
            _ => HttpResponse::error(405, "Method not allowed"),
        },
        "/api/v1/history/count" => match method {
            "GET" => handle_count(request, store),
            _ => HttpResponse::error(405, "Method not allowed"),
        },
        _ => match path.strip_prefix("/api/v1/history/") {
            Some(id) if method == "GET" => handle_get_record(id, store),
            Some(_) => HttpResponse::error(405, "Method not allowed"),
            None => HttpResponse::error(404, "Not found"),
        },
    }
}

fn handle_detect(request: &HttpRequest, pipeline: &DetectionPipeline) -> HttpResponse {
    let mut options = DetectOptions::default();
    if let Some(class_name) = request.query_param("class_name") {
        if class_name.trim().is_empty() {
            return HttpResponse::error(400, "class_name must not be empty");
        }
        options.class_name = Some(class_name);
    }
    if let Some(conf) = request.query_param("conf") {
        let conf: f32 = match conf.parse() {
            Ok(conf) => conf,
            Err(_) => return HttpResponse::error(400, "conf must be a float"),
        };
        if !(0.0..=1.0).contains(&conf) {
            return HttpResponse::error(400, "conf must be within [0, 1]");
        }
        options.confidence_threshold = Some(conf);
    }

    let upload = ImageUpload {
        bytes: request.body.clone(),
        original_filename: request
            .header("x-original-filename")
            .unwrap_or("upload")
            .to_string(),
        content_type: request.content_type().to_string(),
    };

    match pipeline.process(&upload, &options) {
        Ok(record) => HttpResponse::json(200, record_payload(&record)),
        Err(err) => HttpResponse::error(pipeline_status(&err), &err.to_string()),
    }
}

/// HTTP status for each pipeline failure: bad input (4xx), backend
/// unavailable (503), backend malfunction (502), internal error (500).
fn pipeline_status(err: &PipelineError) -> u16 {
    match err {
        PipelineError::UnsupportedMediaType(_) => 415,
        PipelineError::Detection(inference) => match inference {
            InferenceError::InvalidRequest(_)
            | InferenceError::InvalidImage(_)
            | InferenceError::DecodeFailure(_) => 400,
            InferenceError::ServiceUnavailable(_) => 503,
            InferenceError::InferenceFailure(_) | InferenceError::MalformedResponse(_) => 502,
        },
        PipelineError::BoxOutOfBounds { .. } => 502,
        PipelineError::ImageReadFailure(_)
        | PipelineError::ArtifactWriteFailure(_)
        | PipelineError::RecordWriteFailure(_) => 500,
    }
}

fn handle_image(artifacts: &ArtifactStore, reference: &str) -> HttpResponse {
    match artifacts.resolve(reference) {
        Ok((bytes, content_type)) => HttpResponse::bytes(content_type, bytes),
        Err(err @ ResolveError::InvalidReference(_)) => HttpResponse::error(400, &err.to_string()),
        Err(err @ ResolveError::NotFound(_)) => HttpResponse::error(404, &err.to_string()),
        Err(ResolveError::Io(reference, err)) => {
            log::error!("artifact read failed for '{reference}': {err}");
            HttpResponse::error(500, "failed to read artifact")
        }
    }
}

fn handle_history(request: &HttpRequest, store: &Arc<Mutex<dyn RecordStore>>) -> HttpResponse {
    let (filter, page) = match parse_history_params(request) {
        Ok(parsed) => parsed,
        Err(err) => return HttpResponse::error(400, &err.to_string()),
    };
    let guard = match store.lock() {
        Ok(guard) => guard,
        Err(_) => return HttpResponse::error(500, "record store lock poisoned"),
    };
    match guard.query(&filter, &page) {
        Ok((records, total)) => {
            let items: Vec<serde_json::Value> = records.iter().map(record_payload).collect();
            HttpResponse::success(
                "History fetched successfully",
                json!({"items": items, "total": total}),
            )
        }
        Err(err) => {
            log::error!("history query failed: {err}");
            HttpResponse::error(500, "history query failed")
        }
    }
}

fn handle_count(request: &HttpRequest, store: &Arc<Mutex<dyn RecordStore>>) -> HttpResponse {
    let (filter, _page) = match parse_history_params(request) {
        Ok(parsed) => parsed,
        Err(err) => return HttpResponse::error(400, &err.to_string()),
    };
    let guard = match store.lock() {
        Ok(guard) => guard,
        Err(_) => return HttpResponse::error(500, "record store lock poisoned"),
    };
    match guard.count(&filter) {
        Ok(count) => HttpResponse::json(200, json!({"count": count})),
        Err(err) => {
            log::error!("history count failed: {err}");
            HttpResponse::error(500, "history count failed")
        }
    }
}

fn handle_get_record(id: &str, store: &Arc<Mutex<dyn RecordStore>>) -> HttpResponse {
    let id: i64 = match id.parse() {
        Ok(id) => id,
        Err(_) => return HttpResponse::error(400, "record id must be an integer"),
    };
    let guard = match store.lock() {
        Ok(guard) => guard,
        Err(_) => return HttpResponse::error(500, "record store lock poisoned"),
    };
    match guard.get_by_id(id) {
        Ok(Some(record)) => HttpResponse::json(200, record_payload(&record)),
        Ok(None) => HttpResponse::error(404, "Record not found"),
        Err(err) => {
            log::error!("record lookup failed: {err}");
            HttpResponse::error(500, "record lookup failed")
        }
    }
}

fn parse_history_params(request: &HttpRequest) -> Result<(RecordFilter, PageRequest), QueryError> {
    let mut filter = RecordFilter::default();

    if let Some(min_people) = request.query_param("min_people") {
        filter.min_people = Some(parse_non_negative(&min_people, "min_people")?);
    }
    if let Some(max_people) = request.query_param("max_people") {
        filter.max_people = Some(parse_non_negative(&max_people, "max_people")?);
    }
    if let Some(date_from) = request.query_param("date_from") {
        filter.date_from = Some(parse_date_bound(&date_from, false)?);
    }
    if let Some(date_to) = request.query_param("date_to") {
        filter.date_to = Some(parse_date_bound(&date_to, true)?);
    }

    let skip = match request.query_param("skip") {
        Some(skip) => skip
            .parse()
            .map_err(|_| QueryError::InvalidParameter(format!("skip '{skip}' is not an integer")))?,
        None => 0,
    };
    let limit = match request.query_param("limit") {
        Some(limit) => limit.parse().map_err(|_| {
            QueryError::InvalidParameter(format!("limit '{limit}' is not an integer"))
        })?,
        None => PageRequest::default().limit(),
    };
    let page = PageRequest::new(skip, limit)?;

    Ok((filter, page))
}

fn parse_non_negative(value: &str, name: &str) -> Result<i64, QueryError> {
    let parsed: i64 = value
        .parse()
        .map_err(|_| QueryError::InvalidParameter(format!("{name} '{value}' is not an integer")))?;
    if parsed < 0 {
        return Err(QueryError::InvalidParameter(format!(
            "{name} must be >= 0, got {parsed}"
        )));
    }
    Ok(parsed)
}

/// Parse an inclusive date bound: RFC 3339, or a bare date expanded to the
/// start (from) or end (to) of that UTC day.
fn parse_date_bound(value: &str, end_of_day: bool) -> Result<i64, QueryError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let (h, m, s) = if end_of_day { (23, 59, 59) } else { (0, 0, 0) };
        let instant = date.and_hms_opt(h, m, s).expect("valid wall time");
        return Ok(instant.and_utc().timestamp());
    }
    Err(QueryError::InvalidParameter(format!(
        "date '{value}' is neither RFC 3339 nor YYYY-MM-DD"
    )))
}

fn record_payload(record: &DetectionRecord) -> serde_json::Value {
    let timestamp = DateTime::from_timestamp(record.timestamp, 0)
        .map(|instant| instant.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();
    json!({
        "id": record.id,
        "timestamp": timestamp,
        "people_count": record.people_count,
        "result_image_url": record.result_image_url,
        "original_filename": record.original_filename,
    })
}
