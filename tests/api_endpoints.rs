use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use spotter::api::{ApiHandle, GatewayServer, InferenceServer};
use spotter::{
    ArtifactStore, BackendRegistry, BoundingBox, DetectionPipeline, InferenceClient,
    LabelFont, SqliteRecordStore, StubBackend,
};

struct Stack {
    _dir: tempfile::TempDir,
    inference: ApiHandle,
    gateway: ApiHandle,
    base: String,
}

impl Stack {
    fn start(fixtures: Vec<BoundingBox>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");

        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::with_boxes(fixtures));
        let inference = InferenceServer::new("127.0.0.1:0", Arc::new(registry))
            .spawn()
            .expect("spawn inference server");

        let db_path = dir.path().join("records.db");
        let store = Arc::new(Mutex::new(
            SqliteRecordStore::open(db_path.to_str().unwrap()).unwrap(),
        ));
        let artifacts = Arc::new(
            ArtifactStore::open(dir.path().join("uploads"), dir.path().join("results")).unwrap(),
        );
        let client = InferenceClient::new(
            &format!("http://{}/api/v1/detect", inference.addr),
            Duration::from_secs(5),
        )
        .unwrap();
        let pipeline = Arc::new(DetectionPipeline::new(
            client,
            artifacts.clone(),
            store.clone(),
            LabelFont::load(None),
            0.5,
        ));
        let gateway = GatewayServer::new("127.0.0.1:0", pipeline, artifacts, store)
            .spawn()
            .expect("spawn gateway");
        let base = format!("http://{}", gateway.addr);

        Self {
            _dir: dir,
            inference,
            gateway,
            base,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn stop(self) {
        self.gateway.stop().unwrap();
        self.inference.stop().unwrap();
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, 90])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn post_image(stack: &Stack, bytes: &[u8], filename: &str) -> serde_json::Value {
    let response = ureq::post(&stack.url("/api/v1/detect"))
        .set("Content-Type", "image/png")
        .set("X-Original-Filename", filename)
        .send_bytes(bytes)
        .expect("detect request");
    response.into_json().expect("json body")
}

fn error_response(result: Result<ureq::Response, ureq::Error>) -> (u16, serde_json::Value) {
    match result {
        Err(ureq::Error::Status(code, response)) => {
            let body: serde_json::Value = response.into_json().expect("error body json");
            (code, body)
        }
        Ok(response) => panic!("expected error status, got {}", response.status()),
        Err(other) => panic!("transport failure: {other}"),
    }
}

#[test]
fn detect_round_trip_returns_record_and_fetchable_artifact() {
    let stack = Stack::start(vec![BoundingBox::new(100, 100, 200, 300, 0.9)]);
    let body = post_image(&stack, &png_bytes(640, 480), "street.png");

    assert_eq!(body["people_count"], 1);
    assert_eq!(body["original_filename"], "street.png");
    assert_eq!(body["id"], 1);
    let timestamp = body["timestamp"].as_str().expect("timestamp string");
    assert!(timestamp.ends_with('Z'));
    let image_url = body["result_image_url"].as_str().unwrap().to_string();
    assert!(image_url.starts_with("/images/"));

    // the stored reference resolves to the annotated artifact
    let response = ureq::get(&stack.url(&image_url)).call().expect("fetch artifact");
    assert_eq!(response.header("Content-Type"), Some("image/png"));
    let mut bytes = Vec::new();
    response.into_reader().read_to_end(&mut bytes).unwrap();
    let annotated = image::load_from_memory(&bytes).unwrap().to_rgb8();
    assert_eq!(annotated.dimensions(), (640, 480));

    // crop artifact is addressable by (record identity, detection index)
    let crop_url = image_url.replace(".png", "_crop_0.png");
    let response = ureq::get(&stack.url(&crop_url)).call().expect("fetch crop");
    let mut bytes = Vec::new();
    response.into_reader().read_to_end(&mut bytes).unwrap();
    let crop = image::load_from_memory(&bytes).unwrap().to_rgb8();
    assert_eq!(crop.dimensions(), (100, 200));

    stack.stop();
}

#[test]
fn non_image_upload_is_rejected_with_415_envelope() {
    let stack = Stack::start(vec![]);
    let result = ureq::post(&stack.url("/api/v1/detect"))
        .set("Content-Type", "text/plain")
        .send_bytes(b"hello");
    let (code, body) = error_response(result);
    assert_eq!(code, 415);
    assert_eq!(body["status"], "error");
    assert_eq!(body["data"], serde_json::Value::Null);
    stack.stop();
}

#[test]
fn invalid_conf_parameter_is_rejected() {
    let stack = Stack::start(vec![]);
    let result = ureq::post(&stack.url("/api/v1/detect?conf=1.7"))
        .set("Content-Type", "image/png")
        .send_bytes(&png_bytes(32, 32));
    let (code, body) = error_response(result);
    assert_eq!(code, 400);
    assert_eq!(body["status"], "error");
    stack.stop();
}

#[test]
fn history_endpoints_page_filter_and_count() {
    let stack = Stack::start(vec![BoundingBox::new(10, 10, 60, 60, 0.9)]);
    for i in 0..3 {
        post_image(&stack, &png_bytes(320, 240), &format!("img_{i}.png"));
    }

    let body: serde_json::Value = ureq::get(&stack.url("/api/v1/history"))
        .call()
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 3);

    let body: serde_json::Value = ureq::get(&stack.url("/api/v1/history?skip=2&limit=2"))
        .call()
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);

    let body: serde_json::Value = ureq::get(&stack.url("/api/v1/history?min_people=1&max_people=1"))
        .call()
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(body["data"]["total"], 3);

    let body: serde_json::Value = ureq::get(&stack.url("/api/v1/history/count?min_people=2"))
        .call()
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(body["count"], 0);

    let body: serde_json::Value = ureq::get(&stack.url("/api/v1/history/1"))
        .call()
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(body["id"], 1);
    assert_eq!(body["people_count"], 1);

    stack.stop();
}

#[test]
fn history_validation_and_missing_record_errors() {
    let stack = Stack::start(vec![]);

    let (code, _) = error_response(ureq::get(&stack.url("/api/v1/history?limit=0")).call());
    assert_eq!(code, 400);
    let (code, _) = error_response(ureq::get(&stack.url("/api/v1/history?limit=101")).call());
    assert_eq!(code, 400);
    let (code, _) = error_response(ureq::get(&stack.url("/api/v1/history?min_people=-1")).call());
    assert_eq!(code, 400);
    let (code, _) =
        error_response(ureq::get(&stack.url("/api/v1/history?date_from=notadate")).call());
    assert_eq!(code, 400);

    let (code, body) = error_response(ureq::get(&stack.url("/api/v1/history/999")).call());
    assert_eq!(code, 404);
    assert_eq!(body["message"], "Record not found");

    stack.stop();
}

#[test]
fn history_date_filters_accept_bare_dates() {
    let stack = Stack::start(vec![]);
    post_image(&stack, &png_bytes(64, 64), "today.png");

    // everything happened today, so a window over today matches everything
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let url = format!("/api/v1/history/count?date_from={today}&date_to={today}");
    let body: serde_json::Value = ureq::get(&stack.url(&url)).call().unwrap().into_json().unwrap();
    assert_eq!(body["count"], 1);

    let url = "/api/v1/history/count?date_from=2099-01-01";
    let body: serde_json::Value = ureq::get(&stack.url(url)).call().unwrap().into_json().unwrap();
    assert_eq!(body["count"], 0);

    stack.stop();
}

#[test]
fn artifact_references_are_validated_as_bare_filenames() {
    let stack = Stack::start(vec![]);

    let (code, _) = error_response(
        ureq::get(&stack.url("/images/..%2F..%2Fetc%2Fpasswd")).call(),
    );
    assert_eq!(code, 400);

    let missing = format!("/images/{}.jpg", spotter::new_request_id());
    let (code, _) = error_response(ureq::get(&stack.url(&missing)).call());
    assert_eq!(code, 404);

    stack.stop();
}

#[test]
fn root_and_health_endpoints_answer() {
    let stack = Stack::start(vec![]);

    let body: serde_json::Value = ureq::get(&stack.url("/"))
        .call()
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(body["status"], "success");

    let body: serde_json::Value = ureq::get(&stack.url("/health"))
        .call()
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(body["status"], "ok");

    let (code, _) = error_response(ureq::get(&stack.url("/api/v2/unknown")).call());
    assert_eq!(code, 404);
    let (code, _) = error_response(ureq::get(&stack.url("/api/v1/detect")).call());
    assert_eq!(code, 405);

    stack.stop();
}

#[test]
fn inference_service_contract_is_the_typed_envelope() {
    let stack = Stack::start(vec![BoundingBox::new(5, 5, 25, 45, 0.8)]);
    let url = format!("http://{}/api/v1/detect?class_name=person&conf=0.5", stack.inference.addr);

    let body: serde_json::Value = ureq::post(&url)
        .set("Content-Type", "image/png")
        .send_bytes(&png_bytes(64, 64))
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(body["status"], "success");
    let detections = body["data"]["detections"].as_array().unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0]["x_min"], 5);
    assert_eq!(detections[0]["class_name"], "person");

    // zero detections is success with an empty list, not data:null
    let url = format!("http://{}/api/v1/detect?conf=0.99", stack.inference.addr);
    let body: serde_json::Value = ureq::post(&url)
        .set("Content-Type", "image/png")
        .send_bytes(&png_bytes(64, 64))
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["detections"].as_array().unwrap().len(), 0);

    // garbage bytes are a 400, not a crash
    let result = ureq::post(&format!("http://{}/api/v1/detect", stack.inference.addr))
        .set("Content-Type", "image/png")
        .send_bytes(b"definitely not an image");
    let (code, body) = error_response(result);
    assert_eq!(code, 400);
    assert_eq!(body["status"], "error");

    stack.stop();
}
