//! spotterd - detection gateway daemon
//!
//! This daemon:
//! 1. Opens the record database and the artifact store
//! 2. Wires the detection pipeline to the configured inference service
//! 3. Serves the detect, artifact, and history endpoints
//! 4. Runs until interrupted, letting in-flight requests finish

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use spotter::api::GatewayServer;
use spotter::config::GatewayConfig;
use spotter::{ArtifactStore, DetectionPipeline, InferenceClient, LabelFont, SqliteRecordStore};

#[derive(Parser, Debug)]
#[command(name = "spotterd", about = "Person detection gateway")]
struct Args {
    /// Path to a JSON config file (also read from SPOTTER_CONFIG)
    #[arg(long, env = "SPOTTER_CONFIG")]
    config: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("SPOTTER_CONFIG", path);
    }
    let cfg = GatewayConfig::load()?;

    let store = Arc::new(Mutex::new(SqliteRecordStore::open(&cfg.db_path)?));
    let artifacts = Arc::new(ArtifactStore::open(&cfg.uploads_dir, &cfg.results_dir)?);
    let client = InferenceClient::new(&cfg.detect_url, cfg.infer_timeout)?;
    let font = LabelFont::load(cfg.label_font_path.as_ref());
    let pipeline = Arc::new(DetectionPipeline::new(
        client,
        artifacts.clone(),
        store.clone(),
        font,
        cfg.confidence_threshold,
    ));

    let server = GatewayServer::new(&cfg.api_addr, pipeline, artifacts, store);
    let handle = server.spawn()?;
    log::info!("gateway api listening on {}", handle.addr);
    log::info!(
        "records in {}, inference via {} (threshold {})",
        cfg.db_path,
        cfg.detect_url,
        cfg.confidence_threshold
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down");
    handle.stop()?;
    Ok(())
}
