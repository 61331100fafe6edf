//! inferd - inference service daemon
//!
//! Wraps a detector backend behind the detection HTTP contract. The backend
//! is chosen by configuration: the fixture-driven stub for bring-up and
//! tests, or the tract ONNX backend when built with `backend-tract`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use spotter::api::InferenceServer;
use spotter::config::InferenceConfig;
use spotter::{BackendRegistry, StubBackend};

#[derive(Parser, Debug)]
#[command(name = "inferd", about = "Person detection inference service")]
struct Args {
    /// Path to a JSON config file (also read from INFERD_CONFIG)
    #[arg(long, env = "INFERD_CONFIG")]
    config: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("INFERD_CONFIG", path);
    }
    let cfg = InferenceConfig::load()?;

    let mut registry = BackendRegistry::new();
    let stub = match &cfg.stub_fixtures_path {
        Some(path) => StubBackend::from_json_file(path)?,
        None => StubBackend::new(),
    };
    registry.register(stub);

    #[cfg(feature = "backend-tract")]
    if let Some(model_path) = &cfg.model_path {
        let backend = spotter::TractBackend::new(
            model_path,
            cfg.model_input_width,
            cfg.model_input_height,
        )?;
        registry.register(backend);
    }

    registry.set_default(&cfg.backend)?;
    registry.warm_up()?;
    log::info!(
        "backends registered: {:?}, default '{}'",
        registry.list(),
        cfg.backend
    );

    let server = InferenceServer::new(&cfg.api_addr, Arc::new(registry));
    let handle = server.spawn()?;
    log::info!("inference api listening on {}", handle.addr);

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
