use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "spotter.db";
const DEFAULT_GATEWAY_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_UPLOADS_DIR: &str = "uploads";
const DEFAULT_RESULTS_DIR: &str = "results";
const DEFAULT_DETECT_URL: &str = "http://127.0.0.1:6868/api/v1/detect";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_INFER_TIMEOUT_SECS: u64 = 30;

const DEFAULT_INFERD_ADDR: &str = "127.0.0.1:6868";
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_MODEL_INPUT: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct GatewayConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    inference: Option<InferenceClientConfigFile>,
    storage: Option<StorageConfigFile>,
    label_font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceClientConfigFile {
    url: Option<String>,
    confidence_threshold: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    uploads_dir: Option<PathBuf>,
    results_dir: Option<PathBuf>,
}

/// Configuration for the detection gateway daemon (`spotterd`).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub db_path: String,
    pub api_addr: String,
    pub detect_url: String,
    pub confidence_threshold: f32,
    pub infer_timeout: Duration,
    pub uploads_dir: PathBuf,
    pub results_dir: PathBuf,
    pub label_font_path: Option<PathBuf>,
}

impl GatewayConfig {
    /// Load from the `SPOTTER_CONFIG` JSON file (when set) with env-var
    /// overrides applied on top.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SPOTTER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file::<GatewayConfigFile>(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GatewayConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let api_addr = file
            .api
            .as_ref()
            .and_then(|api| api.addr.clone())
            .unwrap_or_else(|| DEFAULT_GATEWAY_ADDR.to_string());
        let detect_url = file
            .inference
            .as_ref()
            .and_then(|inference| inference.url.clone())
            .unwrap_or_else(|| DEFAULT_DETECT_URL.to_string());
        let confidence_threshold = file
            .inference
            .as_ref()
            .and_then(|inference| inference.confidence_threshold)
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
        let infer_timeout = Duration::from_secs(
            file.inference
                .as_ref()
                .and_then(|inference| inference.timeout_secs)
                .unwrap_or(DEFAULT_INFER_TIMEOUT_SECS),
        );
        let uploads_dir = file
            .storage
            .as_ref()
            .and_then(|storage| storage.uploads_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOADS_DIR));
        let results_dir = file
            .storage
            .as_ref()
            .and_then(|storage| storage.results_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_DIR));
        Self {
            db_path,
            api_addr,
            detect_url,
            confidence_threshold,
            infer_timeout,
            uploads_dir,
            results_dir,
            label_font_path: file.label_font_path,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(db_path) = std::env::var("SPOTTER_DB_PATH") {
            if !db_path.trim().is_empty() {
                self.db_path = db_path;
            }
        }
        if let Ok(addr) = std::env::var("SPOTTER_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(url) = std::env::var("SPOTTER_DETECT_URL") {
            if !url.trim().is_empty() {
                self.detect_url = url;
            }
        }
        if let Ok(threshold) = std::env::var("SPOTTER_CONF_THRESHOLD") {
            let threshold: f32 = threshold
                .parse()
                .map_err(|_| anyhow!("SPOTTER_CONF_THRESHOLD must be a float"))?;
            self.confidence_threshold = threshold;
        }
        if let Ok(timeout) = std::env::var("SPOTTER_INFER_TIMEOUT_SECS") {
            let seconds: u64 = timeout
                .parse()
                .map_err(|_| anyhow!("SPOTTER_INFER_TIMEOUT_SECS must be an integer number of seconds"))?;
            self.infer_timeout = Duration::from_secs(seconds);
        }
        if let Ok(dir) = std::env::var("SPOTTER_UPLOADS_DIR") {
            if !dir.trim().is_empty() {
                self.uploads_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("SPOTTER_RESULTS_DIR") {
            if !dir.trim().is_empty() {
                self.results_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("SPOTTER_LABEL_FONT") {
            if !path.trim().is_empty() {
                self.label_font_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold {} outside [0, 1]",
                self.confidence_threshold
            ));
        }
        if self.infer_timeout.as_secs() == 0 {
            return Err(anyhow!("inference timeout must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    api: Option<ApiConfigFile>,
    backend: Option<String>,
    model_path: Option<PathBuf>,
    model_input_width: Option<u32>,
    model_input_height: Option<u32>,
    stub_fixtures_path: Option<PathBuf>,
}

/// Configuration for the inference service daemon (`inferd`).
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub api_addr: String,
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub model_input_width: u32,
    pub model_input_height: u32,
    pub stub_fixtures_path: Option<PathBuf>,
}

impl InferenceConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("INFERD_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file::<InferenceConfigFile>(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: InferenceConfigFile) -> Self {
        Self {
            api_addr: file
                .api
                .as_ref()
                .and_then(|api| api.addr.clone())
                .unwrap_or_else(|| DEFAULT_INFERD_ADDR.to_string()),
            backend: file.backend.unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            model_path: file.model_path,
            model_input_width: file.model_input_width.unwrap_or(DEFAULT_MODEL_INPUT),
            model_input_height: file.model_input_height.unwrap_or(DEFAULT_MODEL_INPUT),
            stub_fixtures_path: file.stub_fixtures_path,
        }
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("INFERD_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(backend) = std::env::var("INFERD_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = backend;
            }
        }
        if let Ok(path) = std::env::var("INFERD_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("INFERD_STUB_FIXTURES") {
            if !path.trim().is_empty() {
                self.stub_fixtures_path = Some(PathBuf::from(path));
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match self.backend.as_str() {
            "stub" => Ok(()),
            "tract" => {
                if cfg!(feature = "backend-tract") {
                    if self.model_path.is_none() {
                        return Err(anyhow!("backend 'tract' requires a model_path"));
                    }
                    Ok(())
                } else {
                    Err(anyhow!(
                        "backend 'tract' requires the backend-tract feature"
                    ))
                }
            }
            other => Err(anyhow!("unknown backend '{}'", other)),
        }
    }
}

fn read_config_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
