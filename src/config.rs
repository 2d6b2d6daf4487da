use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_DB_PATH: &str = "sitewatch.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8750";
const DEFAULT_DATA_DIR: &str = "sitewatch_data";
const DEFAULT_RECOGNIZER_URL: &str = "http://127.0.0.1:8791/analyze";
const DEFAULT_MAPPER_URL: &str = "http://127.0.0.1:8792/map";
const DEFAULT_INTERVAL_SECS: f64 = 1.5;
const DEFAULT_COOLDOWN_SECS: f64 = 300.0;
const DEFAULT_CLIP_BEFORE_SECS: f64 = 15.0;
const DEFAULT_CLIP_AFTER_SECS: f64 = 15.0;

#[derive(Debug, Deserialize, Default)]
struct SitewatchConfigFile {
    db_path: Option<String>,
    data_dir: Option<String>,
    api: Option<ApiConfigFile>,
    collaborators: Option<CollaboratorConfigFile>,
    monitoring: Option<MonitoringConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CollaboratorConfigFile {
    recognizer_url: Option<String>,
    mapper_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MonitoringConfigFile {
    analysis_interval_seconds: Option<f64>,
    cooldown_seconds: Option<f64>,
    clip_before_seconds: Option<f64>,
    clip_after_seconds: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SitewatchConfig {
    pub db_path: String,
    pub data_dir: PathBuf,
    pub api_addr: String,
    pub recognizer_url: String,
    pub mapper_url: String,
    pub monitoring: MonitoringSettings,
}

#[derive(Debug, Clone)]
pub struct MonitoringSettings {
    pub analysis_interval_s: f64,
    pub cooldown_s: f64,
    pub clip_before_s: f64,
    pub clip_after_s: f64,
}

impl SitewatchConfig {
    /// Load configuration: JSON file named by `SITEWATCH_CONFIG` (when set),
    /// then environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SITEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SitewatchConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let data_dir = PathBuf::from(
            file.data_dir
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
        );
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let recognizer_url = file
            .collaborators
            .as_ref()
            .and_then(|c| c.recognizer_url.clone())
            .unwrap_or_else(|| DEFAULT_RECOGNIZER_URL.to_string());
        let mapper_url = file
            .collaborators
            .and_then(|c| c.mapper_url)
            .unwrap_or_else(|| DEFAULT_MAPPER_URL.to_string());
        let monitoring = MonitoringSettings {
            analysis_interval_s: file
                .monitoring
                .as_ref()
                .and_then(|m| m.analysis_interval_seconds)
                .unwrap_or(DEFAULT_INTERVAL_SECS),
            cooldown_s: file
                .monitoring
                .as_ref()
                .and_then(|m| m.cooldown_seconds)
                .unwrap_or(DEFAULT_COOLDOWN_SECS),
            clip_before_s: file
                .monitoring
                .as_ref()
                .and_then(|m| m.clip_before_seconds)
                .unwrap_or(DEFAULT_CLIP_BEFORE_SECS),
            clip_after_s: file
                .monitoring
                .and_then(|m| m.clip_after_seconds)
                .unwrap_or(DEFAULT_CLIP_AFTER_SECS),
        };
        Self {
            db_path,
            data_dir,
            api_addr,
            recognizer_url,
            mapper_url,
            monitoring,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SITEWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("SITEWATCH_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(addr) = std::env::var("SITEWATCH_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(url) = std::env::var("SITEWATCH_RECOGNIZER_URL") {
            if !url.trim().is_empty() {
                self.recognizer_url = url;
            }
        }
        if let Ok(url) = std::env::var("SITEWATCH_MAPPER_URL") {
            if !url.trim().is_empty() {
                self.mapper_url = url;
            }
        }
        if let Ok(interval) = std::env::var("SITEWATCH_INTERVAL_SECS") {
            self.monitoring.analysis_interval_s = interval.parse().map_err(|_| {
                anyhow!("SITEWATCH_INTERVAL_SECS must be a number of seconds")
            })?;
        }
        if let Ok(cooldown) = std::env::var("SITEWATCH_COOLDOWN_SECS") {
            self.monitoring.cooldown_s = cooldown.parse().map_err(|_| {
                anyhow!("SITEWATCH_COOLDOWN_SECS must be a number of seconds")
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(self.monitoring.analysis_interval_s > 0.0) {
            return Err(anyhow!("analysis interval must be greater than zero"));
        }
        if self.monitoring.cooldown_s < 0.0 {
            return Err(anyhow!("cooldown must not be negative"));
        }
        if self.monitoring.clip_before_s < 0.0 || self.monitoring.clip_after_s < 0.0 {
            return Err(anyhow!("clip window bounds must not be negative"));
        }
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        Ok(())
    }

    /// Orchestrator tunables derived from this configuration.
    pub fn monitor_config(&self) -> crate::monitor::MonitorConfig {
        crate::monitor::MonitorConfig {
            analysis_interval_s: self.monitoring.analysis_interval_s,
            cooldown_s: self.monitoring.cooldown_s,
            clip_before_s: self.monitoring.clip_before_s,
            clip_after_s: self.monitoring.clip_after_s,
            pacing: crate::walker::DEFAULT_PACING,
            data_dir: self.data_dir.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<SitewatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
