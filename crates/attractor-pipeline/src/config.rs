//! Run configuration: the knobs a `Run` (or `Resume`) invocation is launched
//! with, persisted alongside the checkpoint so a resumed run doesn't have to
//! be re-supplied on the command line.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use attractor_types::Result;

/// Configuration for a single pipeline run, persisted to
/// `{logs_root}/run_config.json` at startup and read back by `resume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub pipeline_path: PathBuf,
    pub workdir: Option<PathBuf>,
    pub logs_root: PathBuf,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    #[serde(default)]
    pub artifact_profiles: Vec<String>,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub provider_override: Option<String>,
}

fn default_max_steps() -> u64 {
    200
}

impl RunConfig {
    pub fn new(pipeline_path: PathBuf, logs_root: PathBuf) -> Self {
        Self {
            pipeline_path,
            workdir: None,
            logs_root,
            dry_run: false,
            max_budget_usd: None,
            max_steps: default_max_steps(),
            artifact_profiles: Vec::new(),
            model_override: None,
            provider_override: None,
        }
    }

    /// Persist this config to `{logs_root}/run_config.json`.
    pub fn write(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.logs_root)?;
        let path = self.logs_root.join("run_config.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Read a previously persisted config from `{logs_root}/run_config.json`.
    pub fn read(logs_root: &Path) -> Result<Self> {
        let path = logs_root.join("run_config.json");
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}
