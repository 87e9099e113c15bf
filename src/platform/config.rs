//! `fsgrade.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Base directory for run artifacts (reports).
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Directory that receives one materialized tree per scenario.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Launch command template for bare-process runs.
    #[serde(default = "default_launch_tmpl")]
    pub launch_tmpl: PathBuf,

    /// Launch command template for containerized runs.
    #[serde(default = "default_container_tmpl")]
    pub container_tmpl: PathBuf,

    /// Run the tested server inside a container.
    #[serde(default)]
    pub use_container: bool,

    /// Host the harness connects to (the tested server binds 0.0.0.0).
    #[serde(default = "default_solution_host")]
    pub solution_host: String,

    /// Discard the tested server's stdout/stderr instead of inheriting them.
    #[serde(default)]
    pub suppress_server_output: bool,

    /// Readiness probe attempts (100ms apart, 1s per-attempt timeout).
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".fsgrade")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_launch_tmpl() -> PathBuf {
    PathBuf::from("solution.tmpl")
}

fn default_container_tmpl() -> PathBuf {
    PathBuf::from("container_solution.tmpl")
}

fn default_solution_host() -> String {
    "localhost".to_string()
}

fn default_probe_attempts() -> u32 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            temp_dir: default_temp_dir(),
            launch_tmpl: default_launch_tmpl(),
            container_tmpl: default_container_tmpl(),
            use_container: false,
            solution_host: default_solution_host(),
            suppress_server_output: false,
            probe_attempts: default_probe_attempts(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base_dir.join("runs")
    }

    /// Template used for the current execution mode.
    pub fn template_path(&self) -> &Path {
        if self.use_container {
            &self.container_tmpl
        } else {
            &self.launch_tmpl
        }
    }
}
