//! Configuration loading
//!
//! A single TOML bootstrap file, resolved in this priority order:
//! 1. Command-line argument (`--config`)
//! 2. `BIDS_QC_CONFIG` environment variable
//! 3. `<bids_root>/results/bids-qc.toml`
//! 4. `<user config dir>/bids-qc/config.toml`
//! 5. Compiled defaults
//!
//! A missing file is not an error: the command logs a warning and runs on
//! defaults. A file that exists but does not parse is fatal.

use crate::artifacts::{Plane, SliceSelection};
use crate::model::Rating;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "BIDS_QC_CONFIG";

/// File name looked up inside `<bids_root>/results/`
pub const CONFIG_FILE_NAME: &str = "bids-qc.toml";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QcConfig {
    /// BIDS suffix of scans to review (e.g. `T1w`, `T2w`)
    #[serde(default = "default_modality")]
    pub modality: String,

    /// Number of slices per montage
    #[serde(default = "default_num_slices")]
    pub num_slices: usize,

    /// Planes rendered for every item
    #[serde(default = "default_planes")]
    pub planes: Vec<Plane>,

    /// How slices are chosen along each plane's axis
    #[serde(default)]
    pub selection: SliceSelection,

    /// Montage grid width in slices
    #[serde(default = "default_montage_columns")]
    pub montage_columns: usize,

    /// Fan batch loops out over rayon's thread pool
    #[serde(default)]
    pub parallel: bool,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Annotation server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Rows per page in the list view
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Selection gate settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// Ratings that let an item into the correction pipeline
    #[serde(default = "default_approved")]
    pub approved: Vec<Rating>,

    /// Treat unrated items as approved (off: unreviewed means rejected)
    #[serde(default)]
    pub include_unrated: bool,
}

/// External program invocation template
///
/// `args` may contain `{input}`, `{output}`, `{input_dir}`, `{output_dir}`,
/// `{input_name}` and `{output_name}` placeholders.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Correction pipeline settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_bias_correction")]
    pub bias_correction: CommandTemplate,

    #[serde(default = "default_skull_strip")]
    pub skull_strip: CommandTemplate,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_modality() -> String {
    "T1w".to_string()
}

fn default_num_slices() -> usize {
    10
}

fn default_planes() -> Vec<Plane> {
    vec![Plane::Axial, Plane::Sagittal, Plane::Coronal]
}

fn default_montage_columns() -> usize {
    5
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_page_size() -> usize {
    50
}

fn default_approved() -> Vec<Rating> {
    vec![Rating::Pass]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bias_correction() -> CommandTemplate {
    CommandTemplate {
        program: "N4BiasFieldCorrection".to_string(),
        args: ["-d", "3", "-i", "{input}", "-o", "{output}"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

fn default_skull_strip() -> CommandTemplate {
    CommandTemplate {
        program: "docker".to_string(),
        args: [
            "run",
            "--rm",
            "-v",
            "{output_dir}:/data",
            "freesurfer/synthstrip:latest",
            "-i",
            "/data/{input_name}",
            "-o",
            "/data/{output_name}",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            page_size: default_page_size(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            approved: default_approved(),
            include_unrated: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bias_correction: default_bias_correction(),
            skull_strip: default_skull_strip(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            modality: default_modality(),
            num_slices: default_num_slices(),
            planes: default_planes(),
            selection: SliceSelection::default(),
            montage_columns: default_montage_columns(),
            parallel: false,
            server: ServerConfig::default(),
            gate: GateConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl QcConfig {
    /// Parse a config file's contents
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: QcConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: QcConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve and load the configuration for a dataset
    ///
    /// Returns the config together with the file it came from, if any.
    pub fn load(cli_path: Option<&Path>, bids_root: &Path) -> Result<(Self, Option<PathBuf>)> {
        // An explicitly requested file must exist
        if let Some(path) = cli_path {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        match resolve_config_path(bids_root) {
            Some(path) => {
                let config = Self::from_file(&path)?;
                Ok((config, Some(path)))
            }
            None => Ok((Self::default(), None)),
        }
    }

    /// Reject values no command can work with
    pub fn validate(&self) -> Result<()> {
        if self.modality.trim().is_empty() {
            return Err(Error::Config("modality must not be empty".to_string()));
        }
        if self.num_slices == 0 {
            return Err(Error::Config("num_slices must be at least 1".to_string()));
        }
        if self.montage_columns == 0 {
            return Err(Error::Config("montage_columns must be at least 1".to_string()));
        }
        if self.planes.is_empty() {
            return Err(Error::Config("planes must list at least one plane".to_string()));
        }
        if self.server.page_size == 0 {
            return Err(Error::Config("server.page_size must be at least 1".to_string()));
        }
        self.selection.validate()?;
        Ok(())
    }

    /// Log where the configuration came from
    pub fn log_source(source: Option<&Path>) {
        match source {
            Some(path) => info!("Configuration loaded from {}", path.display()),
            None => warn!("No configuration file found, using built-in defaults"),
        }
    }
}

/// Find the first existing config file below the command-line level
pub fn resolve_config_path(bids_root: &Path) -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        warn!(
            "{} points to {}, which does not exist",
            CONFIG_ENV_VAR,
            path.display()
        );
    }

    let dataset_config = bids_root.join("results").join(CONFIG_FILE_NAME);
    if dataset_config.exists() {
        return Some(dataset_config);
    }

    let user_config = dirs::config_dir().map(|d| d.join("bids-qc").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    None
}
