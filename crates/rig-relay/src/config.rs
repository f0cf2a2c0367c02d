use event_log::FileFormat;
use rpc_relay::BatchHookMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen_addr: String,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub routing_file: Option<PathBuf>,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen(),
            target: TargetConfig::default(),
            routing_file: None,
            routes: Vec::new(),
            hooks: HooksConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Protocol spoken to the downstream server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[default]
    Rpc,
    Line,
    Simulated,
}

#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub kind: TargetKind,
    #[serde(default = "default_target_host")]
    pub host: String,
    #[serde(default = "default_target_port")]
    pub port: u16,
    /// `0` disables the limit.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            kind: TargetKind::default(),
            host: default_target_host(),
            port: default_target_port(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub on_request: Option<PathBuf>,
    #[serde(default)]
    pub on_response: Option<PathBuf>,
    /// `0` disables the limit.
    #[serde(default = "default_hook_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub batch_mode: BatchHookMode,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            on_request: None,
            on_response: None,
            timeout_ms: default_hook_timeout(),
            batch_mode: BatchHookMode::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub file_format: FileFormat,
    #[serde(default = "default_history")]
    pub history: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            quiet: false,
            file: None,
            file_format: FileFormat::default(),
            history: default_history(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_listen() -> String {
    "127.0.0.1:7362".to_string()
}

fn default_target_host() -> String {
    "localhost".to_string()
}

fn default_target_port() -> u16 {
    7363
}

fn default_call_timeout() -> u64 {
    10
}

fn default_hook_timeout() -> u64 {
    2000
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_history() -> usize {
    1000
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// A missing file is `Ok(None)` so the relay can run from command-line flags
/// alone; the caller reports it once logging is up.
pub fn load(path: &Path) -> anyhow::Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(Some(config))
}
