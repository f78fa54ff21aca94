//! Configuration file management for usercheck.
//!
//! Provides a TOML-based config file at `~/.config/usercheck/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use usercheck_core::HarnessConfig;
use usercheck_core::supervisor::StartSpec;

pub const ENV_BASE_URL: &str = "USERCHECK_BASE_URL";
pub const ENV_READINESS_TIMEOUT_MS: &str = "USERCHECK_READINESS_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "USERCHECK_POLL_INTERVAL_MS";
pub const ENV_STEP_TIMEOUT_MS: &str = "USERCHECK_STEP_TIMEOUT_MS";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServiceSection {
    /// API root (`.../api`) or collection URL (`.../api/users`).
    pub base_url: Option<String>,
    /// URL polled for readiness; defaults to the collection URL.
    pub probe_url: Option<String>,
    /// Program (or script, with `interpreter`) that starts the service.
    pub program: Option<String>,
    /// Runs `program` as a script, e.g. `python3`.
    pub interpreter: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TimeoutSection {
    pub readiness_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub step_ms: Option<u64>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the usercheck config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/usercheck` or
/// `~/.config/usercheck`, on every platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("usercheck");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("usercheck")
}

/// Return the path to the default config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file at `path`.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Load `explicit` (which must exist) or the default config file (which
/// may be absent).
pub fn load_optional(explicit: Option<&Path>) -> Result<Option<ConfigFile>> {
    if let Some(path) = explicit {
        return load_config(path).map(Some);
    }
    let path = config_path();
    if !path.exists() {
        return Ok(None);
    }
    load_config(&path).map(Some)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))
}

/// Starter config written by `usercheck init`.
pub fn starter_config(base_url: &str) -> ConfigFile {
    ConfigFile {
        service: ServiceSection {
            base_url: Some(base_url.to_string()),
            program: Some("api.py".to_string()),
            interpreter: Some("python3".to_string()),
            ..ServiceSection::default()
        },
        timeouts: TimeoutSection {
            readiness_ms: Some(HarnessConfig::DEFAULT_READINESS_TIMEOUT.as_millis() as u64),
            poll_interval_ms: Some(HarnessConfig::DEFAULT_POLL_INTERVAL.as_millis() as u64),
            step_ms: Some(HarnessConfig::DEFAULT_STEP_TIMEOUT.as_millis() as u64),
        },
    }
}

// -----------------------------------------------------------------------
// Resolution
// -----------------------------------------------------------------------

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub base_url: Option<String>,
    pub service_program: Option<String>,
    pub service_interpreter: Option<String>,
    pub service_args: Vec<String>,
    pub service_dir: Option<PathBuf>,
}

/// Resolve the harness configuration.
///
/// - Base URL: `--base-url` > `USERCHECK_BASE_URL` > `service.base_url` > default
/// - Timings: `USERCHECK_*_MS` > `timeouts.*_ms` > default
/// - Service command: `--service-*` flags > `service.*` keys > none
pub fn resolve(config_file: Option<&Path>, cli: &CliOverrides) -> Result<HarnessConfig> {
    let file = load_optional(config_file)?.unwrap_or_default();

    let base_url = if let Some(url) = &cli.base_url {
        url.clone()
    } else if let Ok(url) = std::env::var(ENV_BASE_URL) {
        url
    } else if let Some(url) = &file.service.base_url {
        url.clone()
    } else {
        HarnessConfig::DEFAULT_BASE_URL.to_string()
    };

    let readiness = duration_from(ENV_READINESS_TIMEOUT_MS, file.timeouts.readiness_ms)?
        .unwrap_or(HarnessConfig::DEFAULT_READINESS_TIMEOUT);
    let poll = duration_from(ENV_POLL_INTERVAL_MS, file.timeouts.poll_interval_ms)?
        .unwrap_or(HarnessConfig::DEFAULT_POLL_INTERVAL);
    let step = duration_from(ENV_STEP_TIMEOUT_MS, file.timeouts.step_ms)?
        .unwrap_or(HarnessConfig::DEFAULT_STEP_TIMEOUT);

    let mut config = HarnessConfig::new(base_url)
        .with_readiness(readiness, poll)
        .with_step_timeout(step);
    config.probe_url = file.service.probe_url.clone();

    if let Some(spec) = start_spec(cli, &file.service) {
        config = config.with_service(spec);
    }
    Ok(config)
}

fn duration_from(var: &str, file_ms: Option<u64>) -> Result<Option<Duration>> {
    match std::env::var(var) {
        Ok(raw) => {
            let ms: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{var} must be a number of milliseconds, got {raw:?}"))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        Err(_) => Ok(file_ms.map(Duration::from_millis)),
    }
}

fn start_spec(cli: &CliOverrides, file: &ServiceSection) -> Option<StartSpec> {
    let program = cli.service_program.as_ref().or(file.program.as_ref())?;
    let interpreter = cli
        .service_interpreter
        .as_ref()
        .or(file.interpreter.as_ref());

    let mut spec = match interpreter {
        Some(interpreter) => StartSpec::interpreted(interpreter.clone(), program.clone()),
        None => StartSpec::new(program.clone()),
    };
    let args = if cli.service_args.is_empty() {
        &file.args
    } else {
        &cli.service_args
    };
    spec = spec.args(args.iter().cloned());
    if let Some(dir) = cli.service_dir.as_ref().or(file.working_dir.as_ref()) {
        spec = spec.working_dir(dir.clone());
    }
    for (key, value) in &file.env {
        spec = spec.env(key.clone(), value.clone());
    }
    Some(spec)
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
