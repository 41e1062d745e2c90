//! Loop configuration stored in `autoloop.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::gate::GateMode;
use crate::core::tokens::{ModelCatalog, ModelInfo};
use crate::io::gateway::RetryPolicy;

pub const CONFIG_FILE: &str = "autoloop.toml";

/// Loop configuration (TOML).
///
/// Constructed once at startup and passed by reference to the loop. Missing
/// fields default to the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutoloopConfig {
    /// Catalog name of the model to call.
    pub model: String,
    pub temperature: f32,

    /// Stop after this many cycles. Absent means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u32>,

    /// Model calls per cycle before an unusable reply aborts the cycle.
    pub max_parse_attempts: u32,

    /// Consecutive aborted cycles before the run ends as unrecoverable.
    pub max_failed_cycles: u32,

    /// Per-attempt wall-clock limit for the model service.
    pub request_timeout_secs: u64,

    /// Time to wait for a human answer; 0 waits indefinitely.
    pub confirmation_timeout_secs: u64,

    /// Recalled memories added to each prompt; 0 disables memory.
    pub memory_results: usize,

    /// Constraint lines rendered into the constraint block.
    pub constraints: Vec<String>,

    /// Directory for per-run cycle logs, relative to the workspace.
    pub log_dir: PathBuf,

    pub retry: RetryPolicy,
    pub confirmation: ConfirmationConfig,
    pub service: ServiceConfig,

    /// Additions to, or replacements for, the built-in model catalog.
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub mode: GateMode,
    /// Cycles to auto-approve before the first prompt (interactive mode).
    pub auto_approvals: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            mode: GateMode::Interactive,
            auto_approvals: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Model service program (e.g. `["python3","model_service.py"]`).
    pub command: Vec<String>,

    /// Truncate model service stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            command: vec!["autoloop-model".to_string()],
            output_limit_bytes: 1_000_000,
        }
    }
}

pub fn default_constraints() -> Vec<String> {
    [
        "~4000 word limit for short term memory. Your short term memory is short, so immediately save important information to files.",
        "If you are unsure how you previously did something or want to recall past events, thinking about similar events will help you remember.",
        "No user assistance.",
        "Exclusively use the commands listed below.",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl Default for AutoloopConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.0,
            max_cycles: None,
            max_parse_attempts: 3,
            max_failed_cycles: 3,
            request_timeout_secs: 120,
            confirmation_timeout_secs: 0,
            memory_results: 3,
            constraints: default_constraints(),
            log_dir: PathBuf::from(".autoloop/runs"),
            retry: RetryPolicy::default(),
            confirmation: ConfirmationConfig::default(),
            service: ServiceConfig::default(),
            models: Vec::new(),
        }
    }
}

impl AutoloopConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!(
                "temperature must be within 0.0..=2.0 (got {})",
                self.temperature
            ));
        }
        if self.max_cycles == Some(0) {
            return Err(anyhow!("max_cycles must be > 0 when set"));
        }
        if self.max_parse_attempts == 0 {
            return Err(anyhow!("max_parse_attempts must be > 0"));
        }
        if self.max_failed_cycles == 0 {
            return Err(anyhow!("max_failed_cycles must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        if self.service.output_limit_bytes == 0 {
            return Err(anyhow!("service.output_limit_bytes must be > 0"));
        }
        if self.service.command.is_empty() || self.service.command[0].trim().is_empty() {
            return Err(anyhow!("service.command must be a non-empty array"));
        }
        self.retry.validate()?;
        for model in &self.models {
            model.validate()?;
        }
        self.catalog().get(&self.model)?;
        Ok(())
    }

    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog::with_overrides(&self.models)
    }

    /// Catalog entry for the configured model.
    pub fn model_info(&self) -> Result<ModelInfo> {
        self.catalog().get(&self.model).cloned()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AutoloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<AutoloopConfig> {
    if !path.exists() {
        let cfg = AutoloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AutoloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AutoloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
