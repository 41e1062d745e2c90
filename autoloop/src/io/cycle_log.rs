//! Authoritative per-cycle log under `<log_dir>/<run_id>/`.
//!
//! Always written, unaffected by `RUST_LOG`. One directory per cycle index
//! plus a `report.json` once the run reaches a terminal state.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

use crate::core::cost::Cost;
use crate::core::types::{CycleRecord, LoopReport, TerminalState};

#[derive(Debug, Clone, Serialize)]
pub struct CycleMeta {
    pub run_id: String,
    pub index: u32,
    pub command: Option<String>,
    pub parse_attempts: u32,
    pub cost: Cost,
    pub cumulative_spent: Cost,
    pub dispatched: bool,
    pub terminal: Option<TerminalState>,
}

#[derive(Debug, Clone)]
pub struct CyclePaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub sequence_path: PathBuf,
    pub reply_path: PathBuf,
    pub action_path: PathBuf,
    pub observation_path: PathBuf,
}

impl CyclePaths {
    pub fn new(log_dir: &Path, run_id: &str, index: u32) -> Self {
        let dir = log_dir.join(run_id).join(index.to_string());
        Self {
            dir: dir.clone(),
            meta_path: dir.join("meta.json"),
            sequence_path: dir.join("sequence.json"),
            reply_path: dir.join("reply.txt"),
            action_path: dir.join("action.json"),
            observation_path: dir.join("observation.txt"),
        }
    }
}

pub fn report_path(log_dir: &Path, run_id: &str) -> PathBuf {
    log_dir.join(run_id).join("report.json")
}

/// Writes cycle artifacts for one run.
#[derive(Debug, Clone)]
pub struct CycleLog {
    log_dir: PathBuf,
    run_id: String,
}

#[derive(Serialize)]
struct RunReport<'a> {
    run_id: &'a str,
    #[serde(flatten)]
    report: &'a LoopReport,
}

impl CycleLog {
    pub fn new(log_dir: &Path, run_id: &str) -> Result<Self> {
        validate_id(run_id)?;
        Ok(Self {
            log_dir: log_dir.to_path_buf(),
            run_id: run_id.to_string(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> PathBuf {
        self.log_dir.join(&self.run_id)
    }

    pub fn write_cycle(&self, record: &CycleRecord, meta: &CycleMeta) -> Result<CyclePaths> {
        let paths = CyclePaths::new(&self.log_dir, &self.run_id, record.index);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create cycle dir {}", paths.dir.display()))?;

        // Write in deterministic order to keep logs stable.
        write_json(&paths.meta_path, meta)?;
        write_json(&paths.sequence_path, &record.sequence_sent)?;
        write_text(&paths.reply_path, &record.raw_reply)?;
        if let Some(action) = &record.action {
            write_json(&paths.action_path, action)?;
        }
        write_text(&paths.observation_path, &record.observation)?;
        Ok(paths)
    }

    pub fn write_report(&self, report: &LoopReport) -> Result<PathBuf> {
        let path = report_path(&self.log_dir, &self.run_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create run dir {}", parent.display()))?;
        }
        write_json(
            &path,
            &RunReport {
                run_id: &self.run_id,
                report,
            },
        )?;
        Ok(path)
    }
}

pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("run id must not be empty"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("run id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    if id.chars().all(|c| c == '.') {
        return Err(anyhow!("run id must not be '.' or '..'"));
    }
    Ok(())
}

/// `run-<unix seconds>`, suffixed when a run directory already exists.
pub fn generate_run_id(log_dir: &Path) -> Result<String> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_secs();
    let base = format!("run-{secs}");
    for suffix in 1..=999u32 {
        let id = if suffix == 1 {
            base.clone()
        } else {
            format!("{base}-{suffix}")
        };
        if !log_dir.join(&id).exists() {
            return Ok(id);
        }
    }
    Err(anyhow!(
        "unable to generate unique run id from base '{base}' (too many existing runs)"
    ))
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
