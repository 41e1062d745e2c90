//! Scaffolding for `autoloop init`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{AutoloopConfig, CONFIG_FILE, write_config};
use crate::io::profile::{AgentProfile, PROFILE_FILE, write_profile};

/// Canonical file locations for a workspace root.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub profile_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_path: root.join(CONFIG_FILE),
            profile_path: root.join(PROFILE_FILE),
            gitignore_path: root.join(".autoloop").join(".gitignore"),
            root,
        }
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing files.
    pub force: bool,
}

/// Write a default `autoloop.toml` and a starter `profile.toml` in `root`.
///
/// Fails if either file already exists unless `options.force` is set.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<WorkspacePaths> {
    let paths = WorkspacePaths::new(root);
    if !options.force {
        for path in [&paths.config_path, &paths.profile_path] {
            if path.exists() {
                return Err(anyhow!(
                    "autoloop init: {} already exists (use --force to overwrite)",
                    path.display()
                ));
            }
        }
    }

    write_config(&paths.config_path, &AutoloopConfig::default())?;
    write_profile(&paths.profile_path, &starter_profile())?;
    write_file(&paths.gitignore_path, AUTOLOOP_GITIGNORE)?;
    Ok(paths)
}

fn starter_profile() -> AgentProfile {
    AgentProfile {
        goals: vec![STARTER_GOAL.to_string()],
        ..AgentProfile::default()
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const STARTER_GOAL: &str = "Write 'hello' to hello.txt, then finish.";
const AUTOLOOP_GITIGNORE: &str = "runs/\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;
    use crate::io::profile::load_profile;

    fn read_to_string(path: &Path) -> String {
        fs::read_to_string(path).expect("read file")
    }

    /// Verifies init writes loadable config and profile files.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");

        assert_eq!(
            load_config(&paths.config_path).expect("config"),
            AutoloopConfig::default()
        );
        let profile = load_profile(&paths.profile_path).expect("profile");
        assert_eq!(profile.goals, vec![STARTER_GOAL.to_string()]);
        assert_eq!(read_to_string(&paths.gitignore_path), AUTOLOOP_GITIGNORE);
    }

    #[test]
    fn init_without_force_refuses_existing_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_workspace(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    /// Writes a customized profile, re-inits with force, confirms the starter is restored.
    #[test]
    fn init_with_force_rewrites_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.profile_path, "role = \"custom\"\n").expect("write custom");

        init_workspace(temp.path(), &InitOptions { force: true }).expect("re-init");
        let profile = load_profile(&paths.profile_path).expect("profile");
        assert_eq!(profile.goals, vec![STARTER_GOAL.to_string()]);
    }
}
