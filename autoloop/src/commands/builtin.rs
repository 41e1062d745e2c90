//! Built-in commands registered by the `autoloop` binary.
//!
//! File commands are confined to a workspace directory: paths must be
//! relative and may not contain `..` components.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};

use super::{Args, CommandHandler, CommandKind, CommandRegistry, RegistryError};

pub const FINISH: &str = "finish";
pub const WRITE_FILE: &str = "write_file";
pub const READ_FILE: &str = "read_file";

/// Register `finish`, `write_file` and `read_file` against `workdir`.
pub fn register_builtins(
    registry: &mut CommandRegistry,
    workdir: &Path,
) -> std::result::Result<(), RegistryError> {
    registry.register(
        FINISH,
        "Signal that all goals are complete and stop.",
        &["reason"],
        CommandKind::Terminal,
        Finish,
    )?;
    registry.register(
        WRITE_FILE,
        "Write text to a file in the workspace, replacing it.",
        &["path", "content"],
        CommandKind::Action,
        WriteFile::new(workdir),
    )?;
    registry.register(
        READ_FILE,
        "Read a text file from the workspace.",
        &["path"],
        CommandKind::Action,
        ReadFile::new(workdir),
    )?;
    Ok(())
}

pub struct Finish;

impl CommandHandler for Finish {
    fn call(&self, args: &Args) -> Result<String> {
        Ok(string_arg(args, "reason")?.to_string())
    }
}

pub struct WriteFile {
    root: PathBuf,
}

impl WriteFile {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl CommandHandler for WriteFile {
    fn call(&self, args: &Args) -> Result<String> {
        let rel = string_arg(args, "path")?;
        let content = string_arg(args, "content")?;
        let path = resolve_in(&self.root, rel)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {rel}"))?;
        Ok(format!("wrote {} bytes to {rel}", content.len()))
    }
}

pub struct ReadFile {
    root: PathBuf,
}

impl ReadFile {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl CommandHandler for ReadFile {
    fn call(&self, args: &Args) -> Result<String> {
        let rel = string_arg(args, "path")?;
        let path = resolve_in(&self.root, rel)?;
        fs::read_to_string(&path).with_context(|| format!("read {rel}"))
    }
}

fn string_arg<'a>(args: &'a Args, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("argument '{key}' must be a string"))
}

/// Join a model-supplied relative path onto `root`, refusing escapes.
pub fn resolve_in(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    if rel.trim().is_empty() {
        bail!("path must not be empty");
    }
    for component in rel_path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => bail!("path '{rel}' must not contain '..'"),
            Component::RootDir | Component::Prefix(_) => {
                bail!("path '{rel}' must be relative to the workspace")
            }
        }
    }
    Ok(root.join(rel_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::dispatch::{DispatchOutcome, dispatch};
    use crate::core::types::CommandCall;
    use serde_json::json;

    fn call(name: &str, args: serde_json::Value) -> CommandCall {
        CommandCall {
            name: name.to_string(),
            args: args.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn write_then_read_inside_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = CommandRegistry::new();
        register_builtins(&mut registry, temp.path()).expect("register");

        let outcome = dispatch(
            &call(WRITE_FILE, json!({"path": "out/hello.txt", "content": "hello"})),
            &registry,
        );
        assert_eq!(
            outcome.observation(),
            "Command 'write_file' returned: wrote 5 bytes to out/hello.txt"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("out/hello.txt")).expect("read"),
            "hello"
        );

        let outcome = dispatch(&call(READ_FILE, json!({"path": "out/hello.txt"})), &registry);
        assert_eq!(outcome.observation(), "Command 'read_file' returned: hello");
    }

    #[test]
    fn escapes_are_reported_as_failures() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = CommandRegistry::new();
        register_builtins(&mut registry, temp.path()).expect("register");

        let outcome = dispatch(
            &call(WRITE_FILE, json!({"path": "../x.txt", "content": "x"})),
            &registry,
        );
        assert_eq!(
            outcome.observation(),
            "Command 'write_file' failed: path '../x.txt' must not contain '..'"
        );

        let outcome = dispatch(&call(READ_FILE, json!({"path": "/etc/passwd"})), &registry);
        assert!(outcome.observation().contains("must be relative"));
    }

    #[test]
    fn finish_is_terminal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = CommandRegistry::new();
        register_builtins(&mut registry, temp.path()).expect("register");

        let outcome = dispatch(&call(FINISH, json!({"reason": "all done"})), &registry);
        assert_eq!(
            outcome,
            DispatchOutcome::Finished("Command 'finish' returned: all done".to_string())
        );
    }

    #[test]
    fn non_string_argument_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = CommandRegistry::new();
        register_builtins(&mut registry, temp.path()).expect("register");

        let outcome = dispatch(&call(READ_FILE, json!({"path": 3})), &registry);
        assert_eq!(
            outcome.observation(),
            "Command 'read_file' failed: argument 'path' must be a string"
        );
    }
}
