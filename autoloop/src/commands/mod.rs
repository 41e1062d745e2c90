//! Closed registry of commands the model may invoke.
//!
//! Each entry is validated at registration time: the name must be non-empty
//! and unique, and the parameter names are fixed so the dispatcher can reject
//! malformed argument mappings before a handler runs.

pub mod builtin;
pub mod dispatch;

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use thiserror::Error;

/// Argument mapping passed to a handler.
pub type Args = Map<String, Value>;

/// A command implementation.
///
/// Returning `Err` (or panicking) is reported back to the model as a failed
/// command; it never stops the loop.
pub trait CommandHandler {
    fn call(&self, args: &Args) -> anyhow::Result<String>;
}

impl<F> CommandHandler for F
where
    F: Fn(&Args) -> anyhow::Result<String>,
{
    fn call(&self, args: &Args) -> anyhow::Result<String> {
        self(args)
    }
}

/// Whether a successful call ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Action,
    Terminal,
}

pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub parameter_names: BTreeSet<String>,
    pub kind: CommandKind,
    handler: Box<dyn CommandHandler>,
}

impl CommandSpec {
    pub fn handler(&self) -> &dyn CommandHandler {
        self.handler.as_ref()
    }

    /// Prompt line, e.g. `write_file: Write a file. Args: "content", "path"`.
    pub fn signature(&self) -> String {
        let params = self
            .parameter_names
            .iter()
            .map(|p| format!("\"{p}\""))
            .collect::<Vec<_>>()
            .join(", ");
        if params.is_empty() {
            format!("{}: {}", self.name, self.description)
        } else {
            format!("{}: {} Args: {params}", self.name, self.description)
        }
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("parameter_names", &self.parameter_names)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("command name must not be empty")]
    EmptyName,
    #[error("command '{0}' is already registered")]
    Duplicate(String),
    #[error("command '{name}' has an empty parameter name")]
    EmptyParameter { name: String },
}

/// Name-ordered mapping of command name to [`CommandSpec`].
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(
        &mut self,
        name: &str,
        description: &str,
        parameter_names: &[&str],
        kind: CommandKind,
        handler: H,
    ) -> Result<(), RegistryError>
    where
        H: CommandHandler + 'static,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.commands.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        if parameter_names.iter().any(|p| p.trim().is_empty()) {
            return Err(RegistryError::EmptyParameter {
                name: name.to_string(),
            });
        }
        self.commands.insert(
            name.to_string(),
            CommandSpec {
                name: name.to_string(),
                description: description.trim().to_string(),
                parameter_names: parameter_names.iter().map(|p| p.to_string()).collect(),
                kind,
                handler: Box::new(handler),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }

    pub fn specs(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &Args) -> anyhow::Result<String> {
        Ok(String::new())
    }

    #[test]
    fn rejects_duplicate_and_empty_names() {
        let mut registry = CommandRegistry::new();
        registry
            .register("finish", "Stop.", &["reason"], CommandKind::Terminal, noop)
            .expect("register");

        assert_eq!(
            registry.register("finish", "Again.", &[], CommandKind::Action, noop),
            Err(RegistryError::Duplicate("finish".to_string()))
        );
        assert_eq!(
            registry.register("  ", "Blank.", &[], CommandKind::Action, noop),
            Err(RegistryError::EmptyName)
        );
        assert_eq!(
            registry.register("x", "Bad param.", &[""], CommandKind::Action, noop),
            Err(RegistryError::EmptyParameter {
                name: "x".to_string()
            })
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = CommandRegistry::new();
        for name in ["write_file", "finish", "read_file"] {
            registry
                .register(name, "", &[], CommandKind::Action, noop)
                .expect("register");
        }
        assert_eq!(registry.names(), vec!["finish", "read_file", "write_file"]);
    }

    #[test]
    fn signature_lists_sorted_params() {
        let mut registry = CommandRegistry::new();
        registry
            .register(
                "write_file",
                "Write a file.",
                &["path", "content"],
                CommandKind::Action,
                noop,
            )
            .expect("register");
        let spec = registry.get("write_file").expect("spec");
        assert_eq!(
            spec.signature(),
            "write_file: Write a file. Args: \"content\", \"path\""
        );
    }
}
