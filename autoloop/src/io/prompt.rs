//! Prompt rendering for the system prompt and constraint block.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde_json::json;

use crate::commands::CommandRegistry;
use crate::core::cost::Cost;
use crate::io::profile::AgentProfile;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const CONSTRAINTS_TEMPLATE: &str = include_str!("prompts/constraints.md");

/// Final user turn of a regular cycle.
pub const TRIGGER_PROMPT: &str =
    "Determine which next command to use, and respond using the format specified above:";

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .context("load system template")?;
        env.add_template("constraints", CONSTRAINTS_TEMPLATE)
            .context("load constraints template")?;
        Ok(Self { env })
    }

    /// Identity, role and numbered goals. The budget line appears only for a
    /// non-zero ceiling.
    pub fn render_system(&self, profile: &AgentProfile, budget_ceiling: Cost) -> Result<String> {
        let template = self.env.get_template("system")?;
        let goals: Vec<&str> = profile
            .goals
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .collect();
        let rendered = template.render(context! {
            name => profile.name.trim(),
            role => profile.role.trim(),
            goals => goals,
            budget => (!budget_ceiling.is_zero()).then(|| budget_ceiling.to_string()),
        })?;
        Ok(rendered.trim_end().to_string())
    }

    pub fn render_constraints(
        &self,
        constraints: &[String],
        registry: &CommandRegistry,
    ) -> Result<String> {
        let template = self.env.get_template("constraints")?;
        let commands: Vec<String> = registry.specs().map(|spec| spec.signature()).collect();
        let rendered = template.render(context! {
            constraints => constraints,
            commands => commands,
            response_format => response_format(),
        })?;
        Ok(rendered.trim_end().to_string())
    }
}

/// Example reply embedded in the constraint block.
pub fn response_format() -> String {
    let example = json!({
        "thought": "thought",
        "reasoning": "reasoning",
        "plan": ["short bulleted", "list that conveys", "long-term plan"],
        "criticism": "constructive self-criticism",
        "command": {"name": "command name", "args": {"arg name": "value"}}
    });
    serde_json::to_string_pretty(&example).unwrap_or_else(|_| example.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::builtin::register_builtins;

    fn profile() -> AgentProfile {
        AgentProfile {
            name: "Writer".to_string(),
            role: "an assistant that writes files.".to_string(),
            goals: vec![
                "write 'hello' to hello.txt".to_string(),
                "finish".to_string(),
            ],
            ..AgentProfile::default()
        }
    }

    #[test]
    fn system_prompt_numbers_goals() {
        let engine = PromptEngine::new().expect("engine");
        let text = engine.render_system(&profile(), Cost::ZERO).expect("render");
        assert!(text.starts_with("You are Writer, an assistant that writes files."));
        assert!(text.contains("1. write 'hello' to hello.txt\n2. finish"));
        assert!(!text.contains("budget"));
    }

    #[test]
    fn system_prompt_mentions_nonzero_budget() {
        let engine = PromptEngine::new().expect("engine");
        let text = engine
            .render_system(&profile(), Cost::from_dollars(1.0))
            .expect("render");
        assert!(text.contains("Your API budget is $1.00."));
    }

    #[test]
    fn constraints_list_commands_and_format() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = CommandRegistry::new();
        register_builtins(&mut registry, temp.path()).expect("register");
        let engine = PromptEngine::new().expect("engine");

        let text = engine
            .render_constraints(&["No user assistance.".to_string()], &registry)
            .expect("render");
        assert!(text.contains("1. No user assistance."));
        assert!(text.contains("1. finish: "));
        assert!(text.contains("3. write_file: "));
        assert!(text.contains("\"criticism\""));
    }
}
