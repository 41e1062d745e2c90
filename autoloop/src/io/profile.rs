//! Agent profile stored in `profile.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::cost::Cost;
use crate::io::config::write_atomic;

pub const PROFILE_FILE: &str = "profile.toml";
pub const MAX_GOALS: usize = 20;

/// Name, role and goals of the agent, plus its spending ceiling.
///
/// The loop reads `role`, `goals` and `budget_ceiling`; `plugin_names` is
/// carried for external tooling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentProfile {
    pub name: String,
    pub role: String,
    pub goals: Vec<String>,
    /// Dollars; 0 means unlimited.
    pub budget_ceiling: Cost,
    pub plugin_names: Vec<String>,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            name: "Autoloop".to_string(),
            role: "an AI assistant that completes tasks autonomously using the available commands."
                .to_string(),
            goals: Vec::new(),
            budget_ceiling: Cost::ZERO,
            plugin_names: Vec::new(),
        }
    }
}

impl AgentProfile {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("name must not be empty"));
        }
        if self.role.trim().is_empty() {
            return Err(anyhow!("role must not be empty"));
        }
        if self.goals.len() > MAX_GOALS {
            return Err(anyhow!(
                "at most {MAX_GOALS} goals are allowed (got {})",
                self.goals.len()
            ));
        }
        if let Some(idx) = self.goals.iter().position(|g| g.trim().is_empty()) {
            return Err(anyhow!("goals[{idx}] must not be empty"));
        }
        Ok(())
    }
}

pub fn load_profile(path: &Path) -> Result<AgentProfile> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let profile: AgentProfile =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    profile
        .validate()
        .with_context(|| format!("invalid profile {}", path.display()))?;
    Ok(profile)
}

pub fn write_profile(path: &Path, profile: &AgentProfile) -> Result<()> {
    profile.validate()?;
    let mut buf = toml::to_string_pretty(profile).context("serialize profile toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_profile_with_ceiling() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(PROFILE_FILE);
        fs::write(
            &path,
            r#"name = "Writer"
role = "an assistant that writes files"
goals = ["write 'hello' to hello.txt", "finish"]
budget_ceiling = 1.5
"#,
        )
        .expect("write");

        let profile = load_profile(&path).expect("load");
        assert_eq!(profile.goals.len(), 2);
        assert_eq!(profile.budget_ceiling, Cost::from_dollars(1.5));
        assert!(profile.plugin_names.is_empty());
    }

    #[test]
    fn rejects_negative_ceiling_and_too_many_goals() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(PROFILE_FILE);
        fs::write(&path, "role = \"r\"\nbudget_ceiling = -1.0\n").expect("write");
        assert!(load_profile(&path).is_err());

        let profile = AgentProfile {
            goals: (0..=MAX_GOALS).map(|i| format!("goal {i}")).collect(),
            ..AgentProfile::default()
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(PROFILE_FILE);
        let profile = AgentProfile {
            goals: vec!["one".to_string()],
            budget_ceiling: Cost::from_dollars(2.25),
            plugin_names: vec!["search".to_string()],
            ..AgentProfile::default()
        };
        write_profile(&path, &profile).expect("write");
        assert_eq!(load_profile(&path).expect("load"), profile);
    }
}
