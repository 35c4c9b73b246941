//! Scripted interaction replay
//!
//! A scenario is a YAML file listing sessions and the interactions each one
//! performs:
//!
//! ```yaml
//! page: classifier
//! sessions:
//!   - name: alice
//!     interactions:
//!       - action: set
//!         widget: k
//!         value: 7
//!   - name: bob
//!     page: raffle
//!     interactions:
//!       - action: press
//!         button: Draw
//! ```

use crate::ui::Interaction;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sessions to replay concurrently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Page used by sessions that do not name their own
    #[serde(default)]
    pub page: Option<String>,
    pub sessions: Vec<SessionScript>,
}

/// One session's interactions, applied in order after its first rerun
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionScript {
    pub name: String,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

impl Scenario {
    /// Load a scenario file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario: {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Invalid scenario: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Scenario =
            serde_yaml::from_str(content).context("Failed to parse scenario YAML")?;
        for session in &scenario.sessions {
            scenario.page_for(session)?;
        }
        Ok(scenario)
    }

    /// Page a session runs: its own, else the scenario default
    pub fn page_for<'a>(&'a self, session: &'a SessionScript) -> Result<&'a str> {
        session
            .page
            .as_deref()
            .or(self.page.as_deref())
            .ok_or_else(|| anyhow!("session '{}' names no page and the scenario has no default", session.name))
    }
}
