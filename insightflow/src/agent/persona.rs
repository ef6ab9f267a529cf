//! Agent personas.

use serde::{Deserialize, Serialize};

/// The immutable framing an agent presents to its backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Display name, e.g. "Dataset Validator".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// What the agent does.
    pub role: String,
    /// What the agent must return.
    pub goal: String,
    /// Background that shapes tone and strictness.
    #[serde(default)]
    pub backstory: String,
}

impl Persona {
    /// Creates a new persona.
    #[must_use]
    pub fn new(role: impl Into<String>, goal: impl Into<String>, backstory: impl Into<String>) -> Self {
        Self {
            name: None,
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the display name, falling back to the role.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.role)
    }

    /// Renders the system message sent with every request.
    #[must_use]
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!("You are {}. Your role: {}.", self.display_name(), self.role);
        prompt.push_str("\nYour goal: ");
        prompt.push_str(&self.goal);
        if !self.backstory.trim().is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(self.backstory.trim());
        }
        prompt
    }
}
