//! Agent parameter sets and prompt variants.

use crate::{ParallaxError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Parameters binding a role to a model call.
///
/// Immutable for the duration of a run. Variant trials never edit a config
/// in place; they build a new one with [`AgentConfig::with_variant`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Role name, e.g. `strategic_analyst`.
    #[serde(default)]
    pub name: String,

    /// Backend model identifier.
    pub model_id: String,

    /// Sampling temperature in `[0.0, 1.0]`.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on generated tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    pub system_prompt: String,

    /// Keys the response is expected to contain, in display order.
    #[serde(default)]
    pub output_fields: Vec<String>,
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    2048
}

impl AgentConfig {
    pub fn new(
        name: impl Into<String>,
        model_id: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model_id: model_id.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: system_prompt.into(),
            output_fields: Vec::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_output_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Check the invariants the model client relies on.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ParallaxError::Config("agent name must not be empty".into()));
        }
        if self.model_id.trim().is_empty() {
            return Err(ParallaxError::Config(format!(
                "agent '{}' has no model_id",
                self.name
            )));
        }
        validate_temperature(self.temperature, &self.name)?;
        if self.max_tokens == 0 {
            return Err(ParallaxError::Config(format!(
                "agent '{}' max_tokens must be positive",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for field in &self.output_fields {
            if !seen.insert(field.as_str()) {
                return Err(ParallaxError::Config(format!(
                    "agent '{}' declares output field '{}' twice",
                    self.name, field
                )));
            }
        }
        Ok(())
    }

    /// Build a trial config: temperature and system prompt come from the
    /// variant, everything else is inherited.
    pub fn with_variant(&self, variant: &PromptVariant) -> AgentConfig {
        AgentConfig {
            temperature: variant.temperature,
            system_prompt: variant.system_prompt.clone(),
            ..self.clone()
        }
    }
}

/// An alternate prompt formulation for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVariant {
    #[serde(default)]
    pub variant_id: String,
    pub name: String,
    pub temperature: f32,
    pub system_prompt: String,
    #[serde(default)]
    pub hypothesis: String,
    #[serde(default)]
    pub expected_performance: String,
}

impl PromptVariant {
    pub fn validate(&self) -> Result<()> {
        if self.variant_id.trim().is_empty() {
            return Err(ParallaxError::Config("variant_id must not be empty".into()));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(ParallaxError::Config(format!(
                "variant '{}' has an empty system prompt",
                self.variant_id
            )));
        }
        validate_temperature(self.temperature, &self.variant_id)
    }
}

fn validate_temperature(temperature: f32, owner: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&temperature) {
        return Err(ParallaxError::Config(format!(
            "'{owner}' temperature {temperature} is outside [0, 1]"
        )));
    }
    Ok(())
}
