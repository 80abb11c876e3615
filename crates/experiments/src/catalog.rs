//! Prompt variant catalog.
//!
//! Loaded from JSON shaped as
//!
//! ```json
//! { "strategic_analyst": { "variants": { "v1": { "name": "...", "temperature": 0.3,
//!   "system_prompt": "...", "hypothesis": "...", "expected_performance": "..." } } } }
//! ```
//!
//! Key order is preserved: it is the order variants run in and the final
//! tie-breaker when ranking.

use parallax_common::{ParallaxError, PromptVariant, Result};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct VariantCatalog {
    agents: Vec<(String, Vec<PromptVariant>)>,
}

impl VariantCatalog {
    /// Build from already-parsed entries, validating ids and temperatures.
    pub fn from_entries(entries: Vec<(String, Vec<PromptVariant>)>) -> Result<Self> {
        let mut seen_agents = HashSet::new();
        for (agent, variants) in &entries {
            if !seen_agents.insert(agent.as_str()) {
                return Err(ParallaxError::Config(format!(
                    "agent '{agent}' appears twice in the variant catalog"
                )));
            }
            let mut ids = HashSet::new();
            for variant in variants {
                variant.validate().map_err(|e| {
                    ParallaxError::Config(format!("{agent}/{}: {e}", variant.variant_id))
                })?;
                if !ids.insert(variant.variant_id.as_str()) {
                    return Err(ParallaxError::Config(format!(
                        "variant id '{}' is duplicated for agent '{agent}'",
                        variant.variant_id
                    )));
                }
            }
        }
        Ok(Self { agents: entries })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let root: Map<String, Value> = serde_json::from_str(json)?;
        let mut entries = Vec::with_capacity(root.len());

        for (agent, body) in root {
            let variants = body
                .get("variants")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    ParallaxError::Config(format!(
                        "agent '{agent}' has no \"variants\" object"
                    ))
                })?;

            let mut parsed = Vec::with_capacity(variants.len());
            for (variant_id, value) in variants {
                let mut variant: PromptVariant =
                    serde_json::from_value(value.clone()).map_err(|e| {
                        ParallaxError::Config(format!("{agent}/{variant_id}: {e}"))
                    })?;
                variant.variant_id = variant_id.clone();
                parsed.push(variant);
            }
            entries.push((agent, parsed));
        }

        Self::from_entries(entries)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let catalog = Self::from_json_str(&contents)?;
        debug!(
            path = %path.display(),
            agents = catalog.agents.len(),
            "Loaded variant catalog"
        );
        Ok(catalog)
    }

    /// Variants for `agent_name`, in catalog order.
    pub fn variants_for(&self, agent_name: &str) -> Result<&[PromptVariant]> {
        self.agents
            .iter()
            .find(|(name, _)| name == agent_name)
            .map(|(_, variants)| variants.as_slice())
            .filter(|variants| !variants.is_empty())
            .ok_or_else(|| ParallaxError::UnknownAgent(agent_name.to_string()))
    }

    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
