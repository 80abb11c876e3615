//! `parallax.toml` settings.
//!
//! ```toml
//! model = "claude-sonnet-4-20250514"
//! analysts = ["strategic_analyst", "audience_evaluator", "skeptical_buyer"]
//! synthesizer = "brief_synthesizer"
//! variants_path = "config/prompt_variants.json"
//! output_dir = "outputs"
//!
//! [llm]
//! provider = "anthropic"
//! max_concurrent_requests = 2
//!
//! [agents.skeptical_buyer]
//! model_id = "claude-sonnet-4-20250514"
//! system_prompt = "..."
//! output_fields = ["red_flags", "unanswered_questions"]
//!
//! [weights]
//! consistency = 0.5
//! specificity = 0.5
//! actionability = 0.0
//! technical_density = 0.0
//! speed = 0.0
//! ```
//!
//! Agents not listed under `[agents]` come from the built-in roster.

use anyhow::{Context, bail};
use parallax_agents::roster::{self, DEFAULT_MODEL};
use parallax_agents::{Agent, LlmAgent, WorkflowEngine};
use parallax_common::{AgentConfig, ParallaxError};
use parallax_experiments::{
    CompositeWeights, PromptTester, ScoringEngine, ScoringLexicon, VariantCatalog,
};
use parallax_llm::{LlmClient, LlmConfig, build_llm_client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_SETTINGS_PATH: &str = "config/parallax.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Model used for built-in roster agents.
    pub model: String,
    pub llm: LlmConfig,
    /// Per-agent overrides keyed by role name.
    pub agents: BTreeMap<String, AgentConfig>,
    /// Phase-1 analysts in run order.
    pub analysts: Vec<String>,
    pub synthesizer: String,
    pub variants_path: PathBuf,
    pub output_dir: PathBuf,
    pub scoring: ScoringLexicon,
    pub weights: CompositeWeights,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            llm: LlmConfig::default(),
            agents: BTreeMap::new(),
            analysts: roster::default_analysts(DEFAULT_MODEL)
                .into_iter()
                .map(|c| c.name)
                .collect(),
            synthesizer: roster::BRIEF_SYNTHESIZER.to_string(),
            variants_path: PathBuf::from("config/prompt_variants.json"),
            output_dir: PathBuf::from("outputs"),
            scoring: ScoringLexicon::default(),
            weights: CompositeWeights::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when the file
    /// does not exist.
    ///
    /// On Unix the file must be a regular file, must not be world-writable,
    /// and must not be world-readable if it holds an API key.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "Settings file not found, using built-in roster");
            return Ok(Self::default());
        }

        #[cfg(unix)]
        validate_file_permissions(path)?;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings '{}'", path.display()))?;
        let settings = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid settings in '{}'", path.display()))?;

        if settings.llm.api_key.is_some() {
            warn!(
                "API key found in settings file '{}'. Prefer ANTHROPIC_API_KEY or \
                 OPENAI_API_KEY in the environment or a .env file.",
                path.display()
            );
        }

        info!(
            path = %path.display(),
            analysts = settings.analysts.len(),
            overrides = settings.agents.len(),
            "Loaded settings"
        );
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut settings: Self = toml::from_str(content)?;
        for (name, config) in settings.agents.iter_mut() {
            if config.name.is_empty() {
                config.name = name.clone();
            } else if config.name != *name {
                bail!(
                    "agents.{name} declares a different name '{}'",
                    config.name
                );
            }
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.validate()?;
        self.weights.validate()?;
        if self.analysts.is_empty() {
            bail!("at least one analyst must be configured");
        }
        for name in self.analysts.iter().chain(std::iter::once(&self.synthesizer)) {
            self.agent_config(name)?.validate()?;
        }
        for config in self.agents.values() {
            config.validate()?;
        }
        Ok(())
    }

    /// Resolve an agent: an explicit `[agents.<name>]` table wins over the
    /// built-in roster.
    pub fn agent_config(&self, name: &str) -> Result<AgentConfig, ParallaxError> {
        self.agents
            .get(name)
            .cloned()
            .or_else(|| roster::builtin(name, &self.model))
            .ok_or_else(|| ParallaxError::UnknownAgent(name.to_string()))
    }

    /// Every agent a test may target: the built-in roster merged with
    /// the configured overrides.
    pub fn agent_configs(&self) -> Vec<AgentConfig> {
        let mut all: BTreeMap<String, AgentConfig> = roster::default_analysts(&self.model)
            .into_iter()
            .chain(std::iter::once(roster::brief_synthesizer(&self.model)))
            .map(|c| (c.name.clone(), c))
            .collect();
        for (name, config) in &self.agents {
            all.insert(name.clone(), config.clone());
        }
        all.into_values().collect()
    }

    pub fn build_client(&self) -> anyhow::Result<Arc<dyn LlmClient>> {
        build_llm_client(&self.llm).context("Failed to build the model client")
    }

    pub fn build_engine(&self, client: Arc<dyn LlmClient>) -> anyhow::Result<WorkflowEngine> {
        let analysts = self
            .analysts
            .iter()
            .map(|name| -> Result<Arc<dyn Agent>, ParallaxError> {
                let agent = LlmAgent::new(self.agent_config(name)?, client.clone())?;
                Ok(Arc::new(agent) as Arc<dyn Agent>)
            })
            .collect::<Result<Vec<_>, ParallaxError>>()?;
        let synthesizer = LlmAgent::new(self.agent_config(&self.synthesizer)?, client)?;
        Ok(WorkflowEngine::new(analysts, Arc::new(synthesizer))?)
    }

    pub fn load_catalog(&self) -> anyhow::Result<VariantCatalog> {
        VariantCatalog::from_file(&self.variants_path).with_context(|| {
            format!(
                "Failed to load prompt variants from '{}'",
                self.variants_path.display()
            )
        })
    }

    pub fn build_tester(
        &self,
        catalog: Arc<VariantCatalog>,
        client: Arc<dyn LlmClient>,
    ) -> anyhow::Result<PromptTester> {
        let tester = PromptTester::new(catalog, self.agent_configs(), client)
            .with_scoring(ScoringEngine::new(self.scoring.clone()))
            .with_weights(self.weights.clone())?;
        Ok(tester)
    }
}

#[cfg(unix)]
fn validate_file_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::symlink_metadata(path)
        .with_context(|| format!("Failed to read settings file '{}'", path.display()))?;

    if !metadata.is_file() {
        bail!(
            "Settings path '{}' is not a regular file. Symlinks and directories are not allowed.",
            path.display()
        );
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        bail!(
            "Settings file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path).unwrap_or_default();
    let has_api_key = content
        .lines()
        .map(str::trim_start)
        .any(|line| line.starts_with("api_key"));

    if has_api_key && permission_bits & 0o004 != 0 {
        bail!(
            "Settings file '{}' contains an API key but is world-readable (mode {:04o}). \
             Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_api_key && permission_bits & 0o040 != 0 {
        warn!(
            "Settings file '{}' contains an API key and is group-readable (mode {:04o}). \
             Consider: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_use_builtin_roster() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(
            settings.analysts,
            [
                roster::STRATEGIC_ANALYST,
                roster::AUDIENCE_EVALUATOR,
                roster::SKEPTICAL_BUYER
            ]
        );
        assert_eq!(settings.agent_configs().len(), 4);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.synthesizer, roster::BRIEF_SYNTHESIZER);
    }

    #[test]
    fn agent_table_overrides_roster_and_takes_key_as_name() {
        let settings = Settings::from_toml_str(
            r#"
            analysts = ["strategic_analyst", "pricing_critic"]

            [agents.pricing_critic]
            model_id = "gpt-4o-mini"
            temperature = 0.4
            system_prompt = "Critique the pricing."
            output_fields = ["price_anchor", "objections"]
            "#,
        )
        .unwrap();

        let critic = settings.agent_config("pricing_critic").unwrap();
        assert_eq!(critic.name, "pricing_critic");
        assert_eq!(critic.output_fields, ["price_anchor", "objections"]);
        assert_eq!(
            settings.agent_config(roster::STRATEGIC_ANALYST).unwrap().model_id,
            DEFAULT_MODEL
        );
        assert!(
            settings
                .agent_configs()
                .iter()
                .any(|c| c.name == "pricing_critic")
        );
    }

    #[test]
    fn unknown_analyst_is_rejected() {
        let err = Settings::from_toml_str(r#"analysts = ["ghost"]"#).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn bad_weights_are_rejected() {
        let err = Settings::from_toml_str("[weights]\nconsistency = 0.9\n").unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn mismatched_agent_name_is_rejected() {
        let toml = r#"
            [agents.skeptical_buyer]
            name = "someone_else"
            model_id = "m"
            system_prompt = "p"
        "#;
        assert!(Settings::from_toml_str(toml).is_err());
    }

    #[test]
    fn loads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "output_dir = \"runs\"\n[llm]\nmax_concurrent_requests = 4").unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.output_dir, PathBuf::from("runs"));
        assert_eq!(settings.llm.max_concurrent_requests, 4);
        assert_eq!(settings.llm.provider, "anthropic");
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_file_with_key_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[llm]\napi_key = \"sk-test\"").unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = Settings::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("world-readable"));

        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600)).unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.llm.api_key.as_deref(), Some("sk-test"));
    }
}
