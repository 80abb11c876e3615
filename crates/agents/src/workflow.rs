//! Two-phase analysis workflow.
//!
//! Phase 1 fans the payload out to every analyst concurrently. Phase 2 hands
//! the successful analyses to a synthesis agent which produces the final
//! brief. Individual analyst failures are recorded but do not fail the run;
//! only a synthesis failure, an empty Phase 1 or cancellation does.
//!
//! ```ignore
//! let engine = WorkflowEngine::new(analysts, synthesizer)?;
//! let result = engine.run(&payload).await;
//! ```

use chrono::{DateTime, Utc};
use parallax_common::{
    AgentConfig, AgentInvocationResult, ErrorKind, ErrorRecord, InputPayload, ParallaxError,
    Result,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::Agent;
use crate::parser::display_label;

/// Outcome of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// True iff synthesis completed successfully.
    pub success: bool,
    /// Every analyst, keyed by name, successful or not.
    pub phase1_results: BTreeMap<String, AgentInvocationResult>,
    /// The synthesis call, when Phase 2 ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<AgentInvocationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_brief: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Wall-clock seconds for the whole run.
    pub execution_time: f64,
    #[serde(default)]
    pub cancelled: bool,
}

impl WorkflowResult {
    pub fn successful_agents(&self) -> impl Iterator<Item = &str> {
        self.phase1_results
            .iter()
            .filter(|(_, r)| r.success)
            .map(|(name, _)| name.as_str())
    }

    pub fn failed_agents(&self) -> impl Iterator<Item = &str> {
        self.phase1_results
            .iter()
            .filter(|(_, r)| !r.success)
            .map(|(name, _)| name.as_str())
    }
}

pub struct WorkflowEngine {
    analysts: Vec<Arc<dyn Agent>>,
    synthesizer: Arc<dyn Agent>,
}

impl WorkflowEngine {
    pub fn new(analysts: Vec<Arc<dyn Agent>>, synthesizer: Arc<dyn Agent>) -> Result<Self> {
        if analysts.is_empty() {
            return Err(ParallaxError::Config(
                "workflow needs at least one analyst".into(),
            ));
        }
        let mut names = HashSet::new();
        for agent in &analysts {
            if !names.insert(agent.name().to_string()) {
                return Err(ParallaxError::Config(format!(
                    "analyst '{}' is configured twice",
                    agent.name()
                )));
            }
        }
        Ok(Self {
            analysts,
            synthesizer,
        })
    }

    pub fn analyst_names(&self) -> impl Iterator<Item = &str> {
        self.analysts.iter().map(|a| a.name())
    }

    pub fn synthesizer_name(&self) -> &str {
        self.synthesizer.name()
    }

    pub async fn run(&self, payload: &InputPayload) -> WorkflowResult {
        self.run_with_cancel(payload, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        payload: &InputPayload,
        cancel: CancellationToken,
    ) -> WorkflowResult {
        let started = Instant::now();
        let mut result = WorkflowResult {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            success: false,
            phase1_results: BTreeMap::new(),
            synthesis: None,
            final_brief: None,
            error: None,
            execution_time: 0.0,
            cancelled: false,
        };

        info!(
            run_id = %result.run_id,
            analysts = self.analysts.len(),
            synthesizer = %self.synthesizer.name(),
            "Starting analysis workflow"
        );

        if let Err(e) = payload.validate() {
            result.error = Some(e.to_record());
            result.execution_time = started.elapsed().as_secs_f64();
            return result;
        }

        // Phase 1
        let (phase1, cancelled) = self.run_analysts(payload, &cancel).await;
        result.phase1_results = phase1;

        let succeeded = result.phase1_results.values().filter(|r| r.success).count();
        info!(
            run_id = %result.run_id,
            succeeded,
            failed = result.phase1_results.len() - succeeded,
            "Phase 1 complete"
        );

        if cancelled {
            warn!(run_id = %result.run_id, "Workflow cancelled during phase 1");
            return finish_cancelled(result, started);
        }

        if succeeded == 0 {
            error!(run_id = %result.run_id, "Every analyst failed; skipping synthesis");
            result.error = Some(ErrorRecord::new(
                ErrorKind::NoUsableInput,
                "no analyst produced usable output",
            ));
            result.execution_time = started.elapsed().as_secs_f64();
            return result;
        }

        // Phase 2
        let synthesis_payload = match self.synthesis_payload(payload, &result.phase1_results) {
            Ok(p) => p,
            Err(e) => {
                result.error = Some(e.to_record());
                result.execution_time = started.elapsed().as_secs_f64();
                return result;
            }
        };

        let synthesis = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = self.synthesizer.run(&synthesis_payload) => Some(r),
        };

        let Some(synthesis) = synthesis else {
            warn!(run_id = %result.run_id, "Workflow cancelled during synthesis");
            result.synthesis = Some(AgentInvocationResult::cancelled(
                self.synthesizer.name(),
                &self.synthesizer.config().model_id,
            ));
            return finish_cancelled(result, started);
        };

        if synthesis.success {
            result.success = true;
            result.final_brief = synthesis.output.clone();
        } else {
            error!(
                run_id = %result.run_id,
                kind = ?synthesis.error_kind(),
                "Synthesis failed"
            );
            result.error = synthesis.error.clone();
        }
        result.synthesis = Some(synthesis);
        result.execution_time = started.elapsed().as_secs_f64();

        info!(
            run_id = %result.run_id,
            success = result.success,
            execution_time = result.execution_time,
            "Workflow completed"
        );
        result
    }

    /// Run every analyst concurrently. The flag reports whether the run was
    /// cancelled before all of them finished.
    async fn run_analysts(
        &self,
        payload: &InputPayload,
        cancel: &CancellationToken,
    ) -> (BTreeMap<String, AgentInvocationResult>, bool) {
        let mut set = JoinSet::new();
        for agent in &self.analysts {
            let agent = agent.clone();
            let payload = payload.clone();
            set.spawn(async move {
                let result = agent.run(&payload).await;
                (agent.name().to_string(), result)
            });
        }

        let mut results = BTreeMap::new();
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    set.abort_all();
                    cancelled = true;
                    break;
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(joined) => record_analyst(&mut results, joined),
                },
            }
        }

        // Analysts that finished before the abort landed keep their results.
        while let Some(joined) = set.join_next().await {
            record_analyst(&mut results, joined);
        }

        for agent in &self.analysts {
            let model = &agent.config().model_id;
            results.entry(agent.name().to_string()).or_insert_with(|| {
                if cancelled {
                    AgentInvocationResult::cancelled(agent.name(), model)
                } else {
                    AgentInvocationResult::failed_with(
                        agent.name(),
                        model,
                        ErrorRecord::new(ErrorKind::Backend, "analyst task aborted"),
                    )
                }
            });
        }

        (results, cancelled)
    }

    fn synthesis_payload(
        &self,
        original: &InputPayload,
        phase1: &BTreeMap<String, AgentInvocationResult>,
    ) -> Result<InputPayload> {
        let ordered = self
            .analysts
            .iter()
            .filter_map(|a| phase1.get(a.name()).map(|r| (a.config(), r)));
        let document = render_analyses(ordered);
        let payload = InputPayload::new(document)?;
        Ok(match &original.context {
            Some(context) => payload.with_context(context.clone()),
            None => payload,
        })
    }
}

fn record_analyst(
    results: &mut BTreeMap<String, AgentInvocationResult>,
    joined: std::result::Result<(String, AgentInvocationResult), JoinError>,
) {
    match joined {
        Ok((name, r)) => {
            debug!(agent = %name, success = r.success, "Analyst finished");
            results.insert(name, r);
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!(error = %e, "Analyst task failed to join"),
    }
}

fn finish_cancelled(mut result: WorkflowResult, started: Instant) -> WorkflowResult {
    result.cancelled = true;
    result.success = false;
    result.final_brief = None;
    result.error = Some(ErrorRecord::new(
        ErrorKind::Cancelled,
        "workflow cancelled before synthesis completed",
    ));
    result.execution_time = started.elapsed().as_secs_f64();
    result
}

/// Concatenate successful analyses, one heading per agent, fields in the
/// agent's declared order. Failed agents are skipped.
pub fn render_analyses<'a, I>(analyses: I) -> String
where
    I: IntoIterator<Item = (&'a AgentConfig, &'a AgentInvocationResult)>,
{
    let mut sections = Vec::new();
    for (config, result) in analyses {
        if !result.success {
            continue;
        }
        let mut section = format!("## {}\n", display_label(&config.name));
        let mut wrote_field = false;
        for field in &config.output_fields {
            if let Some(value) = result.field(field) {
                section.push_str(&format!("{}: {}\n", display_label(field), value));
                wrote_field = true;
            }
        }
        if !wrote_field {
            section.push_str(result.raw_response.trim());
            section.push('\n');
        }
        sections.push(section);
    }
    sections.join("\n")
}
