//! Repeated-trial A/B testing of prompt variants.
//!
//! Variants run one after another in catalog order; the trials of one
//! variant run concurrently. Progress is published on a watch channel:
//!
//! ```text
//! Idle -> Running(v1) -> Scoring(v1) -> Running(v2) -> ... -> Ranking -> Done
//! ```

use chrono::{DateTime, Utc};
use parallax_agents::{Agent, LlmAgent};
use parallax_common::{
    AgentConfig, AgentInvocationResult, ErrorKind, ErrorRecord, InputPayload, ParallaxError,
    PromptVariant, Result,
};
use parallax_llm::LlmClient;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::VariantCatalog;
use crate::composite::{Candidate, CompositeWeights, select_winner};
use crate::scoring::{GroundTruth, ScoringEngine, VariantTrialMetrics};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TestPhase {
    Idle,
    Running {
        variant_id: String,
        completed: usize,
        total: usize,
    },
    Scoring {
        variant_id: String,
    },
    Ranking,
    Done,
}

/// Everything recorded for one variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantOutcome {
    pub variant: PromptVariant,
    /// The effective config the trials ran with.
    pub config: AgentConfig,
    pub metrics: VariantTrialMetrics,
    pub composite_score: f64,
    /// One record per requested iteration, in iteration order.
    pub trials: Vec<AgentInvocationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Winner {
    pub variant_id: String,
    pub variant_name: String,
    pub composite_score: f64,
    pub all_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ABTestResult {
    pub test_id: Uuid,
    pub agent_name: String,
    pub iterations: usize,
    pub started_at: DateTime<Utc>,
    /// Variant ids in the order they ran.
    pub variant_order: Vec<String>,
    pub results: BTreeMap<String, VariantOutcome>,
    pub winner: Winner,
    pub weights: CompositeWeights,
    #[serde(default)]
    pub cancelled: bool,
}

impl ABTestResult {
    /// Outcomes in run order.
    pub fn ordered(&self) -> impl Iterator<Item = &VariantOutcome> {
        self.variant_order.iter().filter_map(|id| self.results.get(id))
    }
}

/// One A/B test invocation.
#[derive(Debug, Clone)]
pub struct TestRequest {
    pub agent_name: String,
    pub payload: InputPayload,
    pub iterations: usize,
    pub ground_truth: Option<GroundTruth>,
}

impl TestRequest {
    pub fn new(agent_name: impl Into<String>, payload: InputPayload, iterations: usize) -> Self {
        Self {
            agent_name: agent_name.into(),
            payload,
            iterations,
            ground_truth: None,
        }
    }

    pub fn with_ground_truth(mut self, ground_truth: GroundTruth) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }
}

pub struct PromptTester {
    catalog: Arc<VariantCatalog>,
    base_configs: BTreeMap<String, AgentConfig>,
    client: Arc<dyn LlmClient>,
    scoring: ScoringEngine,
    weights: CompositeWeights,
    progress: watch::Sender<TestPhase>,
}

impl PromptTester {
    pub fn new(
        catalog: Arc<VariantCatalog>,
        base_configs: impl IntoIterator<Item = AgentConfig>,
        client: Arc<dyn LlmClient>,
    ) -> Self {
        let (progress, _) = watch::channel(TestPhase::Idle);
        Self {
            catalog,
            base_configs: base_configs
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
            client,
            scoring: ScoringEngine::default(),
            weights: CompositeWeights::default(),
            progress,
        }
    }

    pub fn with_scoring(mut self, scoring: ScoringEngine) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_weights(mut self, weights: CompositeWeights) -> Result<Self> {
        weights.validate()?;
        self.weights = weights;
        Ok(self)
    }

    pub fn subscribe(&self) -> watch::Receiver<TestPhase> {
        self.progress.subscribe()
    }

    pub async fn run(&self, request: TestRequest) -> Result<ABTestResult> {
        self.run_with_cancel(request, CancellationToken::new()).await
    }

    /// Run every variant of `request.agent_name`. Only configuration and
    /// authentication problems are returned as errors; every other failure
    /// is recorded in the trials.
    pub async fn run_with_cancel(
        &self,
        request: TestRequest,
        cancel: CancellationToken,
    ) -> Result<ABTestResult> {
        if request.iterations == 0 {
            return Err(ParallaxError::Config("iterations must be at least 1".into()));
        }
        request.payload.validate()?;

        let variants = self.catalog.variants_for(&request.agent_name)?;
        let base = self
            .base_configs
            .get(&request.agent_name)
            .ok_or_else(|| ParallaxError::UnknownAgent(request.agent_name.clone()))?;

        let configs = variants
            .iter()
            .map(|variant| {
                let config = base.with_variant(variant);
                config.validate().map(|_| config)
            })
            .collect::<Result<Vec<_>>>()?;

        let weights = self.weights.effective(
            request
                .ground_truth
                .as_ref()
                .is_some_and(|g| !g.is_empty()),
        );

        let test_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            test_id = %test_id,
            agent = %request.agent_name,
            variants = variants.len(),
            iterations = request.iterations,
            "Starting A/B test"
        );

        let mut results = BTreeMap::new();
        let mut variant_order = Vec::with_capacity(variants.len());
        let mut cancelled = false;

        for (variant, config) in variants.iter().zip(configs) {
            let trials = if cancelled {
                cancelled_trials(&config, request.iterations)
            } else {
                let (trials, was_cancelled) = self
                    .run_trials(&variant.variant_id, &config, &request, &cancel)
                    .await?;
                cancelled = was_cancelled;
                trials
            };

            self.progress.send_replace(TestPhase::Scoring {
                variant_id: variant.variant_id.clone(),
            });
            let metrics = self.scoring.score(&trials, request.ground_truth.as_ref());
            let composite_score = weights.composite_score(&metrics);

            info!(
                test_id = %test_id,
                variant = %variant.variant_id,
                success_rate = metrics.success_rate,
                consistency = metrics.consistency,
                composite = composite_score,
                "Variant scored"
            );

            variant_order.push(variant.variant_id.clone());
            results.insert(
                variant.variant_id.clone(),
                VariantOutcome {
                    variant: variant.clone(),
                    config,
                    metrics,
                    composite_score,
                    trials,
                },
            );
        }

        self.progress.send_replace(TestPhase::Ranking);
        let winner = rank(&variant_order, &results)?;
        info!(
            test_id = %test_id,
            winner = %winner.variant_id,
            composite = winner.composite_score,
            cancelled,
            "A/B test complete"
        );
        self.progress.send_replace(TestPhase::Done);

        Ok(ABTestResult {
            test_id,
            agent_name: request.agent_name,
            iterations: request.iterations,
            started_at,
            variant_order,
            results,
            winner,
            weights,
            cancelled,
        })
    }

    /// Run all iterations of one variant concurrently. Returns the trials in
    /// iteration order and whether cancellation cut the batch short.
    async fn run_trials(
        &self,
        variant_id: &str,
        config: &AgentConfig,
        request: &TestRequest,
        cancel: &CancellationToken,
    ) -> Result<(Vec<AgentInvocationResult>, bool)> {
        let total = request.iterations;
        self.progress.send_replace(TestPhase::Running {
            variant_id: variant_id.to_string(),
            completed: 0,
            total,
        });

        let agent = Arc::new(LlmAgent::new(config.clone(), self.client.clone())?);
        let mut set = JoinSet::new();
        for iteration in 0..total {
            let agent = agent.clone();
            let payload = request.payload.clone();
            set.spawn(async move { (iteration, agent.run(&payload).await) });
        }

        let mut slots: Vec<Option<AgentInvocationResult>> = vec![None; total];
        let mut completed = 0;
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    set.abort_all();
                    cancelled = true;
                    warn!(variant = %variant_id, completed, total, "Trials cancelled");
                    break;
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(joined) => {
                        let recorded =
                            self.record_trial(variant_id, joined, &mut slots, &mut completed);
                        if let Err(e) = recorded {
                            set.abort_all();
                            return Err(e);
                        }
                    }
                },
            }
        }

        // Trials that finished before the abort landed keep their results.
        while let Some(joined) = set.join_next().await {
            if let Err(e) = self.record_trial(variant_id, joined, &mut slots, &mut completed) {
                set.abort_all();
                return Err(e);
            }
        }

        let trials = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    if cancelled {
                        AgentInvocationResult::cancelled(&config.name, &config.model_id)
                    } else {
                        AgentInvocationResult::failed_with(
                            &config.name,
                            &config.model_id,
                            ErrorRecord::new(ErrorKind::Backend, "trial task aborted"),
                        )
                    }
                })
            })
            .collect();

        Ok((trials, cancelled))
    }

    /// Store one joined trial in its iteration slot. An authentication
    /// failure is returned as an error.
    fn record_trial(
        &self,
        variant_id: &str,
        joined: std::result::Result<(usize, AgentInvocationResult), JoinError>,
        slots: &mut [Option<AgentInvocationResult>],
        completed: &mut usize,
    ) -> Result<()> {
        let (iteration, trial) = match joined {
            Ok(done) => done,
            Err(e) if e.is_cancelled() => return Ok(()),
            Err(e) => {
                error!(variant = %variant_id, error = %e, "Trial task failed to join");
                return Ok(());
            }
        };

        if trial.error_kind() == Some(ErrorKind::Auth) {
            let message = trial.error.map(|e| e.message).unwrap_or_default();
            error!(variant = %variant_id, "Authentication failed; aborting test");
            return Err(ParallaxError::Auth(message));
        }
        debug!(
            variant = %variant_id,
            iteration,
            success = trial.success,
            "Trial finished"
        );
        slots[iteration] = Some(trial);
        *completed += 1;
        self.progress.send_replace(TestPhase::Running {
            variant_id: variant_id.to_string(),
            completed: *completed,
            total: slots.len(),
        });
        Ok(())
    }
}

fn cancelled_trials(config: &AgentConfig, iterations: usize) -> Vec<AgentInvocationResult> {
    (0..iterations)
        .map(|_| AgentInvocationResult::cancelled(&config.name, &config.model_id))
        .collect()
}

fn rank(order: &[String], results: &BTreeMap<String, VariantOutcome>) -> Result<Winner> {
    let outcomes: Vec<&VariantOutcome> = order.iter().filter_map(|id| results.get(id)).collect();
    let candidates: Vec<Candidate> = outcomes
        .iter()
        .map(|o| Candidate {
            composite: o.composite_score,
            avg_execution_time: o.metrics.avg_execution_time,
        })
        .collect();

    let idx = select_winner(&candidates)
        .ok_or_else(|| ParallaxError::Config("no variants to rank".into()))?;
    let best = outcomes[idx];

    Ok(Winner {
        variant_id: best.variant.variant_id.clone(),
        variant_name: best.variant.name.clone(),
        composite_score: best.composite_score,
        all_scores: outcomes
            .iter()
            .map(|o| (o.variant.variant_id.clone(), o.composite_score))
            .collect(),
    })
}
