//! Subcommand bodies, kept out of `main` so they can run against a test
//! client.

use anyhow::Context;
use parallax_agents::WorkflowResult;
use parallax_common::InputPayload;
use parallax_experiments::{ABTestResult, GroundTruth, TestPhase, TestRequest};
use parallax_llm::LlmClient;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::report::{render_brief, render_test_report};
use crate::settings::Settings;
use crate::store::{ResultStore, SavedRun};

pub struct AnalysisOutcome {
    pub result: WorkflowResult,
    pub brief: String,
    pub saved: SavedRun,
}

#[derive(Debug)]
pub struct TestOutcome {
    pub result: ABTestResult,
    pub report: String,
    pub saved: SavedRun,
}

/// Build a payload from a document file and optional inline context.
pub fn load_payload(document: &Path, context: Option<&str>) -> anyhow::Result<InputPayload> {
    let text = std::fs::read_to_string(document)
        .with_context(|| format!("Failed to read document '{}'", document.display()))?;
    let payload = InputPayload::new(text)
        .with_context(|| format!("Document '{}' is empty", document.display()))?;
    Ok(match context {
        Some(context) => payload.with_context(context),
        None => payload,
    })
}

/// Ground truth is a JSON object of output field to reference text.
pub fn load_ground_truth(path: &Path) -> anyhow::Result<GroundTruth> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ground truth '{}'", path.display()))?;
    let truth: GroundTruth = serde_json::from_str(&content)
        .with_context(|| format!("Ground truth '{}' must be a JSON object of strings", path.display()))?;
    Ok(truth)
}

/// Run the analysis workflow and save it, even when it failed or was
/// cancelled.
pub async fn analyze(
    settings: &Settings,
    client: Arc<dyn LlmClient>,
    payload: &InputPayload,
    cancel: CancellationToken,
) -> anyhow::Result<AnalysisOutcome> {
    let engine = settings.build_engine(client)?;
    let result = engine.run_with_cancel(payload, cancel).await;

    let analysts = settings
        .analysts
        .iter()
        .map(|name| settings.agent_config(name))
        .collect::<Result<Vec<_>, _>>()?;
    let synthesizer = settings.agent_config(&settings.synthesizer)?;
    let brief = render_brief(&result, &analysts, &synthesizer);

    let store = ResultStore::new(&settings.output_dir);
    let saved = store.save_analysis(&result, &brief)?;
    Ok(AnalysisOutcome {
        result,
        brief,
        saved,
    })
}

/// Run an A/B test over every catalog variant of `request.agent_name`.
pub async fn ab_test(
    settings: &Settings,
    client: Arc<dyn LlmClient>,
    request: TestRequest,
    cancel: CancellationToken,
) -> anyhow::Result<TestOutcome> {
    let catalog = Arc::new(settings.load_catalog()?);
    let tester = settings.build_tester(catalog, client)?;

    let mut progress = tester.subscribe();
    let progress_log = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let phase = progress.borrow_and_update().clone();
            match &phase {
                TestPhase::Running {
                    variant_id,
                    completed,
                    total,
                } => debug!(variant = %variant_id, completed, total, "Trials running"),
                TestPhase::Done => break,
                other => debug!(phase = ?other, "Test progress"),
            }
        }
    });

    let outcome = tester.run_with_cancel(request, cancel).await;
    progress_log.abort();
    let result = outcome.context("A/B test aborted")?;

    if result.cancelled {
        warn!(test_id = %result.test_id, "Saving partial A/B test results");
    }
    let report = render_test_report(&result);
    let store = ResultStore::new(&settings.output_dir);
    let saved = store.save_test(&result, &report)?;
    info!(winner = %result.winner.variant_id, "A/B test saved");

    Ok(TestOutcome {
        result,
        report,
        saved,
    })
}
