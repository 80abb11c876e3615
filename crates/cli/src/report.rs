//! Plain-text renderings of analysis briefs and A/B test reports.

use parallax_agents::{WorkflowResult, display_label};
use parallax_common::{AgentConfig, AgentInvocationResult};
use parallax_experiments::ABTestResult;
use std::fmt::Write;

const RULE: &str = "==========================================================";

/// Render a workflow result. Brief fields follow the synthesizer's declared
/// order and agent insights follow the analyst order.
pub fn render_brief(
    result: &WorkflowResult,
    analysts: &[AgentConfig],
    synthesizer: &AgentConfig,
) -> String {
    let mut out = String::new();
    let status = if result.cancelled {
        "CANCELLED"
    } else if result.success {
        "COMPLETE"
    } else {
        "FAILED"
    };

    let _ = writeln!(out, "PARALLAX ANALYSIS BRIEF");
    let _ = writeln!(out, "Run:      {}", result.run_id);
    let _ = writeln!(out, "Started:  {}", result.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "Status:   {status}");
    let _ = writeln!(out, "Duration: {:.1}s", result.execution_time);
    if let Some(error) = &result.error {
        let _ = writeln!(out, "Error:    {}", error.message);
    }
    let _ = writeln!(out, "{RULE}");

    if let Some(synthesis) = result.synthesis.as_ref().filter(|s| s.success) {
        out.push('\n');
        write_fields(&mut out, synthesis, &synthesizer.output_fields);
    }

    let _ = writeln!(out, "\nAGENT INSIGHTS\n{RULE}");
    for config in analysts {
        let Some(agent_result) = result.phase1_results.get(&config.name) else {
            continue;
        };
        if !agent_result.success {
            continue;
        }
        let _ = writeln!(out, "\n--- {} ---", display_label(&config.name));
        write_fields(&mut out, agent_result, &config.output_fields);
    }

    let failures: Vec<_> = result
        .phase1_results
        .values()
        .filter(|r| !r.success)
        .collect();
    if !failures.is_empty() {
        let _ = writeln!(out, "\nFAILED AGENTS\n{RULE}");
        for failed in failures {
            let message = failed
                .error
                .as_ref()
                .map(|e| e.message.as_str())
                .unwrap_or("unknown error");
            let _ = writeln!(out, "- {}: {message}", failed.agent);
        }
    }

    out
}

/// Declared fields in order, or the raw response when none were parsed.
fn write_fields(out: &mut String, result: &AgentInvocationResult, fields: &[String]) {
    let mut wrote_any = false;
    for field in fields {
        if let Some(value) = result.field(field) {
            let _ = writeln!(out, "{}\n{}\n", display_label(field), value.trim());
            wrote_any = true;
        }
    }
    if !wrote_any {
        let _ = writeln!(out, "{}\n", result.raw_response.trim());
    }
}

pub fn render_test_report(result: &ABTestResult) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "PROMPT A/B TEST REPORT");
    let _ = writeln!(out, "Test:       {}", result.test_id);
    let _ = writeln!(out, "Agent:      {}", result.agent_name);
    let _ = writeln!(out, "Iterations: {}", result.iterations);
    let _ = writeln!(out, "Started:    {}", result.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if result.cancelled {
        let _ = writeln!(out, "Note:       cancelled before every trial finished");
    }
    let _ = writeln!(out, "{RULE}\n");

    let _ = writeln!(
        out,
        "{:<12} {:>9} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "VARIANT", "COMPOSITE", "CONSIST", "SPECIF", "ACTION", "TECH", "AVG(s)", "SUCCESS", "TRUTH"
    );
    for outcome in result.ordered() {
        let m = &outcome.metrics;
        let truth = m
            .ground_truth_score
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<12} {:>9.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.2} {:>7.0}% {:>8}",
            outcome.variant.variant_id,
            outcome.composite_score,
            m.consistency,
            m.specificity_score,
            m.actionability_score,
            m.technical_density,
            m.avg_execution_time,
            m.success_rate * 100.0,
            truth
        );
    }

    let winner = &result.winner;
    let _ = writeln!(
        out,
        "\nWINNER: {} ({}) with composite {:.3}",
        winner.variant_id, winner.variant_name, winner.composite_score
    );
    if let Some(outcome) = result.results.get(&winner.variant_id) {
        if !outcome.variant.hypothesis.is_empty() {
            let _ = writeln!(out, "Hypothesis: {}", outcome.variant.hypothesis);
        }
        if !outcome.variant.expected_performance.is_empty() {
            let _ = writeln!(out, "Expected:   {}", outcome.variant.expected_performance);
        }
    }

    let _ = writeln!(out, "\nVARIANTS\n{RULE}");
    for outcome in result.ordered() {
        let variant = &outcome.variant;
        let _ = writeln!(
            out,
            "\n{} - {} (temperature {:.2})",
            variant.variant_id, variant.name, variant.temperature
        );
        let failed: Vec<_> = outcome.trials.iter().filter(|t| !t.success).collect();
        if !failed.is_empty() {
            let _ = writeln!(out, "  {} of {} trials failed:", failed.len(), outcome.trials.len());
            for trial in failed {
                let message = trial
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("unknown error");
                let _ = writeln!(out, "  - {message}");
            }
        }
    }

    out
}
