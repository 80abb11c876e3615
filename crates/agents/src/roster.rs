//! Built-in analyst roster used when no settings file overrides it.

use parallax_common::AgentConfig;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

pub const STRATEGIC_ANALYST: &str = "strategic_analyst";
pub const AUDIENCE_EVALUATOR: &str = "audience_evaluator";
pub const SKEPTICAL_BUYER: &str = "skeptical_buyer";
pub const BRIEF_SYNTHESIZER: &str = "brief_synthesizer";

const STRATEGIC_ANALYST_PROMPT: &str = r#"You are a senior marketing strategist reviewing a marketing document.

Evaluate positioning, differentiation and competitive advantage. Be specific:
quote the document, name the audience segment, and quantify claims where the
document allows it. Recommend concrete changes rather than general advice.
"#;

const AUDIENCE_EVALUATOR_PROMPT: &str = r#"You are the document's intended customer reading it for the first time.

Report your honest first impression, whether the message is clear within a
few seconds, and what makes you trust or distrust it. Speak in the first
person and refer to exact phrases from the document.
"#;

const SKEPTICAL_BUYER_PROMPT: &str = r#"You are a skeptical buyer who has been burned by overhyped products before.

Hunt for red flags, vague or unverifiable claims, and questions the document
leaves unanswered. Judge whether the offer reduces your risk (guarantees,
trials, proof) and say what would change your mind.
"#;

const BRIEF_SYNTHESIZER_PROMPT: &str = r#"You are an editor combining several expert reviews of one marketing document into a single brief.

Reconcile agreements and disagreements between the reviewers, keep only
insights supported by at least one review, and order recommendations by
expected impact. Be concise and actionable.
"#;

pub fn strategic_analyst(model_id: &str) -> AgentConfig {
    AgentConfig::new(STRATEGIC_ANALYST, model_id, STRATEGIC_ANALYST_PROMPT)
        .with_temperature(0.3)
        .with_max_tokens(1500)
        .with_output_fields(["strategic_assessment", "key_strength", "key_weakness"])
}

pub fn audience_evaluator(model_id: &str) -> AgentConfig {
    AgentConfig::new(AUDIENCE_EVALUATOR, model_id, AUDIENCE_EVALUATOR_PROMPT)
        .with_temperature(0.6)
        .with_max_tokens(1200)
        .with_output_fields(["first_impression", "clarity", "trust_factors"])
}

pub fn skeptical_buyer(model_id: &str) -> AgentConfig {
    AgentConfig::new(SKEPTICAL_BUYER, model_id, SKEPTICAL_BUYER_PROMPT)
        .with_temperature(0.5)
        .with_max_tokens(1200)
        .with_output_fields(["red_flags", "unanswered_questions", "risk_reversal"])
}

pub fn brief_synthesizer(model_id: &str) -> AgentConfig {
    AgentConfig::new(BRIEF_SYNTHESIZER, model_id, BRIEF_SYNTHESIZER_PROMPT)
        .with_temperature(0.2)
        .with_max_tokens(2000)
        .with_output_fields(["executive_summary", "priority_actions", "overall_assessment"])
}

/// Phase-1 analysts in their default order.
pub fn default_analysts(model_id: &str) -> Vec<AgentConfig> {
    vec![
        strategic_analyst(model_id),
        audience_evaluator(model_id),
        skeptical_buyer(model_id),
    ]
}

/// Look up a built-in config by role name.
pub fn builtin(name: &str, model_id: &str) -> Option<AgentConfig> {
    match name {
        STRATEGIC_ANALYST => Some(strategic_analyst(model_id)),
        AUDIENCE_EVALUATOR => Some(audience_evaluator(model_id)),
        SKEPTICAL_BUYER => Some(skeptical_buyer(model_id)),
        BRIEF_SYNTHESIZER => Some(brief_synthesizer(model_id)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_configs_validate() {
        for name in [
            STRATEGIC_ANALYST,
            AUDIENCE_EVALUATOR,
            SKEPTICAL_BUYER,
            BRIEF_SYNTHESIZER,
        ] {
            let config = builtin(name, DEFAULT_MODEL).unwrap();
            config.validate().unwrap();
            assert_eq!(config.name, name);
            assert_eq!(config.output_fields.len(), 3);
        }
    }

    #[test]
    fn unknown_role_is_none() {
        assert!(builtin("copywriter", DEFAULT_MODEL).is_none());
    }

    #[test]
    fn default_analyst_order() {
        let names: Vec<_> = default_analysts("m").into_iter().map(|c| c.name).collect();
        assert_eq!(names, [STRATEGIC_ANALYST, AUDIENCE_EVALUATOR, SKEPTICAL_BUYER]);
    }
}
