//! Text-quality metrics over a batch of same-variant trials.
//!
//! Every metric is a pure function of the trial records, so scoring the same
//! batch twice yields identical numbers. Scored text is each trial's raw
//! response.
//!
//! The three lexical scores share one shape: count hits, divide by the word
//! count, then divide by a saturation density and cap at 1.0. A response at
//! or above the saturation density scores 1.0.

use parallax_common::AgentInvocationResult;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

static WORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}'%$]*").unwrap());

/// Numbers, money, percentages, multipliers and durations.
static QUANTITATIVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$?\d[\d,]*(?:\.\d+)?\s*(?:%|percent|x\b|k\b|m\b|days?\b|weeks?\b|months?\b|hours?\b)?")
        .unwrap()
});

/// Reference answers keyed by output field.
pub type GroundTruth = BTreeMap<String, String>;

/// Word lists and saturation densities for the lexical scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringLexicon {
    pub action_verbs: Vec<String>,
    pub technical_terms: Vec<String>,
    /// Quantitative tokens per word that scores 1.0.
    pub specificity_saturation: f64,
    /// Action verbs per word that scores 1.0.
    pub actionability_saturation: f64,
    /// Domain terms per word that scores 1.0.
    pub technical_saturation: f64,
}

const DEFAULT_ACTION_VERBS: &[&str] = &[
    "add", "address", "change", "clarify", "consider", "create", "cut", "emphasize", "feature",
    "focus", "highlight", "implement", "include", "increase", "launch", "lead", "measure",
    "move", "offer", "optimize", "prioritize", "quantify", "reduce", "remove", "replace",
    "rewrite", "shorten", "show", "simplify", "start", "stop", "strengthen", "test", "track",
    "update", "use",
];

const DEFAULT_TECHNICAL_TERMS: &[&str] = &[
    "acquisition",
    "benchmark",
    "brand",
    "cac",
    "call to action",
    "churn",
    "competitive advantage",
    "conversion",
    "cta",
    "differentiation",
    "engagement",
    "funnel",
    "guarantee",
    "headline",
    "kpi",
    "landing page",
    "ltv",
    "messaging",
    "objection",
    "onboarding",
    "persona",
    "positioning",
    "pricing",
    "retention",
    "risk reversal",
    "roi",
    "segment",
    "seo",
    "social proof",
    "target audience",
    "testimonial",
    "trust signal",
    "value proposition",
];

impl Default for ScoringLexicon {
    fn default() -> Self {
        Self {
            action_verbs: DEFAULT_ACTION_VERBS.iter().map(|s| s.to_string()).collect(),
            technical_terms: DEFAULT_TECHNICAL_TERMS.iter().map(|s| s.to_string()).collect(),
            specificity_saturation: 0.05,
            actionability_saturation: 0.04,
            technical_saturation: 0.05,
        }
    }
}

/// Scores for one variant's batch of trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantTrialMetrics {
    pub consistency: f64,
    pub specificity_score: f64,
    pub actionability_score: f64,
    pub technical_density: f64,
    /// Mean seconds over successful trials, 0.0 when none succeeded.
    pub avg_execution_time: f64,
    pub success_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth_similarity: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth_score: Option<f64>,
}

impl VariantTrialMetrics {
    pub fn successful_trials(&self, iterations: usize) -> usize {
        (self.success_rate * iterations as f64).round() as usize
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    lexicon: ScoringLexicon,
}

impl ScoringEngine {
    pub fn new(lexicon: ScoringLexicon) -> Self {
        Self { lexicon }
    }

    pub fn lexicon(&self) -> &ScoringLexicon {
        &self.lexicon
    }

    /// Score a batch. `trials` is every trial requested, failed ones
    /// included.
    pub fn score(
        &self,
        trials: &[AgentInvocationResult],
        ground_truth: Option<&GroundTruth>,
    ) -> VariantTrialMetrics {
        let successes: Vec<&AgentInvocationResult> = trials.iter().filter(|t| t.success).collect();

        let success_rate = if trials.is_empty() {
            0.0
        } else {
            successes.len() as f64 / trials.len() as f64
        };

        let avg_execution_time = mean(successes.iter().map(|t| t.execution_time));
        let specificity_score = mean(successes.iter().map(|t| self.specificity(&t.raw_response)));
        let actionability_score =
            mean(successes.iter().map(|t| self.actionability(&t.raw_response)));
        let technical_density =
            mean(successes.iter().map(|t| self.technical_density(&t.raw_response)));
        let consistency = consistency(successes.iter().map(|t| t.raw_response.as_str()));

        let (ground_truth_similarity, ground_truth_score) =
            match ground_truth.filter(|g| !g.is_empty()) {
                Some(reference) => {
                    let per_field = ground_truth_similarity(&successes, reference);
                    let overall = mean(per_field.values().copied());
                    (Some(per_field), Some(overall))
                }
                None => (None, None),
            };

        VariantTrialMetrics {
            consistency,
            specificity_score,
            actionability_score,
            technical_density,
            avg_execution_time,
            success_rate,
            ground_truth_similarity,
            ground_truth_score,
        }
    }

    pub fn specificity(&self, text: &str) -> f64 {
        let words = tokenize(text).len();
        let hits = QUANTITATIVE_PATTERN.find_iter(text).count();
        saturate(hits, words, self.lexicon.specificity_saturation)
    }

    pub fn actionability(&self, text: &str) -> f64 {
        let words = tokenize(text);
        let hits = words
            .iter()
            .filter(|w| {
                self.lexicon
                    .action_verbs
                    .iter()
                    .any(|verb| is_inflection_of(w, verb))
            })
            .count();
        saturate(hits, words.len(), self.lexicon.actionability_saturation)
    }

    pub fn technical_density(&self, text: &str) -> f64 {
        let words = tokenize(text);
        let hits: usize = self
            .lexicon
            .technical_terms
            .iter()
            .map(|term| count_phrase(&words, &tokenize(term)))
            .sum();
        saturate(hits, words.len(), self.lexicon.technical_saturation)
    }
}

/// Lowercased word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    WORD_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// |A ∩ B| / |A ∪ B| over word sets. Two empty texts are identical.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a: HashSet<String> = tokenize(a).into_iter().collect();
    let b: HashSet<String> = tokenize(b).into_iter().collect();
    jaccard_sets(&a, &b)
}

fn jaccard_sets(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Mean pairwise Jaccard similarity. Fewer than two texts is 1.0.
pub fn consistency<'a, I>(texts: I) -> f64
where
    I: IntoIterator<Item = &'a str>,
{
    let sets: Vec<HashSet<String>> = texts
        .into_iter()
        .map(|t| tokenize(t).into_iter().collect())
        .collect();
    if sets.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            total += jaccard_sets(&sets[i], &sets[j]);
            pairs += 1;
        }
    }
    total / pairs as f64
}

fn ground_truth_similarity(
    successes: &[&AgentInvocationResult],
    reference: &GroundTruth,
) -> BTreeMap<String, f64> {
    reference
        .iter()
        .map(|(field, expected)| {
            let score = mean(successes.iter().map(|trial| {
                let actual = trial.field(field).unwrap_or(trial.raw_response.as_str());
                jaccard(actual, expected)
            }));
            (field.clone(), score)
        })
        .collect()
}

fn is_inflection_of(word: &str, verb: &str) -> bool {
    let Some(suffix) = word.strip_prefix(verb) else {
        return false;
    };
    matches!(suffix, "" | "s" | "es" | "ed" | "d" | "ing")
}

fn count_phrase(words: &[String], phrase: &[String]) -> usize {
    if phrase.is_empty() || phrase.len() > words.len() {
        return 0;
    }
    words.windows(phrase.len()).filter(|w| *w == phrase).count()
}

fn saturate(hits: usize, words: usize, saturation: f64) -> f64 {
    if words == 0 || saturation <= 0.0 {
        return 0.0;
    }
    let density = hits as f64 / words as f64;
    (density / saturation).min(1.0)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}
