//! Extraction of named fields from free-form model output.
//!
//! Two shapes are recognized, tried in order:
//!
//! 1. A JSON object, bare or inside a fenced block, whose keys name declared
//!    fields.
//! 2. Labelled sections such as `STRATEGIC ASSESSMENT: ...`, `## Key
//!    Strength` or `**Red flags:** ...`. A section runs until the next
//!    recognized label.
//!
//! The full text is always kept under [`RAW_RESPONSE_FIELD`]. Parsing never
//! fails; a response that matches nothing degrades to raw text only.

use parallax_common::RAW_RESPONSE_FIELD;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static FENCED_JSON_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").unwrap());

/// Labels longer than this are prose, not section headers.
const MAX_LABEL_LEN: usize = 64;

/// Result of [`parse_output`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub fields: BTreeMap<String, String>,
    /// True when every declared field was found with a non-empty value.
    pub fully_parsed: bool,
}

/// Split `text` into the declared `fields`.
pub fn parse_output(text: &str, fields: &[String]) -> ParsedOutput {
    let found = extract_json(text, fields)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| extract_sections(text, fields));

    let fully_parsed = fields.iter().all(|f| found.contains_key(f));

    let mut output = found;
    output.insert(RAW_RESPONSE_FIELD.to_string(), text.to_string());

    ParsedOutput {
        fields: output,
        fully_parsed,
    }
}

/// Lowercase, spaces and hyphens to underscores, other punctuation dropped.
pub fn normalize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.trim().chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if matches!(ch, ' ' | '-' | '_') && !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Display form used when asking the model for a field.
pub fn display_label(field: &str) -> String {
    field.replace('_', " ").to_uppercase()
}

fn extract_json(text: &str, fields: &[String]) -> Option<BTreeMap<String, String>> {
    let candidate = FENCED_JSON_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .or_else(|| {
            let start = text.find('{')?;
            let end = text.rfind('}')?;
            (end > start).then(|| &text[start..=end])
        })?;

    let Value::Object(map) = serde_json::from_str::<Value>(candidate).ok()? else {
        return None;
    };

    let mut found = BTreeMap::new();
    for (key, value) in &map {
        let Some(field) = find_field(key, fields) else {
            continue;
        };
        if let Some(text) = json_text(value) {
            found.entry(field.clone()).or_insert(text);
        }
    }
    Some(found)
}

fn json_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(json_text)
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn extract_sections(text: &str, fields: &[String]) -> BTreeMap<String, String> {
    let mut bodies: Vec<Vec<&str>> = vec![Vec::new(); fields.len()];
    let mut seen = vec![false; fields.len()];
    let mut current: Option<usize> = None;

    for line in text.lines() {
        if let Some((idx, rest)) = match_label(line, fields) {
            current = Some(idx);
            if seen[idx] && !bodies[idx].is_empty() {
                bodies[idx].push("");
            }
            seen[idx] = true;
            if !rest.is_empty() {
                bodies[idx].push(rest);
            }
            continue;
        }
        if let Some(idx) = current {
            bodies[idx].push(line.trim_end());
        }
    }

    fields
        .iter()
        .zip(bodies)
        .filter_map(|(field, lines)| {
            let body = lines.join("\n").trim().to_string();
            (!body.is_empty()).then(|| (field.clone(), body))
        })
        .collect()
}

/// Recognize a section label at the start of `line`, returning the field
/// index and any text following the label on the same line.
fn match_label<'a>(line: &'a str, fields: &[String]) -> Option<(usize, &'a str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let is_heading = trimmed.starts_with('#');
    let is_bold_line = trimmed.len() > 4 && trimmed.starts_with("**") && trimmed.ends_with("**");
    let body = strip_decoration(trimmed);

    if let Some((label, rest)) = body.split_once(':') {
        if let Some(idx) = field_index(label, fields) {
            let rest = rest.trim_start_matches(['*', '_']).trim();
            return Some((idx, rest));
        }
    }

    if is_heading || is_bold_line {
        if let Some(idx) = field_index(body, fields) {
            return Some((idx, ""));
        }
    }

    None
}

/// Strip leading markdown decoration: `#`, `*`, `-`, `>` and list numbering.
fn strip_decoration(line: &str) -> &str {
    let line = line.trim_start_matches(['#', '*', '-', '>', ' ', '\t']);
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let line = if digits > 0 {
        let after = &line[digits..];
        match after.strip_prefix(['.', ')']) {
            Some(rest) => rest,
            None => line,
        }
    } else {
        line
    };
    line.trim_start_matches(['*', ' ', '\t'])
}

fn field_index(label: &str, fields: &[String]) -> Option<usize> {
    if label.len() > MAX_LABEL_LEN {
        return None;
    }
    let normalized = normalize_label(label);
    if normalized.is_empty() {
        return None;
    }
    fields.iter().position(|f| normalize_label(f) == normalized)
}

fn find_field<'f>(label: &str, fields: &'f [String]) -> Option<&'f String> {
    field_index(label, fields).map(|idx| &fields[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn strategic() -> Vec<String> {
        fields(&["strategic_assessment", "key_strength", "key_weakness"])
    }

    #[test]
    fn normalize_label_variants() {
        assert_eq!(normalize_label("Key Strength"), "key_strength");
        assert_eq!(normalize_label("KEY-STRENGTH"), "key_strength");
        assert_eq!(normalize_label("  key_strength  "), "key_strength");
        assert_eq!(normalize_label("Key Strength**"), "key_strength");
        assert_eq!(normalize_label("Red  flags"), "red_flags");
    }

    #[test]
    fn display_label_is_upper_with_spaces() {
        assert_eq!(display_label("red_flags"), "RED FLAGS");
    }

    #[test]
    fn parses_uppercase_labels() {
        let text = "STRATEGIC ASSESSMENT: Premium positioning with clear focus.\n\
                    KEY STRENGTH: Concrete 40% savings claim.\n\
                    KEY WEAKNESS: No social proof.";
        let parsed = parse_output(text, &strategic());
        assert!(parsed.fully_parsed);
        assert_eq!(
            parsed.fields["strategic_assessment"],
            "Premium positioning with clear focus."
        );
        assert_eq!(parsed.fields["key_strength"], "Concrete 40% savings claim.");
        assert_eq!(parsed.fields["key_weakness"], "No social proof.");
        assert_eq!(parsed.fields[RAW_RESPONSE_FIELD], text);
    }

    #[test]
    fn parses_markdown_headings_with_multiline_bodies() {
        let text = "Here is my analysis.\n\n\
                    ## Strategic Assessment\n\
                    The offer is well positioned.\n\
                    It targets mid-market buyers.\n\n\
                    ## Key Strength\n\
                    Pricing clarity.\n\n\
                    ## Key Weakness\n\
                    Weak call to action.\n";
        let parsed = parse_output(text, &strategic());
        assert!(parsed.fully_parsed);
        assert_eq!(
            parsed.fields["strategic_assessment"],
            "The offer is well positioned.\nIt targets mid-market buyers."
        );
        assert_eq!(parsed.fields["key_weakness"], "Weak call to action.");
    }

    #[test]
    fn parses_bold_and_numbered_labels() {
        let text = "1. **Strategic Assessment:** Solid.\n\
                    2. **Key-Strength**: Speed.\n\
                    - *key weakness*: Price.";
        let parsed = parse_output(text, &strategic());
        assert!(parsed.fully_parsed);
        assert_eq!(parsed.fields["strategic_assessment"], "Solid.");
        assert_eq!(parsed.fields["key_strength"], "Speed.");
        assert_eq!(parsed.fields["key_weakness"], "Price.");
    }

    #[test]
    fn preamble_before_first_label_is_ignored() {
        let text = "Sure! Let me look.\nKEY STRENGTH: Speed.";
        let parsed = parse_output(text, &strategic());
        assert_eq!(parsed.fields["key_strength"], "Speed.");
        assert!(!parsed.fields.contains_key("strategic_assessment"));
    }

    #[test]
    fn partial_match_is_not_fully_parsed() {
        let text = "KEY STRENGTH: Speed.\nSomething else: not a field.";
        let parsed = parse_output(text, &strategic());
        assert!(!parsed.fully_parsed);
        assert_eq!(
            parsed.fields["key_strength"],
            "Speed.\nSomething else: not a field."
        );
    }

    #[test]
    fn empty_section_counts_as_missing() {
        let text = "KEY STRENGTH:\nKEY WEAKNESS: Price.";
        let parsed = parse_output(text, &strategic());
        assert!(!parsed.fields.contains_key("key_strength"));
        assert_eq!(parsed.fields["key_weakness"], "Price.");
    }

    #[test]
    fn unstructured_text_degrades_to_raw_only() {
        let text = "I think the document is fine overall.";
        let parsed = parse_output(text, &strategic());
        assert!(!parsed.fully_parsed);
        assert_eq!(parsed.fields.len(), 1);
        assert_eq!(parsed.fields[RAW_RESPONSE_FIELD], text);
    }

    #[test]
    fn parses_fenced_json() {
        let text = "Result:\n```json\n{\"strategic_assessment\": \"Good\", \"key_strength\": \"Fast\", \"key_weakness\": \"Costly\", \"extra\": \"x\"}\n```";
        let parsed = parse_output(text, &strategic());
        assert!(parsed.fully_parsed);
        assert_eq!(parsed.fields["key_strength"], "Fast");
        assert!(!parsed.fields.contains_key("extra"));
    }

    #[test]
    fn parses_bare_json_with_lists_and_numbers() {
        let text = r#"{"red_flags": ["no pricing", "vague claims"], "risk_reversal": 3}"#;
        let parsed = parse_output(text, &fields(&["red_flags", "risk_reversal"]));
        assert!(parsed.fully_parsed);
        assert_eq!(parsed.fields["red_flags"], "no pricing\nvague claims");
        assert_eq!(parsed.fields["risk_reversal"], "3");
    }

    #[test]
    fn json_without_declared_keys_falls_back_to_sections() {
        let text = "KEY STRENGTH: Speed {\"unrelated\": 1}";
        let parsed = parse_output(text, &strategic());
        assert_eq!(parsed.fields["key_strength"], "Speed {\"unrelated\": 1}");
    }

    #[test]
    fn no_declared_fields_is_trivially_complete() {
        let parsed = parse_output("anything", &[]);
        assert!(parsed.fully_parsed);
        assert_eq!(parsed.fields.len(), 1);
    }

    #[test]
    fn parsing_is_deterministic() {
        let text = "KEY STRENGTH: Speed.\nKEY WEAKNESS: Price.";
        assert_eq!(parse_output(text, &strategic()), parse_output(text, &strategic()));
    }
}
