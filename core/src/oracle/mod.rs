pub mod client;

pub use client::{InferenceClient, OpenAiCompatClient};

use regex::Regex;
use serde::Deserialize;

use crate::core::{MutationTarget, VulnType};
use crate::error::FuzzError;

/// Hard cap on mutation targets per cue, imposed by the oracle's contract
/// and re-validated here.
pub const MAX_TARGETS: usize = 5;

/// Target-selection response:
/// `{"items":[{"type":"overflow"|"cmdi","target":"<key>={placeholder}"}]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSelection {
    pub items: Vec<OracleTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleTarget {
    #[serde(rename = "type")]
    pub vuln_type: VulnType,
    pub target: String,
}

/// Prerequisite-analysis response:
/// `{"prerequisites":[[v,...],...],"other_param":[[v,...],...]}`, arrays
/// ordered by descending priority; either may be empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrerequisiteAnalysis {
    #[serde(default)]
    pub prerequisites: Vec<Vec<String>>,
    #[serde(default)]
    pub other_param: Vec<Vec<String>>,
}

impl PrerequisiteAnalysis {
    /// The target parameter must never appear among its own prerequisites
    /// or other-parameter groups.
    pub fn validate_for(&self, target_param: &str) -> Result<(), FuzzError> {
        let groups = self.prerequisites.iter().chain(self.other_param.iter());
        for group in groups {
            for kv in group {
                let key = kv.split_once('=').map_or(kv.as_str(), |(k, _)| k);
                if key == target_param {
                    return Err(FuzzError::OracleContractViolation(format!(
                        "target parameter '{}' listed in its own value groups",
                        target_param
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Pulls a JSON object out of a raw model completion.
///
/// Models wrap output in markdown fences, prepend `json` markers, quote the
/// whole thing, or leave trailing commas; strip all of that first, then the
/// result still has to pass strict schema validation.
pub fn extract_json(text: &str) -> Result<String, FuzzError> {
    let cleaned = text.replace("```", "");

    let marker = Regex::new(r"(?is)^\s*json\s*(.*)").expect("static regex");
    let mut content = match marker.captures(cleaned.trim()) {
        Some(caps) => caps[1].trim().to_string(),
        None => cleaned.trim().to_string(),
    };
    content = content
        .trim_matches(|c| c == '\'' || c == '"')
        .trim()
        .to_string();

    let candidate = sanitize_trailing_commas(&content);
    if serde_json::from_str::<serde_json::Value>(&candidate).is_ok() {
        return Ok(candidate);
    }

    // Last resort: the outermost `{ ... }` block anywhere in the text.
    let block = Regex::new(r"(?s)\{.*\}").expect("static regex");
    if let Some(m) = block.find(&cleaned) {
        let candidate = sanitize_trailing_commas(m.as_str());
        if serde_json::from_str::<serde_json::Value>(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    Err(FuzzError::OracleContractViolation(format!(
        "no parsable JSON in oracle response: '{}'",
        truncate(text, 100)
    )))
}

fn sanitize_trailing_commas(s: &str) -> String {
    let re = Regex::new(r",(\s*[}\]])").expect("static regex");
    re.replace_all(s, "$1").into_owned()
}

fn truncate(s: &str, limit: usize) -> &str {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Parses and strictly validates a target-selection response.
pub fn parse_target_selection(text: &str) -> Result<TargetSelection, FuzzError> {
    let json = extract_json(text)?;
    let selection: TargetSelection = serde_json::from_str(&json).map_err(|e| {
        FuzzError::OracleContractViolation(format!("target selection schema: {}", e))
    })?;

    if selection.items.is_empty() {
        return Err(FuzzError::OracleContractViolation(
            "target selection carries no items".to_string(),
        ));
    }
    if selection.items.len() > MAX_TARGETS {
        return Err(FuzzError::OracleContractViolation(format!(
            "{} items exceeds the {}-target cap",
            selection.items.len(),
            MAX_TARGETS
        )));
    }
    for item in &selection.items {
        let Some(target) = MutationTarget::from_expr(&item.target, item.vuln_type) else {
            return Err(FuzzError::OracleContractViolation(format!(
                "malformed target expression '{}'",
                item.target
            )));
        };
        if target.placeholder != item.vuln_type.placeholder() {
            return Err(FuzzError::OracleContractViolation(format!(
                "target '{}' placeholder does not match type '{}'",
                item.target, item.vuln_type
            )));
        }
    }
    Ok(selection)
}

/// Parses and validates a prerequisite-analysis response.
pub fn parse_prerequisites(text: &str) -> Result<PrerequisiteAnalysis, FuzzError> {
    let json = extract_json(text)?;
    serde_json::from_str(&json).map_err(|e| {
        FuzzError::OracleContractViolation(format!("prerequisite analysis schema: {}", e))
    })
}

/// Converts a validated selection into mutation targets, oracle order.
pub fn targets_from_selection(selection: &TargetSelection) -> Vec<MutationTarget> {
    selection
        .items
        .iter()
        .filter_map(|item| MutationTarget::from_expr(&item.target, item.vuln_type))
        .collect()
}
