pub mod assembler;
pub mod engine;
pub mod expander;
pub mod matcher;
pub mod packet;
pub mod recorder;
pub mod state;

use serde::{Deserialize, Serialize};

/// Vulnerability class a mutation target is probed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VulnType {
    Overflow,
    Cmdi,
}

impl VulnType {
    /// Placeholder text the oracle embeds in a target expression,
    /// e.g. `ssid={overflow}`.
    pub fn placeholder(&self) -> &'static str {
        match self {
            VulnType::Overflow => "{overflow}",
            VulnType::Cmdi => "{cmdi}",
        }
    }
}

impl std::fmt::Display for VulnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VulnType::Overflow => write!(f, "overflow"),
            VulnType::Cmdi => write!(f, "cmdi"),
        }
    }
}

/// One parameter selected for fuzzing: the parameter name, the vulnerability
/// class, and the placeholder string marking it in the packet template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationTarget {
    pub param: String,
    pub vuln_type: VulnType,
    pub placeholder: String,
}

impl MutationTarget {
    /// Parses an oracle target expression such as `ssid={overflow}`.
    /// Returns `None` when the expression has no `=` or an empty key.
    pub fn from_expr(expr: &str, vuln_type: VulnType) -> Option<Self> {
        let (key, value) = expr.split_once('=')?;
        if key.is_empty() {
            return None;
        }
        Some(Self {
            param: key.to_string(),
            vuln_type,
            placeholder: value.to_string(),
        })
    }
}

/// Terminal and transient states of one target's run.
///
/// `Pending → Probing → {Confirmed, Exhausted, Unreachable}`; `Cancelled` is
/// reached only at an assignment-tuple boundary on operator abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetState {
    Pending,
    Probing,
    Confirmed,
    Exhausted,
    Unreachable,
    Cancelled,
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetState::Pending => "pending",
            TargetState::Probing => "probing",
            TargetState::Confirmed => "confirmed",
            TargetState::Exhausted => "exhausted",
            TargetState::Unreachable => "unreachable",
            TargetState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_expr() {
        let t = MutationTarget::from_expr("ssid={overflow}", VulnType::Overflow).unwrap();
        assert_eq!(t.param, "ssid");
        assert_eq!(t.placeholder, "{overflow}");
        assert_eq!(t.vuln_type, VulnType::Overflow);
    }

    #[test]
    fn test_target_from_expr_rejects_bare_key() {
        assert!(MutationTarget::from_expr("ssid", VulnType::Cmdi).is_none());
        assert!(MutationTarget::from_expr("={cmdi}", VulnType::Cmdi).is_none());
    }

    #[test]
    fn test_vuln_type_serde_names() {
        assert_eq!(serde_json::to_string(&VulnType::Overflow).unwrap(), "\"overflow\"");
        assert_eq!(serde_json::to_string(&VulnType::Cmdi).unwrap(), "\"cmdi\"");
        let parsed: VulnType = serde_json::from_str("\"cmdi\"").unwrap();
        assert_eq!(parsed, VulnType::Cmdi);
    }
}
