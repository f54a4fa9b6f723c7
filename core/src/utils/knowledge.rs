use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::VulnType;

/// Vulnerability-type profile attached to a known function category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnProfile {
    #[serde(default = "default_operation_type")]
    pub operation_type: String,
    #[serde(default = "default_vuln_types")]
    pub vuln_types: Vec<VulnType>,
}

fn default_operation_type() -> String {
    "set&exec".to_string()
}

fn default_vuln_types() -> Vec<VulnType> {
    vec![VulnType::Overflow, VulnType::Cmdi]
}

impl Default for VulnProfile {
    fn default() -> Self {
        Self {
            operation_type: default_operation_type(),
            vuln_types: default_vuln_types(),
        }
    }
}

/// One known function category with its reference cues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbEntry {
    pub function_category: String,
    #[serde(default)]
    pub cues: Vec<String>,
    #[serde(default)]
    pub profile: VulnProfile,
}

/// Read-only knowledge base of function categories.
///
/// Loaded once at startup and shared freely across concurrent device runs;
/// nothing mutates it after load.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    entries: Vec<KbEntry>,
}

impl KnowledgeBase {
    pub fn new(entries: Vec<KbEntry>) -> Self {
        Self { entries }
    }

    /// Loads from a JSON array file. A missing or unparsable file yields an
    /// empty knowledge base with a warning, never an error; downstream
    /// selection then falls back to the oracle's own classification.
    pub fn load(path: &Path) -> Self {
        let data = match fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) => {
                warn!("knowledge base {:?} not loaded: {}", path, e);
                return Self::default();
            }
        };
        match serde_json::from_str::<Vec<KbEntry>>(&data) {
            Ok(entries) => Self { entries },
            Err(e) => {
                warn!("knowledge base {:?} malformed: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn entries(&self) -> &[KbEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cues_for(&self, function_category: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|e| e.function_category == function_category)
            .map(|e| e.cues.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_missing_file_is_empty() {
        let kb = KnowledgeBase::load(Path::new("/nonexistent/database.json"));
        assert!(kb.is_empty());
    }

    #[test]
    fn test_load_and_lookup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"function_category":"wifi.set_ssid","cues":["ssid","wrlPwd"],
                "profile":{{"operation_type":"set&exec","vuln_types":["overflow"]}}}}]"#
        )
        .unwrap();
        let kb = KnowledgeBase::load(file.path());
        assert_eq!(kb.entries().len(), 1);
        assert_eq!(kb.cues_for("wifi.set_ssid").unwrap(), &["ssid", "wrlPwd"]);
        assert_eq!(kb.entries()[0].profile.vuln_types, vec![VulnType::Overflow]);
    }

    #[test]
    fn test_profile_defaults_cover_both_types() {
        let entry: KbEntry =
            serde_json::from_str(r#"{"function_category":"dns.set_server"}"#).unwrap();
        assert_eq!(entry.profile.operation_type, "set&exec");
        assert_eq!(
            entry.profile.vuln_types,
            vec![VulnType::Overflow, VulnType::Cmdi]
        );
    }
}
