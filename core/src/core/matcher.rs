use crate::core::{MutationTarget, VulnType};
use crate::utils::knowledge::{KnowledgeBase, VulnProfile};

/// Semantic hints describing the device function under test, produced once
/// per analysis run by the oracle and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub operation_type: String,
    pub function_category: String,
}

impl Cue {
    pub fn new(operation_type: &str, function_category: &str) -> Self {
        Self {
            operation_type: operation_type.to_string(),
            function_category: function_category.to_string(),
        }
    }

    fn text(&self) -> String {
        format!("{} {}", self.operation_type, self.function_category).to_lowercase()
    }
}

/// One knowledge-base entry's affinity for the cue, score in [0,1].
#[derive(Debug, Clone)]
pub struct CueAffinity {
    pub function_category: String,
    pub score: f64,
    pub profile: VulnProfile,
}

/// Symmetric string similarity in [0,1].
///
/// Case-insensitive containment either way scores 1.0; otherwise the longest
/// common substring length over the longer input's length. Deterministic, no
/// network round-trip, monotone in shared content.
pub fn fitness(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(&b) || b.contains(&a) {
        return 1.0;
    }
    let lcs = longest_common_substring(&a, &b);
    lcs as f64 / a.len().max(b.len()) as f64
}

fn longest_common_substring(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev = vec![0usize; b.len() + 1];
    let mut longest = 0;
    for i in 1..=a.len() {
        let mut row = vec![0usize; b.len() + 1];
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                row[j] = prev[j - 1] + 1;
                longest = longest.max(row[j]);
            }
        }
        prev = row;
    }
    longest
}

/// Scores a cue against the knowledge base and orders mutation-target
/// candidates accordingly.
#[derive(Debug, Clone)]
pub struct CueMatcher {
    threshold: f64,
}

impl CueMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Ranked affinities above the threshold, descending score, input order
    /// preserved on ties. Empty result means the cue matched nothing and the
    /// caller falls back to the oracle-provided `set&exec` classification.
    pub fn rank(&self, cue: &Cue, kb: &KnowledgeBase) -> Vec<CueAffinity> {
        let cue_text = cue.text();
        let mut ranked: Vec<CueAffinity> = kb
            .entries()
            .iter()
            .map(|entry| {
                let entry_text = if entry.cues.is_empty() {
                    entry.function_category.to_lowercase()
                } else {
                    format!("{} {}", entry.function_category, entry.cues.join(" ")).to_lowercase()
                };
                CueAffinity {
                    function_category: entry.function_category.clone(),
                    score: fitness(&cue_text, &entry_text),
                    profile: entry.profile.clone(),
                }
            })
            .filter(|a| a.score >= self.threshold)
            .collect();
        // Stable sort keeps knowledge-base order for equal scores.
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }

    /// Orders oracle-provided targets by cue affinity before expansion.
    ///
    /// With a ranked knowledge-base match, targets whose vulnerability type
    /// appears in the best entry's profile come first, then by how well the
    /// parameter name matches that entry's cues; without a match the oracle
    /// order passes through unchanged (`set&exec` default covers both types).
    pub fn order_targets(
        &self,
        cue: &Cue,
        kb: &KnowledgeBase,
        mut targets: Vec<MutationTarget>,
    ) -> Vec<MutationTarget> {
        let ranked = self.rank(cue, kb);
        let Some(best) = ranked.first() else {
            return targets;
        };

        let in_profile = |t: &MutationTarget| best.profile.vuln_types.contains(&t.vuln_type);
        let cue_score = |t: &MutationTarget| -> f64 {
            kb.cues_for(&best.function_category)
                .map(|cues| {
                    cues.iter()
                        .map(|c| fitness(c, &t.param))
                        .fold(0.0f64, f64::max)
                })
                .unwrap_or(0.0)
        };

        targets.sort_by(|a, b| {
            let key_a = (!in_profile(a)) as u8;
            let key_b = (!in_profile(b)) as u8;
            key_a
                .cmp(&key_b)
                .then(cue_score(b).total_cmp(&cue_score(a)))
        });
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::knowledge::KbEntry;

    fn kb() -> KnowledgeBase {
        KnowledgeBase::new(vec![
            KbEntry {
                function_category: "wifi.set_ssid".to_string(),
                cues: vec!["ssid".to_string(), "wrlPwd".to_string()],
                profile: VulnProfile {
                    operation_type: "set&exec".to_string(),
                    vuln_types: vec![VulnType::Overflow],
                },
            },
            KbEntry {
                function_category: "dns.set_server".to_string(),
                cues: vec!["dnsAddr".to_string()],
                profile: VulnProfile::default(),
            },
        ])
    }

    #[test]
    fn test_fitness_containment() {
        assert_eq!(fitness("ssid", "ssid={overflow}"), 1.0);
        assert_eq!(fitness("SSID", "set wifi ssid"), 1.0);
    }

    #[test]
    fn test_fitness_symmetric() {
        let a = fitness("hideSsid", "wifi ssid hidden");
        let b = fitness("wifi ssid hidden", "hideSsid");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fitness_unrelated_is_low() {
        assert!(fitness("ntpServer", "led") < 0.3);
        assert_eq!(fitness("", "anything"), 0.0);
    }

    #[test]
    fn test_rank_filters_by_threshold() {
        let matcher = CueMatcher::new(0.6);
        let cue = Cue::new("set", "wifi.set_ssid");
        let ranked = matcher.rank(&cue, &kb());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].function_category, "wifi.set_ssid");
        assert!(ranked[0].score >= 0.6);
    }

    #[test]
    fn test_rank_is_deterministic() {
        let matcher = CueMatcher::new(0.1);
        let cue = Cue::new("set", "wifi.set_ssid");
        let a: Vec<String> = matcher
            .rank(&cue, &kb())
            .into_iter()
            .map(|r| r.function_category)
            .collect();
        let b: Vec<String> = matcher
            .rank(&cue, &kb())
            .into_iter()
            .map(|r| r.function_category)
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_match_passes_targets_through() {
        let matcher = CueMatcher::new(0.9);
        let cue = Cue::new("get", "totally.unrelated");
        let targets = vec![
            MutationTarget::from_expr("a={cmdi}", VulnType::Cmdi).unwrap(),
            MutationTarget::from_expr("b={overflow}", VulnType::Overflow).unwrap(),
        ];
        let ordered = matcher.order_targets(&cue, &kb(), targets.clone());
        assert_eq!(ordered, targets);
    }

    #[test]
    fn test_profile_affinity_orders_targets() {
        let matcher = CueMatcher::new(0.6);
        let cue = Cue::new("set", "wifi.set_ssid");
        // wifi.set_ssid's profile only lists overflow, so the overflow target
        // on a cue-matching parameter moves ahead of the cmdi one.
        let targets = vec![
            MutationTarget::from_expr("timeZone={cmdi}", VulnType::Cmdi).unwrap(),
            MutationTarget::from_expr("ssid={overflow}", VulnType::Overflow).unwrap(),
        ];
        let ordered = matcher.order_targets(&cue, &kb(), targets);
        assert_eq!(ordered[0].param, "ssid");
    }
}
