use crate::core::expander::AssignmentTuple;
use crate::core::packet::DataPacket;
use crate::core::{MutationTarget, VulnType};
use crate::error::FuzzError;

/// A fully substituted request ready to send, plus what is needed to
/// reproduce it.
#[derive(Debug, Clone)]
pub struct Poc {
    /// Monotonically increasing per-target sequence id.
    pub seq: usize,
    pub packet: DataPacket,
    pub target_param: String,
    pub vuln_type: VulnType,
    pub tuple: AssignmentTuple,
}

impl Poc {
    pub fn body(&self) -> String {
        self.packet.serialize()
    }
}

/// Merges one mutation target, one assignment tuple, and the resolved probe
/// value into exactly one POC.
///
/// The target parameter takes the probe value; every other parameter takes
/// its tuple assignment. Key order follows the template. Any inconsistency
/// between tuple and template is a `TemplateMismatch`: a tuple key missing
/// from the template, a tuple key colliding with the target, or a template
/// key that is neither the target nor assigned.
pub fn assemble(
    template: &DataPacket,
    target: &MutationTarget,
    tuple: &AssignmentTuple,
    probe_value: &str,
    seq: usize,
) -> Result<Poc, FuzzError> {
    if !template.contains(&target.param) {
        return Err(FuzzError::TemplateMismatch(format!(
            "target parameter '{}' not in template",
            target.param
        )));
    }

    let mut packet = template.clone();
    packet.set(&target.param, probe_value);

    for (key, value) in &tuple.assignments {
        if key == &target.param {
            return Err(FuzzError::TemplateMismatch(format!(
                "assignment for '{}' collides with the mutation target",
                key
            )));
        }
        if !packet.set(key, value) {
            return Err(FuzzError::TemplateMismatch(format!(
                "assigned parameter '{}' not in template",
                key
            )));
        }
    }

    for key in template.keys() {
        if key == target.param {
            continue;
        }
        if !tuple.assignments.iter().any(|(k, _)| k == key) {
            return Err(FuzzError::TemplateMismatch(format!(
                "template parameter '{}' neither assigned nor targeted",
                key
            )));
        }
    }

    Ok(Poc {
        seq,
        packet,
        target_param: target.param.clone(),
        vuln_type: target.vuln_type,
        tuple: tuple.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expander::ValueSpace;

    fn tuple(assignments: &[(&str, &str)]) -> AssignmentTuple {
        AssignmentTuple {
            id: 0,
            assignments: assignments
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn ssid_target() -> MutationTarget {
        MutationTarget::from_expr("ssid={overflow}", VulnType::Overflow).unwrap()
    }

    #[test]
    fn test_first_poc_end_to_end() {
        // Template, target, and specs from a real Tenda wireless setup form.
        let template = DataPacket::parse("security=none&ssid=X&hideSsid=0&wrlPwd=");
        let space = ValueSpace::from_specs(
            &[vec!["hideSsid=0".into(), "hideSsid=1".into()]],
            &[
                vec!["security=none".into(), "security=wpapsk".into()],
                vec!["wrlPwd=@Ydid8711".into()],
            ],
        );
        let first = space.tuples(100).next().unwrap();
        let probe = "A".repeat(16);
        let poc = assemble(&template, &ssid_target(), &first, &probe, 1).unwrap();
        assert_eq!(
            poc.body(),
            format!("security=none&ssid={}&hideSsid=0&wrlPwd=@Ydid8711", probe)
        );
    }

    #[test]
    fn test_round_trip_recovers_tuple_and_probe() {
        let template = DataPacket::parse("a=0&ssid=orig&b=0");
        let t = tuple(&[("a", "1"), ("b", "2")]);
        let poc = assemble(&template, &ssid_target(), &t, "PROBE", 3).unwrap();
        let reparsed = DataPacket::parse(&poc.body());
        assert_eq!(reparsed.get("ssid"), Some("PROBE"));
        assert_eq!(reparsed.get("a"), Some("1"));
        assert_eq!(reparsed.get("b"), Some("2"));
        let keys: Vec<&str> = reparsed.keys().collect();
        assert_eq!(keys, vec!["a", "ssid", "b"]);
    }

    #[test]
    fn test_unknown_assignment_is_mismatch() {
        let template = DataPacket::parse("ssid=x&a=0");
        let t = tuple(&[("a", "1"), ("ghost", "1")]);
        let err = assemble(&template, &ssid_target(), &t, "P", 0).unwrap_err();
        assert!(matches!(err, FuzzError::TemplateMismatch(_)));
    }

    #[test]
    fn test_uncovered_template_key_is_mismatch() {
        let template = DataPacket::parse("ssid=x&a=0&b=0");
        let t = tuple(&[("a", "1")]);
        let err = assemble(&template, &ssid_target(), &t, "P", 0).unwrap_err();
        assert!(matches!(err, FuzzError::TemplateMismatch(_)));
    }

    #[test]
    fn test_missing_target_is_mismatch() {
        let template = DataPacket::parse("a=0");
        let t = tuple(&[("a", "1")]);
        let err = assemble(&template, &ssid_target(), &t, "P", 0).unwrap_err();
        assert!(matches!(err, FuzzError::TemplateMismatch(_)));
    }

    #[test]
    fn test_tuple_colliding_with_target_is_mismatch() {
        let template = DataPacket::parse("ssid=x&a=0");
        let t = tuple(&[("ssid", "taken"), ("a", "1")]);
        let err = assemble(&template, &ssid_target(), &t, "P", 0).unwrap_err();
        assert!(matches!(err, FuzzError::TemplateMismatch(_)));
    }
}
