use log::warn;

use crate::core::VulnType;
use crate::utils::read_lines;

/// Default overflow probe length. Long enough to smash the stack buffers
/// seen in consumer router firmwares without tripping request-size limits.
pub const DEFAULT_OVERFLOW_LEN: usize = 2000;

/// Default marker echoed by the command-injection probe.
pub const DEFAULT_CMDI_MARKER: &str = "hacker";

/// Resolves vulnerability-type placeholders to concrete probe values.
///
/// This is the only place synthetic attack payloads are materialized; the
/// rest of the pipeline moves placeholders around.
#[derive(Debug, Clone)]
pub struct ProbeFactory {
    overflow_len: usize,
    cmdi_marker: String,
    cmdi_fragments: Vec<String>,
}

impl ProbeFactory {
    pub fn new(overflow_len: usize, cmdi_marker: &str) -> Self {
        Self {
            overflow_len,
            cmdi_marker: cmdi_marker.to_string(),
            cmdi_fragments: Vec::new(),
        }
    }

    /// Adds extra command-injection fragments from a file, one per line.
    /// Fragments may contain `{marker}` which resolves to the marker string.
    pub fn with_fragment_file(mut self, path: &str) -> Self {
        match read_lines(path) {
            Ok(lines) => self.cmdi_fragments = lines,
            Err(e) => warn!("no cmdi fragments loaded from {}: {}", path, e),
        }
        self
    }

    /// Concrete probe value for one vulnerability type.
    pub fn resolve(&self, vuln_type: VulnType) -> String {
        match vuln_type {
            VulnType::Overflow => "A".repeat(self.overflow_len),
            VulnType::Cmdi => match self.cmdi_fragments.first() {
                Some(fragment) => fragment.replace("{marker}", &self.cmdi_marker),
                None => format!(
                    ";echo {m} > /webroot/{m}.txt",
                    m = self.cmdi_marker
                ),
            },
        }
    }

    /// Fragment that removes the marker file a successful injection left
    /// behind, so repeated runs keep a clean webroot.
    pub fn cleanup_fragment(&self) -> String {
        format!(";rm /webroot/{}.txt", self.cmdi_marker)
    }

    /// Relative path of the marker artifact a cmdi probe drops, used to
    /// verify injection by fetching it back over HTTP.
    pub fn marker_path(&self) -> String {
        format!("/{}.txt", self.cmdi_marker)
    }

    pub fn marker(&self) -> &str {
        &self.cmdi_marker
    }
}

impl Default for ProbeFactory {
    fn default() -> Self {
        Self::new(DEFAULT_OVERFLOW_LEN, DEFAULT_CMDI_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_overflow_probe_length() {
        let f = ProbeFactory::new(64, "m");
        let probe = f.resolve(VulnType::Overflow);
        assert_eq!(probe.len(), 64);
        assert!(probe.bytes().all(|b| b == b'A'));
    }

    #[test]
    fn test_cmdi_probe_carries_marker() {
        let f = ProbeFactory::default();
        let probe = f.resolve(VulnType::Cmdi);
        assert_eq!(probe, ";echo hacker > /webroot/hacker.txt");
        assert_eq!(f.cleanup_fragment(), ";rm /webroot/hacker.txt");
        assert_eq!(f.marker_path(), "/hacker.txt");
    }

    #[test]
    fn test_fragment_file_overrides_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "`touch /tmp/{{marker}}`").unwrap();
        let f = ProbeFactory::new(10, "probe123")
            .with_fragment_file(file.path().to_str().unwrap());
        assert_eq!(f.resolve(VulnType::Cmdi), "`touch /tmp/probe123`");
    }
}
