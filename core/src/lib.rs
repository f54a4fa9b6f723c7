pub mod core;
pub mod error;
pub mod http;
pub mod oracle;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::core::engine::{EnginePolicy, FuzzEngine, TargetPlan, TargetReport};
pub use crate::core::expander::ValueSpace;
pub use crate::core::matcher::{Cue, CueMatcher};
pub use crate::core::packet::DataPacket;
pub use crate::core::recorder::{Finding, SuccessRecord, SuccessRecorder};
pub use crate::core::state::RunState;
pub use crate::core::{MutationTarget, TargetState, VulnType};
pub use crate::error::FuzzError;
pub use crate::http::client::HttpTransport;
pub use crate::utils::knowledge::KnowledgeBase;
pub use crate::utils::read_lines;

/// Shared campaign configuration used by the CLI and by embedding callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FuzzConfig {
    /// Config-API endpoint the POCs are POSTed to.
    pub device_url: String,
    /// Path GETed to check the device is still up.
    pub probe_path: String,
    /// Seed request body, `k=v&k=v` form data.
    pub template: String,
    pub success_dir: String,
    pub kb_path: String,
    pub timeout: u64,
    pub retries: u32,
    pub rate_limit_ms: u64,
    pub backoff_ms: u64,
    pub max_combinations: usize,
    /// Cue fitness threshold for knowledge-base matches.
    pub threshold: f64,
    pub overflow_length: usize,
    pub marker: String,
    /// A response slower than `latency_factor` times the baseline probe is
    /// flagged suspicious.
    pub latency_factor: f64,
    /// Operation-type hint when the cue matcher finds nothing.
    pub operation_type: String,
    pub function_category: String,
    pub verbose: bool,
    pub dry_run: bool,
    pub resume: bool,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            device_url: String::new(),
            probe_path: "/".to_string(),
            template: String::new(),
            success_dir: "success".to_string(),
            kb_path: "database.json".to_string(),
            timeout: 5,
            retries: 3,
            rate_limit_ms: 500,
            backoff_ms: 200,
            max_combinations: 64,
            threshold: 0.6,
            overflow_length: 2000,
            marker: "hacker".to_string(),
            latency_factor: 3.0,
            operation_type: "set&exec".to_string(),
            function_category: String::new(),
            verbose: false,
            dry_run: false,
            resume: false,
        }
    }
}

impl FuzzConfig {
    pub fn policy(&self) -> EnginePolicy {
        EnginePolicy {
            timeout: Duration::from_secs(self.timeout),
            retries: self.retries,
            initial_backoff: Duration::from_millis(self.backoff_ms),
            request_gap: Duration::from_millis(self.rate_limit_ms),
            max_combinations: self.max_combinations,
        }
    }

    pub fn probes(&self) -> crate::utils::probes::ProbeFactory {
        crate::utils::probes::ProbeFactory::new(self.overflow_length, &self.marker)
    }

    pub fn monitor(&self) -> crate::utils::monitor::VerificationMonitor {
        crate::utils::monitor::VerificationMonitor::new(
            crate::utils::monitor::IndicatorSet::with_marker(&self.marker),
            self.latency_factor,
        )
    }

    pub fn success_path(&self) -> PathBuf {
        PathBuf::from(&self.success_dir)
    }
}

/// Output abstraction for the fuzzing pipeline.
/// CLI implements this with colored terminal output; tests with a no-op.
pub trait EventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_finding(&self, record: &SuccessRecord);
    fn on_progress(&self, phase: &str, current: usize, total: usize);
}

pub type SinkRef = Arc<dyn EventSink>;

/// Terminal output sink for CLI usage.
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl EventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        use std::io::Write;
        let colored = match level {
            "success" => message.green().to_string(),
            "error" => message.red().to_string(),
            "warn" => message.yellow().to_string(),
            "phase" => message.bright_cyan().bold().to_string(),
            _ => message.to_string(),
        };
        print!("{}\r\n", colored);
        std::io::stdout().flush().ok();
    }

    fn on_finding(&self, record: &SuccessRecord) {
        use colored::*;
        use std::io::Write;
        let out = |text: &str| {
            print!("{}\r\n", text);
            std::io::stdout().flush().ok();
        };
        out(&format!(
            "\n{} {} confirmed!",
            "[+]".green().bold(),
            record.vuln_type.to_string().red().bold()
        ));
        out(&format!("    Param:   {}", record.target_param.white()));
        out(&format!("    Payload: {}", record.payload.bright_yellow()));
        out(&format!(
            "    Info:    Reason [{:?}] | Status [{}] | Time [{}ms]",
            record.reason,
            record
                .response_status
                .map_or("N/A".to_string(), |s| s.to_string())
                .cyan(),
            record.elapsed_ms.to_string().dimmed()
        ));
        out(&format!("    curl:    {}", record.curl.dimmed()));
        out(&"──────────────────────────────────────────".dimmed().to_string());
    }

    fn on_progress(&self, phase: &str, current: usize, total: usize) {
        use colored::*;
        use std::io::Write;
        if total > 0 {
            print!(
                "{}\r\n",
                format!("[*] {} ({}/{})", phase, current, total).bright_cyan()
            );
        } else {
            print!("{}\r\n", format!("[*] {}", phase).bright_cyan());
        }
        std::io::stdout().flush().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = FuzzConfig::default();
        assert_eq!(config.max_combinations, 64);
        assert_eq!(config.marker, "hacker");
        assert_eq!(config.policy().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_json_round_trip() {
        let raw = r#"{"deviceUrl":"http://192.168.0.1/goform/WifiBasicSet","timeout":10}"#;
        let config: FuzzConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.device_url, "http://192.168.0.1/goform/WifiBasicSet");
        assert_eq!(config.timeout, 10);
        assert_eq!(config.retries, 3);
    }
}
