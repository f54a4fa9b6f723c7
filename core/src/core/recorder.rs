use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::SystemTime;

use log::warn;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::assembler::Poc;
use crate::core::VulnType;
use crate::utils::monitor::{ConfirmReason, ExecutionOutcome, OutcomeStatus};
use crate::SinkRef;

/// A confirmed POC on its way from the scheduler to durable storage.
#[derive(Debug)]
pub struct Finding {
    pub poc: Poc,
    pub outcome: ExecutionOutcome,
    pub reason: ConfirmReason,
}

/// Durable record of one confirmed vulnerability, with everything needed to
/// reproduce it.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessRecord {
    pub target_param: String,
    pub vuln_type: VulnType,
    /// Final serialized request body.
    pub payload: String,
    pub seq: usize,
    pub tuple_id: usize,
    pub assignments: Vec<(String, String)>,
    pub reason: ConfirmReason,
    pub status: OutcomeStatus,
    pub response_status: Option<u16>,
    pub elapsed_ms: u64,
    pub alive_after: bool,
    pub recorded_at: String,
    pub curl: String,
}

impl SuccessRecord {
    fn from_finding(finding: &Finding, endpoint: &str) -> Self {
        let poc = &finding.poc;
        let payload = poc.body();
        let curl = format!(
            "curl -X POST '{}' -H 'Content-Type: application/x-www-form-urlencoded' -d '{}' --insecure",
            endpoint, payload
        );
        Self {
            target_param: poc.target_param.clone(),
            vuln_type: poc.vuln_type,
            payload,
            seq: poc.seq,
            tuple_id: poc.tuple.id,
            assignments: poc.tuple.assignments.clone(),
            reason: finding.reason,
            status: finding.outcome.status,
            response_status: finding.outcome.response.as_ref().map(|r| r.status),
            elapsed_ms: finding.outcome.elapsed_ms,
            alive_after: finding.outcome.alive_after,
            recorded_at: unix_stamp(),
            curl,
        }
    }
}

/// Persists confirmed POCs, exactly once per `(target, tuple)` pair.
pub struct SuccessRecorder;

impl SuccessRecorder {
    /// Drains the findings channel until the scheduler drops its sender.
    /// Each record goes into its own JSON file (atomic tmp + rename) in the
    /// per-device success directory, plus an appended `findings.jsonl`
    /// stream; repeated confirmations of the same pair are dropped.
    pub async fn run(
        mut receiver: mpsc::Receiver<Finding>,
        success_dir: PathBuf,
        endpoint: String,
        sink: SinkRef,
    ) -> Vec<SuccessRecord> {
        if let Err(e) = fs::create_dir_all(&success_dir) {
            sink.on_log(
                "error",
                &format!("[!] cannot create success dir {:?}: {}", success_dir, e),
            );
            return Vec::new();
        }

        let stream_path = success_dir.join("findings.jsonl");
        let mut stream = match fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stream_path)
        {
            Ok(f) => Some(f),
            Err(e) => {
                warn!("findings stream {:?} unavailable: {}", stream_path, e);
                None
            }
        };

        let mut records = Vec::new();
        let mut seen: HashSet<(String, usize)> = HashSet::new();

        while let Some(finding) = receiver.recv().await {
            let key = (finding.poc.target_param.clone(), finding.poc.tuple.id);
            if !seen.insert(key) {
                continue;
            }

            let record = SuccessRecord::from_finding(&finding, &endpoint);
            let path = success_dir.join(format!("{}_{}.json", record.target_param, record.seq));
            if let Err(e) = write_atomic(&path, &record) {
                sink.on_log("error", &format!("[!] failed to persist {:?}: {}", path, e));
            }
            if let Some(ref mut f) = stream {
                if let Ok(line) = serde_json::to_string(&record) {
                    let _ = writeln!(f, "{}", line);
                }
            }

            sink.on_finding(&record);
            records.push(record);
        }
        records
    }

    pub fn report_summary(records: &[SuccessRecord], sink: &SinkRef) {
        if records.is_empty() {
            sink.on_log("success", "[+] No confirmed vulnerabilities.");
            return;
        }
        sink.on_log(
            "warn",
            &format!("[+] {} confirmed finding(s):", records.len()),
        );
        for (i, r) in records.iter().enumerate() {
            sink.on_log(
                "error",
                &format!(
                    "  #{} {} on '{}' via tuple {} ({:?})",
                    i + 1,
                    r.vuln_type,
                    r.target_param,
                    r.tuple_id,
                    r.reason
                ),
            );
        }
    }
}

/// Atomic write: serialize to .tmp, then rename over the real file.
fn write_atomic(path: &std::path::Path, record: &SuccessRecord) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(record)?;
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Seconds since the Unix epoch, e.g. `"1756489041s"`.
fn unix_stamp() -> String {
    let dur = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}s", dur.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expander::AssignmentTuple;
    use crate::core::packet::DataPacket;
    use crate::http::DeviceResponse;
    use crate::EventSink;
    use std::sync::Arc;

    struct QuietSink;
    impl EventSink for QuietSink {
        fn on_log(&self, _level: &str, _message: &str) {}
        fn on_finding(&self, _record: &SuccessRecord) {}
        fn on_progress(&self, _phase: &str, _current: usize, _total: usize) {}
    }

    fn finding(tuple_id: usize, seq: usize) -> Finding {
        Finding {
            poc: Poc {
                seq,
                packet: DataPacket::parse("ssid=AAAA&hideSsid=0"),
                target_param: "ssid".to_string(),
                vuln_type: VulnType::Overflow,
                tuple: AssignmentTuple {
                    id: tuple_id,
                    assignments: vec![("hideSsid".to_string(), "0".to_string())],
                },
            },
            outcome: ExecutionOutcome {
                status: OutcomeStatus::Success,
                response: Some(DeviceResponse { status: 500, body: String::new() }),
                elapsed_ms: 42,
                alive_after: true,
            },
            reason: ConfirmReason::IndicatorMatch,
        }
    }

    #[tokio::test]
    async fn test_idempotent_per_target_tuple_pair() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(SuccessRecorder::run(
            rx,
            dir.path().to_path_buf(),
            "http://192.168.0.1/goform/WifiBasicSet".to_string(),
            Arc::new(QuietSink),
        ));

        tx.send(finding(3, 1)).await.unwrap();
        tx.send(finding(3, 1)).await.unwrap();
        tx.send(finding(4, 2)).await.unwrap();
        drop(tx);

        let records = task.await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(dir.path().join("ssid_1.json").exists());
        assert!(dir.path().join("ssid_2.json").exists());
        assert!(dir.path().join("findings.jsonl").exists());
    }

    #[tokio::test]
    async fn test_record_round_trips_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(2);
        let task = tokio::spawn(SuccessRecorder::run(
            rx,
            dir.path().to_path_buf(),
            "http://device/".to_string(),
            Arc::new(QuietSink),
        ));
        tx.send(finding(0, 1)).await.unwrap();
        drop(tx);
        let records = task.await.unwrap();

        let raw = fs::read_to_string(dir.path().join("ssid_1.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["target_param"], "ssid");
        assert_eq!(parsed["vuln_type"], "overflow");
        assert_eq!(parsed["payload"], "ssid=AAAA&hideSsid=0");
        assert_eq!(parsed["response_status"], 500);
        assert!(records[0].curl.contains("ssid=AAAA"));
        let stamp = parsed["recorded_at"].as_str().unwrap();
        assert!(stamp.strip_suffix('s').unwrap().parse::<u64>().is_ok());
    }
}
