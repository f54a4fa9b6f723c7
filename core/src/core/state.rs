/// Run-state persistence for resume after an interrupted campaign.
///
/// Checkpointed after each mutation target reaches a terminal state. Atomic
/// write (tmp + rename) so a kill mid-flush never corrupts the file.
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::TargetState;

const STATE_FILE: &str = ".cuefuzz-state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTarget {
    pub param: String,
    pub state: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunState {
    pub device: String,
    pub pending_targets: Vec<String>,
    pub completed: Vec<CompletedTarget>,
    pub started_at: String,
    pub last_checkpoint: String,
}

impl RunState {
    pub fn new(device: &str, targets: Vec<String>) -> Self {
        let now = unix_stamp();
        Self {
            device: device.to_string(),
            pending_targets: targets,
            completed: Vec::new(),
            started_at: now.clone(),
            last_checkpoint: now,
        }
    }

    pub fn default_path() -> &'static str {
        STATE_FILE
    }

    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let tmp = format!("{}.tmp", path);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &str) -> Option<Self> {
        let data = fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }

    /// Marks one target terminal and flushes to disk.
    pub fn checkpoint(
        &mut self,
        path: &str,
        param: &str,
        state: TargetState,
    ) -> anyhow::Result<()> {
        self.pending_targets.retain(|p| p != param);
        self.completed.push(CompletedTarget {
            param: param.to_string(),
            state: state.to_string(),
        });
        self.last_checkpoint = unix_stamp();
        self.save(path)
    }

    pub fn is_completed(&self, param: &str) -> bool {
        self.completed.iter().any(|c| c.param == param)
    }

    pub fn delete(path: &str) {
        let _ = fs::remove_file(path);
    }

    pub fn exists(path: &str) -> bool {
        Path::new(path).exists()
    }
}

/// Seconds since the Unix epoch, e.g. `"1756489041s"`.
fn unix_stamp() -> String {
    use std::time::SystemTime;
    let dur = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}s", dur.as_secs())
}
