use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::core::assembler;
use crate::core::expander::{AssignmentTuple, ValueSpace};
use crate::core::packet::DataPacket;
use crate::core::recorder::Finding;
use crate::core::{MutationTarget, TargetState, VulnType};
use crate::http::{DeviceResponse, DeviceTransport, TransportError};
use crate::utils::monitor::{
    ConfirmReason, ExecutionOutcome, OutcomeStatus, Verdict, VerificationMonitor,
};
use crate::utils::probes::ProbeFactory;
use crate::SinkRef;

/// Scheduling policy for one device run.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries on transient connect failure before a send counts as
    /// unreachable.
    pub retries: u32,
    /// First backoff step; doubles per retry, capped at `timeout` so a
    /// cancellation never waits longer than one attempt.
    pub initial_backoff: Duration,
    /// Inter-request delay floor.
    pub request_gap: Duration,
    /// Cap on assignment tuples per target.
    pub max_combinations: usize,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 3,
            initial_backoff: Duration::from_millis(200),
            request_gap: Duration::from_millis(500),
            max_combinations: 64,
        }
    }
}

/// One mutation target and its expansion space.
pub struct TargetPlan {
    pub target: MutationTarget,
    pub space: ValueSpace,
}

/// Terminal outcome of one target's run.
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub param: String,
    pub vuln_type: VulnType,
    pub state: TargetState,
    pub attempts: usize,
    pub confirmed_seq: Option<usize>,
    pub error: Option<String>,
}

/// Combinatorial execution scheduler.
///
/// Drives POCs at one device, strictly sequentially: the crash inference in
/// the verification monitor depends on a clean before/after liveness
/// ordering that interleaved requests would invalidate. Distinct devices get
/// distinct engines and run independently.
pub struct FuzzEngine<T: DeviceTransport> {
    transport: Arc<T>,
    monitor: VerificationMonitor,
    probes: ProbeFactory,
    policy: EnginePolicy,
    cancel: Arc<AtomicBool>,
}

impl<T: DeviceTransport> FuzzEngine<T> {
    pub fn new(
        transport: Arc<T>,
        monitor: VerificationMonitor,
        probes: ProbeFactory,
        policy: EnginePolicy,
    ) -> Self {
        Self {
            transport,
            monitor,
            probes,
            policy,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked at every assignment-tuple boundary; set it from a signal
    /// handler to abort without leaving the device mid-send.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Relaxed)
    }

    /// Runs every plan against the device, in order. Confirmed findings go
    /// out over `finding_tx`; one report per target comes back regardless of
    /// how it ended.
    pub async fn run(
        &self,
        template: &DataPacket,
        plans: &[TargetPlan],
        finding_tx: &mpsc::Sender<Finding>,
        sink: &SinkRef,
    ) -> Vec<TargetReport> {
        let probe_started = Instant::now();
        let mut alive = self.transport.probe().await;
        let baseline_ms = if alive {
            probe_started.elapsed().as_millis() as u64
        } else {
            sink.on_log("warn", "[!] device did not answer the baseline probe");
            0
        };

        let total = plans.len();
        let mut reports = Vec::with_capacity(total);
        for (i, plan) in plans.iter().enumerate() {
            sink.on_progress("fuzzing target", i + 1, total);
            let report = if self.cancelled() {
                TargetReport {
                    param: plan.target.param.clone(),
                    vuln_type: plan.target.vuln_type,
                    state: TargetState::Cancelled,
                    attempts: 0,
                    confirmed_seq: None,
                    error: None,
                }
            } else {
                self.run_target(template, plan, finding_tx, sink, baseline_ms, &mut alive)
                    .await
            };
            info!(
                "target '{}' finished after {} attempt(s): {}",
                report.param, report.attempts, report.state
            );
            reports.push(report);
        }
        reports
    }

    async fn run_target(
        &self,
        template: &DataPacket,
        plan: &TargetPlan,
        finding_tx: &mpsc::Sender<Finding>,
        sink: &SinkRef,
        baseline_ms: u64,
        alive: &mut bool,
    ) -> TargetReport {
        let target = &plan.target;
        let probe_value = self.probes.resolve(target.vuln_type);
        let mut report = TargetReport {
            param: target.param.clone(),
            vuln_type: target.vuln_type,
            state: TargetState::Probing,
            attempts: 0,
            confirmed_seq: None,
            error: None,
        };
        let mut reachable_sends = 0usize;

        for tuple in plan.space.tuples(self.policy.max_combinations) {
            if self.cancelled() {
                report.state = TargetState::Cancelled;
                return report;
            }

            let poc = match assembler::assemble(
                template,
                target,
                &tuple,
                &probe_value,
                report.attempts + 1,
            ) {
                Ok(p) => p,
                Err(e) => {
                    // Deterministic for every tuple of this target; give up
                    // on the target, the run continues.
                    error!("assembly failed for '{}': {}", target.param, e);
                    report.state = TargetState::Exhausted;
                    report.error = Some(e.to_string());
                    return report;
                }
            };
            report.attempts += 1;

            sleep(self.policy.request_gap).await;

            let alive_before = *alive;
            let (status, response, elapsed_ms) = self.send_with_retries(&poc.body()).await;
            if status != OutcomeStatus::Unreachable {
                reachable_sends += 1;
            }
            let alive_after = self.transport.probe().await;
            *alive = alive_after;

            let outcome = ExecutionOutcome {
                status,
                response,
                elapsed_ms,
                alive_after,
            };
            let mut verdict =
                self.monitor
                    .classify(&outcome, alive_before, target.vuln_type, baseline_ms);

            // An injected command leaves no trace in the response itself;
            // pull the marker artifact back out of the webroot.
            if verdict == Verdict::Benign && target.vuln_type == VulnType::Cmdi {
                if let Some(artifact) = self.transport.fetch(&self.probes.marker_path()).await {
                    if VerificationMonitor::marker_fetched(&artifact, self.probes.marker()) {
                        verdict = Verdict::Confirmed(ConfirmReason::IndicatorMatch);
                        self.scrub_marker(template, target, &tuple).await;
                    }
                }
            }

            match verdict {
                Verdict::Confirmed(reason) => {
                    debug!(
                        "confirmed '{}' seq {} ({:?})",
                        target.param, poc.seq, reason
                    );
                    report.confirmed_seq = Some(poc.seq);
                    if let Err(e) = finding_tx
                        .send(Finding {
                            poc,
                            outcome,
                            reason,
                        })
                        .await
                    {
                        error!(
                            "confirmed finding for '{}' could not be recorded: {}",
                            target.param, e
                        );
                    }
                    report.state = TargetState::Confirmed;
                    return report;
                }
                Verdict::Suspicious => {
                    warn!(
                        "suspicious outcome for '{}' seq {} ({:?}, {}ms)",
                        target.param, poc.seq, outcome.status, outcome.elapsed_ms
                    );
                    sink.on_log(
                        "warn",
                        &format!(
                            "[?] suspicious: '{}' tuple {} needs manual review",
                            target.param, tuple.id
                        ),
                    );
                }
                Verdict::Benign => {}
            }
        }

        report.state = if report.attempts > 0 && reachable_sends == 0 {
            TargetState::Unreachable
        } else {
            TargetState::Exhausted
        };
        report
    }

    /// One logical send: retries transient connect failures with capped
    /// exponential backoff, passes timeouts and aborts straight through.
    async fn send_with_retries(
        &self,
        body: &str,
    ) -> (OutcomeStatus, Option<DeviceResponse>, u64) {
        let mut elapsed_ms = 0u64;
        for attempt in 0..=self.policy.retries {
            let started = Instant::now();
            let result = self.transport.send(body, self.policy.timeout).await;
            elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(response) => return (OutcomeStatus::Success, Some(response), elapsed_ms),
                Err(TransportError::Timeout) => {
                    return (OutcomeStatus::Timeout, None, elapsed_ms)
                }
                Err(TransportError::Aborted(e)) => {
                    debug!("connection aborted mid-exchange: {}", e);
                    return (OutcomeStatus::ConnectionError, None, elapsed_ms);
                }
                Err(TransportError::Connect(e)) => {
                    if attempt == self.policy.retries || self.cancelled() {
                        break;
                    }
                    let backoff = self.backoff_delay(attempt);
                    debug!(
                        "connect failure ({}), retry {}/{} in {:?}",
                        e,
                        attempt + 1,
                        self.policy.retries,
                        backoff
                    );
                    sleep(backoff).await;
                }
            }
        }
        (OutcomeStatus::Unreachable, None, elapsed_ms)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .policy
            .initial_backoff
            .saturating_mul(1u32 << attempt.min(6));
        let jitter = Duration::from_millis(rand::rng().random_range(0..50));
        (exp + jitter).min(self.policy.timeout)
    }

    /// Best-effort removal of the marker file a confirmed injection wrote.
    async fn scrub_marker(
        &self,
        template: &DataPacket,
        target: &MutationTarget,
        tuple: &AssignmentTuple,
    ) {
        if let Ok(poc) =
            assembler::assemble(template, target, tuple, &self.probes.cleanup_fragment(), 0)
        {
            let _ = self.transport.send(&poc.body(), self.policy.timeout).await;
        }
    }
}
