use regex::Regex;
use serde::Serialize;

use crate::core::VulnType;
use crate::http::DeviceResponse;

/// How one send ended at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Device produced an HTTP response.
    Success,
    Timeout,
    /// Connection died mid-exchange.
    ConnectionError,
    /// Retries exhausted without reaching the device.
    Unreachable,
}

/// Result of sending one POC, in context of the liveness probe issued
/// immediately after.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: OutcomeStatus,
    pub response: Option<DeviceResponse>,
    pub elapsed_ms: u64,
    pub alive_after: bool,
}

/// What made an outcome a confirmed vulnerability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmReason {
    /// Liveness probe succeeded before the POC and failed after it.
    CrashOnTrigger,
    /// Response content matched a vulnerability-type indicator.
    IndicatorMatch,
    /// Connection aborted mid-response while the device as a whole stayed
    /// up: the forked request handler died on the probe input.
    ConnectionAbort,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Benign,
    Suspicious,
    Confirmed(ConfirmReason),
}

/// Per-vulnerability-type response indicators.
///
/// The garble heuristic is device-specific; keep it swappable rather than
/// baked into the classification logic.
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    pub overflow: Vec<Regex>,
    pub cmdi: Vec<Regex>,
    pub crash_status: Vec<u16>,
}

impl IndicatorSet {
    /// Default indicators, with cmdi detection keyed to the echoed marker.
    pub fn with_marker(marker: &str) -> Self {
        Self {
            overflow: vec![
                Regex::new(r"(?i)internal server error").unwrap(),
                // Runs of control bytes where text belongs.
                Regex::new(r"[\x00-\x08\x0e-\x1f]{4,}").unwrap(),
            ],
            cmdi: vec![Regex::new(&regex::escape(marker)).unwrap()],
            crash_status: vec![500],
        }
    }

    fn patterns_for(&self, vuln_type: VulnType) -> &[Regex] {
        match vuln_type {
            VulnType::Overflow => &self.overflow,
            VulnType::Cmdi => &self.cmdi,
        }
    }
}

/// Classifies execution outcomes as benign, suspicious, or confirmed.
pub struct VerificationMonitor {
    indicators: IndicatorSet,
    latency_factor: f64,
}

impl VerificationMonitor {
    pub fn new(indicators: IndicatorSet, latency_factor: f64) -> Self {
        Self {
            indicators,
            latency_factor,
        }
    }

    /// `alive_before` is the liveness result from just before the POC went
    /// out; `baseline_ms` the latency of the benign probe at run start.
    pub fn classify(
        &self,
        outcome: &ExecutionOutcome,
        alive_before: bool,
        vuln_type: VulnType,
        baseline_ms: u64,
    ) -> Verdict {
        if outcome.status == OutcomeStatus::Unreachable {
            // No byte of the POC reached the device; a failing probe after
            // an undelivered send cannot be attributed to it.
            return Verdict::Suspicious;
        }

        if !outcome.alive_after {
            // A probe that already failed before the POC must not be
            // attributed to it.
            return if alive_before {
                Verdict::Confirmed(ConfirmReason::CrashOnTrigger)
            } else {
                Verdict::Suspicious
            };
        }

        match outcome.status {
            OutcomeStatus::ConnectionError => {
                // Handler process died but the listener respawned. For an
                // overflow probe that abort is the memory-corruption signal
                // itself; for cmdi it proves nothing by itself.
                if vuln_type == VulnType::Overflow && alive_before {
                    Verdict::Confirmed(ConfirmReason::ConnectionAbort)
                } else {
                    Verdict::Suspicious
                }
            }
            OutcomeStatus::Timeout | OutcomeStatus::Unreachable => Verdict::Suspicious,
            OutcomeStatus::Success => self.classify_response(outcome, vuln_type, baseline_ms),
        }
    }

    fn classify_response(
        &self,
        outcome: &ExecutionOutcome,
        vuln_type: VulnType,
        baseline_ms: u64,
    ) -> Verdict {
        let Some(response) = &outcome.response else {
            return Verdict::Suspicious;
        };

        if self.indicators.crash_status.contains(&response.status) {
            return Verdict::Confirmed(ConfirmReason::IndicatorMatch);
        }
        for pattern in self.indicators.patterns_for(vuln_type) {
            if pattern.is_match(&response.body) {
                return Verdict::Confirmed(ConfirmReason::IndicatorMatch);
            }
        }

        if baseline_ms > 0 && outcome.elapsed_ms as f64 > self.latency_factor * baseline_ms as f64 {
            return Verdict::Suspicious;
        }
        if vuln_type == VulnType::Overflow && response.body.is_empty() {
            return Verdict::Suspicious;
        }
        Verdict::Benign
    }

    /// True when a fetched webroot artifact proves the injected command ran.
    pub fn marker_fetched(response: &DeviceResponse, marker: &str) -> bool {
        response.body.trim() == marker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> VerificationMonitor {
        VerificationMonitor::new(IndicatorSet::with_marker("hacker"), 3.0)
    }

    fn outcome(status: OutcomeStatus, response: Option<DeviceResponse>, alive: bool) -> ExecutionOutcome {
        ExecutionOutcome {
            status,
            response,
            elapsed_ms: 50,
            alive_after: alive,
        }
    }

    fn ok_response(body: &str) -> Option<DeviceResponse> {
        Some(DeviceResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    #[test]
    fn test_crash_on_trigger_confirmed() {
        let o = outcome(OutcomeStatus::Success, ok_response("x"), false);
        let v = monitor().classify(&o, true, VulnType::Overflow, 20);
        assert_eq!(v, Verdict::Confirmed(ConfirmReason::CrashOnTrigger));
    }

    #[test]
    fn test_pre_existing_failure_is_suspicious_not_confirmed() {
        // Device was already down before the POC: same probe failure must
        // not be misattributed.
        let o = outcome(OutcomeStatus::Unreachable, None, false);
        let v = monitor().classify(&o, false, VulnType::Overflow, 20);
        assert_eq!(v, Verdict::Suspicious);
    }

    #[test]
    fn test_undelivered_send_never_confirms_crash() {
        // Every connect attempt was refused, then the probe failed too: an
        // outage, not a crash triggered by a POC that never arrived.
        let o = outcome(OutcomeStatus::Unreachable, None, false);
        let v = monitor().classify(&o, true, VulnType::Overflow, 20);
        assert_eq!(v, Verdict::Suspicious);
    }

    #[test]
    fn test_http_500_confirmed() {
        let o = outcome(
            OutcomeStatus::Success,
            Some(DeviceResponse { status: 500, body: String::new() }),
            true,
        );
        let v = monitor().classify(&o, true, VulnType::Overflow, 20);
        assert_eq!(v, Verdict::Confirmed(ConfirmReason::IndicatorMatch));
    }

    #[test]
    fn test_echoed_marker_confirms_cmdi() {
        let o = outcome(OutcomeStatus::Success, ok_response("ok hacker ok"), true);
        let v = monitor().classify(&o, true, VulnType::Cmdi, 20);
        assert_eq!(v, Verdict::Confirmed(ConfirmReason::IndicatorMatch));
    }

    #[test]
    fn test_marker_does_not_confirm_overflow() {
        let o = outcome(OutcomeStatus::Success, ok_response("ok hacker ok"), true);
        let v = monitor().classify(&o, true, VulnType::Overflow, 20);
        assert_eq!(v, Verdict::Benign);
    }

    #[test]
    fn test_garbled_body_confirms_overflow() {
        let garbled = format!("resp{}", "\u{0001}\u{0002}\u{0003}\u{0004}\u{0005}");
        let o = outcome(OutcomeStatus::Success, ok_response(&garbled), true);
        let v = monitor().classify(&o, true, VulnType::Overflow, 20);
        assert_eq!(v, Verdict::Confirmed(ConfirmReason::IndicatorMatch));
    }

    #[test]
    fn test_connection_abort_confirms_overflow_only() {
        let o = outcome(OutcomeStatus::ConnectionError, None, true);
        let m = monitor();
        assert_eq!(
            m.classify(&o, true, VulnType::Overflow, 20),
            Verdict::Confirmed(ConfirmReason::ConnectionAbort)
        );
        assert_eq!(m.classify(&o, true, VulnType::Cmdi, 20), Verdict::Suspicious);
    }

    #[test]
    fn test_elevated_latency_is_suspicious() {
        let mut o = outcome(OutcomeStatus::Success, ok_response("fine"), true);
        o.elapsed_ms = 500;
        let v = monitor().classify(&o, true, VulnType::Cmdi, 20);
        assert_eq!(v, Verdict::Suspicious);
    }

    #[test]
    fn test_normal_response_is_benign() {
        let o = outcome(OutcomeStatus::Success, ok_response("saved"), true);
        let v = monitor().classify(&o, true, VulnType::Cmdi, 20);
        assert_eq!(v, Verdict::Benign);
    }

    #[test]
    fn test_marker_fetch() {
        let r = DeviceResponse { status: 200, body: "hacker\n".to_string() };
        assert!(VerificationMonitor::marker_fetched(&r, "hacker"));
        let r = DeviceResponse { status: 200, body: String::new() };
        assert!(!VerificationMonitor::marker_fetched(&r, "hacker"));
    }
}
