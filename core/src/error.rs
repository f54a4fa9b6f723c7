use thiserror::Error;

/// Error taxonomy for the engine.
///
/// `DeviceCrashed` is deliberately absent: a crash inferred from the liveness
/// probe is a positive detection routed through the verification monitor, not
/// a failure. Transient transport errors live in [`crate::http::TransportError`]
/// because they are retried inside the scheduler and never escape it.
#[derive(Debug, Error)]
pub enum FuzzError {
    /// Malformed or over-limit oracle output. Fatal to that analysis step;
    /// no partial POC generation happens from it.
    #[error("oracle contract violation: {0}")]
    OracleContractViolation(String),

    /// Payload assembly inconsistency between template, target, and
    /// assignment tuple. Fatal to that mutation target only.
    #[error("template mismatch: {0}")]
    TemplateMismatch(String),

    /// Expansion or target count exceeded a configured cap. Truncated, not
    /// fatal; surfaced for visibility.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The inference service could not be reached or returned garbage at the
    /// transport level (HTTP errors, empty completions).
    #[error("inference service failure: {0}")]
    Inference(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
