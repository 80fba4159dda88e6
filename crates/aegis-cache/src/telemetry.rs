//! Dependency telemetry for remote store calls.
//!
//! Every remote call made through a pooled connection can be reported to a
//! [`DependencyTelemetry`] sink. Reporting never influences the call: a sink
//! that panics is caught and logged, and a cache without a sink behaves the
//! same as one with it.

use aegis_core::StoreResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Metric names for dependency calls.
pub mod names {
    /// Total remote store calls.
    pub const DEPENDENCY_CALLS_TOTAL: &str = "aegis_cache_dependency_calls_total";
    /// Remote store call duration in seconds.
    pub const DEPENDENCY_DURATION_SECONDS: &str = "aegis_cache_dependency_duration_seconds";
}

/// Register metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::DEPENDENCY_CALLS_TOTAL,
        "Total number of remote cache store calls"
    );
    describe_histogram!(
        names::DEPENDENCY_DURATION_SECONDS,
        "Remote cache store call duration in seconds"
    );
}

/// Outcome of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// Failed with the given store error code.
    Failure(&'static str),
}

impl CallOutcome {
    /// Short label, usable as a metric tag.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "OK",
            Self::Failure(code) => *code,
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One remote call, as reported to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyCall {
    /// Store command, e.g. `HMGET`.
    pub operation: &'static str,
    /// Store identity, e.g. `cache.internal:6379`.
    pub target: String,
    /// Id of the connection the call ran on.
    pub connection_id: u64,
    pub duration: Duration,
    pub outcome: CallOutcome,
    /// Error message; only set on failure.
    pub error: Option<String>,
}

/// Receives dependency calls.
#[cfg_attr(test, mockall::automock)]
pub trait DependencyTelemetry: Send + Sync {
    fn track_dependency(&self, call: &DependencyCall);
}

/// Records dependency calls as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl DependencyTelemetry for TracingTelemetry {
    fn track_dependency(&self, call: &DependencyCall) {
        let duration_ms = u64::try_from(call.duration.as_millis()).unwrap_or(u64::MAX);
        match &call.error {
            None => debug!(
                operation = call.operation,
                target_host = %call.target,
                connection_id = call.connection_id,
                duration_ms,
                "Dependency call succeeded"
            ),
            Some(error) => warn!(
                operation = call.operation,
                target_host = %call.target,
                connection_id = call.connection_id,
                duration_ms,
                outcome = call.outcome.as_str(),
                error = %error,
                "Dependency call failed"
            ),
        }
    }
}

/// Records dependency calls through the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsTelemetry;

impl DependencyTelemetry for MetricsTelemetry {
    fn track_dependency(&self, call: &DependencyCall) {
        counter!(
            names::DEPENDENCY_CALLS_TOTAL,
            "operation" => call.operation,
            "target" => call.target.clone(),
            "outcome" => call.outcome.as_str()
        )
        .increment(1);

        histogram!(
            names::DEPENDENCY_DURATION_SECONDS,
            "operation" => call.operation,
            "target" => call.target.clone()
        )
        .record(call.duration.as_secs_f64());
    }
}

/// Optional sink plus the success-reporting switch.
#[derive(Clone, Default)]
pub(crate) struct TelemetryHandle {
    sink: Option<Arc<dyn DependencyTelemetry>>,
    track_success: bool,
}

impl TelemetryHandle {
    pub(crate) fn new(sink: Arc<dyn DependencyTelemetry>, track_success: bool) -> Self {
        Self {
            sink: Some(sink),
            track_success,
        }
    }

    /// Reports a finished call. Failures are always reported; successes only
    /// when enabled.
    pub(crate) fn record<T>(
        &self,
        operation: &'static str,
        target: &str,
        connection_id: u64,
        duration: Duration,
        result: &StoreResult<T>,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };
        if result.is_ok() && !self.track_success {
            return;
        }

        let (outcome, error) = match result {
            Ok(_) => (CallOutcome::Success, None),
            Err(e) => (CallOutcome::Failure(e.error_code()), Some(e.to_string())),
        };
        let call = DependencyCall {
            operation,
            target: target.to_string(),
            connection_id,
            duration,
            outcome,
            error,
        };

        if catch_unwind(AssertUnwindSafe(|| sink.track_dependency(&call))).is_err() {
            warn!(operation, "Dependency telemetry sink panicked; call ignored");
        }
    }
}

impl std::fmt::Debug for TelemetryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryHandle")
            .field("enabled", &self.sink.is_some())
            .field("track_success", &self.track_success)
            .finish()
    }
}
