//! Structured lifecycle events for POD registration and checks.
//!
//! Events are emitted at `info!` level with an `event` field so they can be
//! filtered out of JSON log streams (`RUST_LOG=podkit=info`).

use tracing::{info, warn};

/// RAII guard that tags every log line inside it with the POD name.
pub struct PodSpan {
    _span: tracing::span::EnteredSpan,
}

impl PodSpan {
    pub fn enter(pod: &str) -> Self {
        let span = tracing::info_span!("podkit.pod", pod = %pod);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_pod_registered(pod: &str, digest: &str, warnings: usize) {
    info!(
        event = "pod.registered",
        pod = %pod,
        digest = %&digest[..12.min(digest.len())],
        warnings = warnings,
    );
}

pub fn emit_pod_rejected(pod: &str, reasons: &[String]) {
    warn!(event = "pod.rejected", pod = %pod, reasons = ?reasons);
}

/// Emit event: descriptor validation finished.
pub fn emit_validation_finished(pod: &str, errors: usize, warnings: usize) {
    info!(
        event = "pod.validated",
        pod = %pod,
        errors = errors,
        warnings = warnings,
        valid = errors == 0,
    );
}

/// Emit event: input-file check finished for one case.
pub fn emit_inputs_checked(pod: &str, case: &str, found: usize, missing_required: usize) {
    info!(
        event = "pod.inputs_checked",
        pod = %pod,
        case = %case,
        found = found,
        missing_required = missing_required,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_span_enter() {
        let _span = PodSpan::enter("tropical_pacific_sea_level");
        emit_validation_finished("tropical_pacific_sea_level", 0, 1);
    }
}
