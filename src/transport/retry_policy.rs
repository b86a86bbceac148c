use crate::error::GatewayError;

/// Retries allowed for the reasoning-conversation bootstrap, beyond the
/// first attempt. No backoff between attempts. Retries never apply to an
/// already-started stream.
pub const BOOTSTRAP_RETRY_MAX: u32 = 2;

/// Whether a failed bootstrap attempt may be retried. Only transient
/// failures (connect/timeout, 5xx) qualify; a deterministic rejection goes
/// straight to the fallback path.
#[must_use]
pub fn should_retry_bootstrap(err: &GatewayError, attempt: u32) -> bool {
    attempt < BOOTSTRAP_RETRY_MAX && err.is_transient()
}
