/*!
 * Request admission and breaker-wrapped provider calls.
 *
 * The HTTP/bot handlers translate these decisions into user-facing
 * responses: `RateLimited` becomes a generic short-retry message, `Denied`
 * carries an explicit Retry-After hint, `Stub` serves the deterministic
 * placeholder payload.
 */

use std::future::Future;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::error::AppError;

/// What the handler should do with an incoming scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAdmission {
    /// Run the full scan.
    Proceed,
    /// Reject with a rate-limit response.
    RateLimited,
    /// Reject with an explicit Retry-After hint (seconds).
    Denied { retry_after_secs: u64 },
    /// Serve the deterministic stub payload instead of scanning.
    Stub,
}

/// Admission pipeline for externally-triggered scans: the token bucket runs
/// first, then the auto-guard deny and stub gates.
pub fn admit_scan(ctx: &AppContext) -> ScanAdmission {
    if !ctx.bucket.try_remove() {
        return ScanAdmission::RateLimited;
    }
    let decision = ctx.auto_guard.maybe_deny_heavy_scan();
    if decision.deny {
        return ScanAdmission::Denied {
            retry_after_secs: decision.retry_after_secs.unwrap_or(30),
        };
    }
    if ctx.auto_guard.maybe_force_stub() {
        return ScanAdmission::Stub;
    }
    ScanAdmission::Proceed
}

/// Run one provider call under its breaker with a bounded timeout and
/// attempt count.
///
/// Failures surface as `None`: the scan pipeline proceeds with whatever the
/// other providers returned, at reduced confidence. Timeouts count as
/// breaker failures.
pub async fn guarded_fetch<T, F, Fut>(ctx: &AppContext, provider: &str, op: F) -> Option<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, AppError>>,
{
    let breaker = ctx.breakers.breaker(provider);
    let per_attempt = ctx.config.breaker.provider_timeout();
    for attempt in 0..ctx.config.breaker.provider_attempts {
        if !breaker.allow() {
            ctx.slo.record_breaker_hit();
            debug!(provider, "breaker open, skipping call");
            return None;
        }
        let started = Instant::now();
        match timeout(per_attempt, op()).await {
            Ok(Ok(value)) => {
                breaker.success();
                ctx.slo
                    .record_latency(started.elapsed().as_secs_f64() * 1_000.0);
                return Some(value);
            }
            Ok(Err(err)) => {
                breaker.fail();
                ctx.slo.record_error();
                warn!(provider, attempt, %err, "provider call failed");
            }
            Err(_) => {
                breaker.fail();
                ctx.slo.record_error();
                warn!(
                    provider,
                    attempt,
                    timeout_ms = per_attempt.as_millis() as u64,
                    "provider call timed out"
                );
            }
        }
    }
    None
}
