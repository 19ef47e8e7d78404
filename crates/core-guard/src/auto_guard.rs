//! Escalation ladder and budget clamp.
//!
//! Two pressure sources compose here without masking each other: SLO breach
//! events advance a saturating step ladder, while the budget guard can
//! impose a time-bounded clamp directly. Request handlers consult
//! [`AutoGuard::maybe_deny_heavy_scan`] and [`AutoGuard::maybe_force_stub`],
//! which read both.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::events::{EventBus, GuardEvent};
use crate::time::epoch_ms;

/// Lowest value the ladder will clamp the rate-limit ceiling to.
const RL_FLOOR: u32 = 5;
const MAX_STEP: u8 = 3;
const RETRY_AFTER_CLAMP_SECS: u64 = 60;
const RETRY_AFTER_STEP_SECS: u64 = 30;
const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Behaviour knobs for the guard.
#[derive(Debug, Clone)]
pub struct AutoGuardConfig {
    pub enabled: bool,
    /// Breach-free interval after which the step ladder resets to 0.
    pub calm: Duration,
    /// Restore the runtime overrides to their baselines on calm reset.
    /// Off by default: tightening is one-way until an operator resets it.
    pub revert_overrides_on_calm: bool,
    /// Operator override forcing every scan to the stub path.
    pub force_stub: bool,
}

impl Default for AutoGuardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            calm: Duration::from_secs(300),
            revert_overrides_on_calm: false,
            force_stub: false,
        }
    }
}

/// Mutable admission knobs the escalation ladder tightens.
///
/// Owned by the application context and shared with whatever enforces them.
/// The guard only ever tightens these, or restores the baselines when
/// configured to revert on calm.
#[derive(Debug)]
pub struct RuntimeOverrides {
    rl_max: AtomicU32,
    strict_content_type: AtomicBool,
    baseline_rl_max: u32,
    baseline_strict: bool,
}

impl RuntimeOverrides {
    pub fn new(rl_max: u32, strict_content_type: bool) -> Self {
        Self {
            rl_max: AtomicU32::new(rl_max),
            strict_content_type: AtomicBool::new(strict_content_type),
            baseline_rl_max: rl_max,
            baseline_strict: strict_content_type,
        }
    }

    /// Current per-window request ceiling for the rate-limit layer.
    pub fn rl_max(&self) -> u32 {
        self.rl_max.load(Ordering::Relaxed)
    }

    pub fn strict_content_type(&self) -> bool {
        self.strict_content_type.load(Ordering::Relaxed)
    }

    /// Halve the rate-limit ceiling, never below the floor.
    pub fn halve_rl_max(&self) {
        let current = self.rl_max.load(Ordering::Relaxed);
        self.rl_max.store((current / 2).max(RL_FLOOR), Ordering::Relaxed);
    }

    pub fn force_strict_content_type(&self) {
        self.strict_content_type.store(true, Ordering::Relaxed);
    }

    /// Return both knobs to their configured baselines.
    pub fn restore_baseline(&self) {
        self.rl_max.store(self.baseline_rl_max, Ordering::Relaxed);
        self.strict_content_type
            .store(self.baseline_strict, Ordering::Relaxed);
    }
}

/// Externally imposed degradation window, from the budget guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Clamp {
    pub degrade: bool,
    pub deny: bool,
    pub stub: bool,
    /// Epoch-ms expiry; `None` means until explicitly replaced.
    pub until_ms: Option<u64>,
}

impl Clamp {
    pub fn degrade_until(until_ms: u64) -> Self {
        Self {
            degrade: true,
            until_ms: Some(until_ms),
            ..Default::default()
        }
    }

    pub fn deny_until(until_ms: u64) -> Self {
        Self {
            deny: true,
            until_ms: Some(until_ms),
            ..Default::default()
        }
    }

    pub fn stub_until(until_ms: u64) -> Self {
        Self {
            stub: true,
            until_ms: Some(until_ms),
            ..Default::default()
        }
    }

    fn expired(&self, now_ms: u64) -> bool {
        self.until_ms.map_or(false, |until| now_ms >= until)
    }
}

/// Outcome of the heavy-scan admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenyDecision {
    pub deny: bool,
    /// Seconds the caller should advertise in a Retry-After hint.
    pub retry_after_secs: Option<u64>,
}

impl DenyDecision {
    pub const ALLOW: DenyDecision = DenyDecision {
        deny: false,
        retry_after_secs: None,
    };
}

#[derive(Debug, Default)]
struct GuardState {
    step: u8,
    last_breach_ms: u64,
    clamp: Option<Clamp>,
}

/// The escalation state machine. One instance per process.
#[derive(Debug)]
pub struct AutoGuard {
    config: AutoGuardConfig,
    overrides: Arc<RuntimeOverrides>,
    state: Mutex<GuardState>,
}

impl AutoGuard {
    pub fn new(config: AutoGuardConfig, overrides: Arc<RuntimeOverrides>) -> Self {
        Self {
            config,
            overrides,
            state: Mutex::new(GuardState::default()),
        }
    }

    /// Subscribe this guard's breach handler on `bus`. No-op when disabled.
    pub fn attach(self: Arc<Self>, bus: &EventBus) {
        if !self.config.enabled {
            return;
        }
        bus.subscribe(move |event| {
            if matches!(event, GuardEvent::Breach(_)) {
                self.on_breach();
            }
        });
    }

    pub fn on_breach(&self) {
        self.on_breach_at(epoch_ms());
    }

    pub fn on_breach_at(&self, now_ms: u64) {
        if !self.config.enabled {
            return;
        }
        let step = {
            let mut state = self.state.lock().unwrap();
            state.last_breach_ms = now_ms;
            if state.step < MAX_STEP {
                state.step += 1;
            }
            state.step
        };
        if step >= 1 {
            self.overrides.halve_rl_max();
        }
        if step >= 2 {
            self.overrides.force_strict_content_type();
        }
        warn!(
            step,
            rl_max = self.overrides.rl_max(),
            strict = self.overrides.strict_content_type(),
            "auto-guard escalated"
        );
    }

    /// Periodic maintenance: calm reset and clamp expiry.
    pub fn tick(&self) {
        self.tick_at(epoch_ms());
    }

    pub fn tick_at(&self, now_ms: u64) {
        let mut state = self.state.lock().unwrap();
        if state.step > 0
            && now_ms.saturating_sub(state.last_breach_ms) >= self.config.calm.as_millis() as u64
        {
            state.step = 0;
            info!("auto-guard calm interval elapsed, step reset");
            if self.config.revert_overrides_on_calm {
                self.overrides.restore_baseline();
            }
        }
        if state.clamp.map_or(false, |clamp| clamp.expired(now_ms)) {
            state.clamp = None;
            info!("budget clamp expired");
        }
    }

    /// Background ticker; spawn with `tokio::spawn(guard.run())`.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
            self.tick();
        }
    }

    pub fn step(&self) -> u8 {
        self.state.lock().unwrap().step
    }

    pub fn last_breach_at(&self) -> u64 {
        self.state.lock().unwrap().last_breach_ms
    }

    pub fn clamp(&self) -> Option<Clamp> {
        self.state.lock().unwrap().clamp
    }

    /// Deny expensive scan paths under sustained stress or a deny clamp.
    pub fn maybe_deny_heavy_scan(&self) -> DenyDecision {
        self.maybe_deny_heavy_scan_at(epoch_ms())
    }

    pub fn maybe_deny_heavy_scan_at(&self, now_ms: u64) -> DenyDecision {
        if !self.config.enabled {
            return DenyDecision::ALLOW;
        }
        let mut state = self.state.lock().unwrap();
        if state.clamp.map_or(false, |clamp| clamp.expired(now_ms)) {
            state.clamp = None;
        }
        if state.clamp.map_or(false, |clamp| clamp.deny) {
            return DenyDecision {
                deny: true,
                retry_after_secs: Some(RETRY_AFTER_CLAMP_SECS),
            };
        }
        if state.step >= MAX_STEP {
            return DenyDecision {
                deny: true,
                retry_after_secs: Some(RETRY_AFTER_STEP_SECS),
            };
        }
        DenyDecision::ALLOW
    }

    /// True when callers should substitute a deterministic stub result
    /// instead of scanning. A fail-safe response, not a fail-closed error.
    pub fn maybe_force_stub(&self) -> bool {
        self.maybe_force_stub_at(epoch_ms())
    }

    pub fn maybe_force_stub_at(&self, now_ms: u64) -> bool {
        if self.config.force_stub {
            return true;
        }
        if !self.config.enabled {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        match state.clamp {
            Some(clamp) if clamp.expired(now_ms) => {
                state.clamp = None;
                false
            }
            Some(clamp) => clamp.stub,
            None => false,
        }
    }

    /// Apply a budget clamp, independent of the step ladder.
    pub fn set_budget_clamp(&self, clamp: Clamp) {
        self.state.lock().unwrap().clamp = Some(clamp);
        if clamp.degrade {
            self.overrides.halve_rl_max();
        }
        warn!(?clamp, "budget clamp applied");
    }

    /// Degraded from the posting governor's point of view: an active deny or
    /// stub signal, or a non-zero escalation step.
    pub fn is_degraded(&self) -> bool {
        self.is_degraded_at(epoch_ms())
    }

    pub fn is_degraded_at(&self, now_ms: u64) -> bool {
        self.maybe_deny_heavy_scan_at(now_ms).deny
            || self.maybe_force_stub_at(now_ms)
            || (self.config.enabled && self.step() >= 1)
    }
}
