//! Per-provider circuit breaker.
//!
//! Each upstream data provider gets an independent breaker so one failing
//! dependency does not block the others. Opening is failure-count driven;
//! closing from half-open requires a streak of consecutive successes, which
//! keeps an intermittently healthy upstream from flapping the gate.
//!
//! The breaker never retries on its own. Callers check
//! [`allow`](Breaker::allow) before each attempt and report the outcome with
//! [`success`](Breaker::success) or [`fail`](Breaker::fail); retry policy
//! belongs to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::time::epoch_ms;

/// Tuning for a single breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures required to open the gate.
    pub threshold: u32,
    /// How long the gate stays open before trial calls are allowed again.
    pub cooldown: Duration,
    /// Consecutive successes required to fully close from half-open.
    pub close_after: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            cooldown: Duration::from_secs(60),
            close_after: 3,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Gate closed: calls allowed, upstream trusted.
    Ok,
    /// Cooldown elapsed, accumulating trial successes before fully closing.
    HalfOpen,
    /// Gate blocking calls until the cooldown elapses.
    Open,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Ok => "ok",
            BreakerState::HalfOpen => "half-open",
            BreakerState::Open => "open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    fails: u32,
    opened_until_ms: u64,
    success_streak: u32,
    last_transition_ms: u64,
}

/// Circuit breaker for one upstream provider.
#[derive(Debug)]
pub struct Breaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl Breaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                fails: 0,
                opened_until_ms: 0,
                success_streak: 0,
                last_transition_ms: epoch_ms(),
            }),
        }
    }

    /// True when a call may be issued (gate not open).
    pub fn allow(&self) -> bool {
        self.allow_at(epoch_ms())
    }

    /// Clock-explicit form of [`allow`](Breaker::allow).
    pub fn allow_at(&self, now_ms: u64) -> bool {
        now_ms >= self.inner.lock().unwrap().opened_until_ms
    }

    /// Record a successful upstream call.
    pub fn success(&self) {
        self.success_at(epoch_ms());
    }

    pub fn success_at(&self, now_ms: u64) {
        let mut state = self.inner.lock().unwrap();
        if now_ms < state.opened_until_ms {
            // Outcome of a call that was in flight before the gate opened;
            // it must not count towards the half-open close streak.
            state.success_streak = 0;
            return;
        }
        state.fails = 0;
        if state.success_streak < self.config.close_after {
            state.success_streak += 1;
            if state.success_streak >= self.config.close_after {
                if state.opened_until_ms != 0 {
                    state.last_transition_ms = now_ms;
                    debug!(provider = %self.name, "breaker closed");
                }
                state.opened_until_ms = 0;
            }
        }
    }

    /// Record a failed upstream call (timeouts included).
    pub fn fail(&self) {
        self.fail_at(epoch_ms());
    }

    pub fn fail_at(&self, now_ms: u64) {
        let mut state = self.inner.lock().unwrap();
        let half_open = now_ms >= state.opened_until_ms
            && state.success_streak > 0
            && state.success_streak < self.config.close_after;
        state.fails += 1;
        if half_open || state.fails >= self.config.threshold {
            state.opened_until_ms = now_ms + self.config.cooldown.as_millis() as u64;
            state.success_streak = 0;
            state.last_transition_ms = now_ms;
            warn!(
                provider = %self.name,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "breaker opened"
            );
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state_at(epoch_ms())
    }

    pub fn state_at(&self, now_ms: u64) -> BreakerState {
        let state = self.inner.lock().unwrap();
        if now_ms < state.opened_until_ms {
            BreakerState::Open
        } else if state.success_streak > 0 && state.success_streak < self.config.close_after {
            BreakerState::HalfOpen
        } else {
            BreakerState::Ok
        }
    }

    /// Timestamp of the last open/close transition, for staleness reporting.
    pub fn last_transition_at(&self) -> u64 {
        self.inner.lock().unwrap().last_transition_ms
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Hands out one process-lifetime breaker per provider name.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<Breaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get the breaker for `provider`, creating it on first use.
    pub fn breaker(&self, provider: &str) -> Arc<Breaker> {
        if let Some(breaker) = self.breakers.read().unwrap().get(provider) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write().unwrap();
        Arc::clone(
            breakers
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(Breaker::new(provider, self.config.clone()))),
        )
    }

    /// Snapshot of every registered breaker's state.
    pub fn states(&self) -> Vec<(String, BreakerState)> {
        let now = epoch_ms();
        self.breakers
            .read()
            .unwrap()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state_at(now)))
            .collect()
    }

    /// Number of breakers currently open.
    pub fn open_count(&self) -> usize {
        self.states()
            .iter()
            .filter(|(_, state)| *state == BreakerState::Open)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(threshold: u32, cooldown_ms: u64, close_after: u32) -> BreakerConfig {
        BreakerConfig {
            threshold,
            cooldown: Duration::from_millis(cooldown_ms),
            close_after,
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = Breaker::new("goplus", cfg(3, 100, 3));
        breaker.fail_at(0);
        breaker.fail_at(0);
        assert_eq!(breaker.state_at(0), BreakerState::Ok);
        breaker.fail_at(0);
        assert_eq!(breaker.state_at(0), BreakerState::Open);
        assert!(!breaker.allow_at(99));
        assert!(breaker.allow_at(100));
    }

    #[test]
    fn closes_after_consecutive_success_streak() {
        let breaker = Breaker::new("rugcheck", cfg(3, 100, 3));
        for _ in 0..3 {
            breaker.fail_at(0);
        }
        assert_eq!(breaker.state_at(50), BreakerState::Open);

        breaker.success_at(150);
        assert_eq!(breaker.state_at(150), BreakerState::HalfOpen);
        breaker.success_at(160);
        assert_eq!(breaker.state_at(160), BreakerState::HalfOpen);
        breaker.success_at(170);
        assert_eq!(breaker.state_at(170), BreakerState::Ok);
        assert_eq!(breaker.last_transition_at(), 170);
    }

    #[test]
    fn failure_during_half_open_reopens_and_resets_streak() {
        let breaker = Breaker::new("dexscreener", cfg(3, 100, 3));
        for _ in 0..3 {
            breaker.fail_at(0);
        }
        breaker.success_at(150);
        assert_eq!(breaker.state_at(150), BreakerState::HalfOpen);

        breaker.fail_at(160);
        assert_eq!(breaker.state_at(160), BreakerState::Open);

        // Streak restarts from scratch once the cooldown elapses again.
        breaker.success_at(300);
        assert_eq!(breaker.state_at(300), BreakerState::HalfOpen);
    }

    #[test]
    fn success_while_open_only_resets_the_streak() {
        let breaker = Breaker::new("covalent", cfg(3, 1_000, 3));
        for _ in 0..3 {
            breaker.fail_at(0);
        }
        // A call that started before the gate opened reports back late.
        breaker.success_at(500);
        assert_eq!(breaker.state_at(500), BreakerState::Open);
        assert!(!breaker.allow_at(500));
    }

    #[test]
    fn minimal_threshold_and_cooldown() {
        let breaker = Breaker::new("goplus", cfg(1, 1, 3));
        breaker.fail_at(0);
        assert_eq!(breaker.state_at(0), BreakerState::Open);
        assert!(breaker.allow_at(2));
        breaker.success_at(2);
        assert_eq!(breaker.state_at(2), BreakerState::HalfOpen);
    }

    #[test]
    fn close_after_one_closes_on_first_success() {
        let breaker = Breaker::new("goplus", cfg(1, 100, 1));
        breaker.fail_at(0);
        assert_eq!(breaker.state_at(50), BreakerState::Open);
        breaker.success_at(200);
        assert_eq!(breaker.state_at(200), BreakerState::Ok);
    }

    #[test]
    fn registry_reuses_instances_and_counts_open() {
        let registry = BreakerRegistry::new(cfg(1, 60_000, 3));
        let first = registry.breaker("goplus");
        let second = registry.breaker("goplus");
        assert!(Arc::ptr_eq(&first, &second));

        registry.breaker("rugcheck");
        first.fail();
        assert_eq!(registry.open_count(), 1);
        assert_eq!(registry.states().len(), 2);
    }
}
