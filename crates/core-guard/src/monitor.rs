//! Periodic samplers: the SLO alert loop and the daily budget guard.
//!
//! Both tick every five seconds and debounce their alerts independently so
//! two pressure sources never collapse into one alert storm. `tick` is
//! public so integration tests can drive a sample without waiting on timers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use serde::Serialize;
use tracing::warn;

use crate::auto_guard::{AutoGuard, Clamp};
use crate::events::{BreachEvent, BreachKind, EventBus, GuardEvent};
use crate::slo::SloRecorder;
use crate::time::{epoch_ms, utc_day};

const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Provider-credit usage snapshot fed to the monitors.
#[derive(Debug, Clone, Copy)]
pub struct Credits {
    pub used: u64,
    pub limit: u64,
}

/// Supplies the current credit usage, when the billing layer knows it.
pub type CreditsProbe = Arc<dyn Fn() -> Option<Credits> + Send + Sync>;

/// Receives the human-readable alert text (e.g. a Telegram admin DM).
pub type AdminNotifier = Arc<dyn Fn(&str) + Send + Sync>;

/// Alert thresholds for the SLO monitor.
#[derive(Debug, Clone)]
pub struct SloThresholds {
    pub p95_ms: f64,
    pub error_count_1m: usize,
    pub breaker_hits_1m: usize,
    /// Alert when remaining credits drop to this percentage or below.
    pub credits_remain_pct: u64,
}

impl Default for SloThresholds {
    fn default() -> Self {
        Self {
            p95_ms: 1_500.0,
            error_count_1m: 1,
            breaker_hits_1m: 2,
            credits_remain_pct: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SloMonitorConfig {
    pub enabled: bool,
    pub debounce: Duration,
    pub thresholds: SloThresholds,
}

impl Default for SloMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce: Duration::from_secs(60),
            thresholds: SloThresholds::default(),
        }
    }
}

/// Samples the SLO recorder and publishes debounced breach events.
///
/// The debounce key is the concatenation of breach reasons, so a different
/// combination of breaches re-alerts immediately.
pub struct SloMonitor {
    config: SloMonitorConfig,
    slo: Arc<SloRecorder>,
    bus: Arc<EventBus>,
    credits: Option<CreditsProbe>,
    notify: Option<AdminNotifier>,
    last_alert: Mutex<HashMap<String, u64>>,
}

impl SloMonitor {
    pub fn new(
        config: SloMonitorConfig,
        slo: Arc<SloRecorder>,
        bus: Arc<EventBus>,
        credits: Option<CreditsProbe>,
        notify: Option<AdminNotifier>,
    ) -> Self {
        Self {
            config,
            slo,
            bus,
            credits,
            notify,
            last_alert: Mutex::new(HashMap::new()),
        }
    }

    /// Take one sample; emits at most one (debounced) breach event.
    pub fn tick(&self) {
        self.tick_at(epoch_ms());
    }

    pub fn tick_at(&self, now_ms: u64) {
        if !self.config.enabled {
            return;
        }
        let snapshot = self.slo.snapshot_at(now_ms);
        let thresholds = &self.config.thresholds;

        let mut breaches = Vec::new();
        if snapshot.p95_ms > thresholds.p95_ms {
            breaches.push(format!(
                "p95 {:.0}ms > {:.0}ms",
                snapshot.p95_ms, thresholds.p95_ms
            ));
        }
        if snapshot.error_count_1m > thresholds.error_count_1m {
            breaches.push(format!(
                "err1m {} > {}",
                snapshot.error_count_1m, thresholds.error_count_1m
            ));
        }
        if snapshot.breaker_hits_1m > thresholds.breaker_hits_1m {
            breaches.push(format!(
                "breaker1m {} > {}",
                snapshot.breaker_hits_1m, thresholds.breaker_hits_1m
            ));
        }
        if let Some(credits) = self.credits.as_ref().and_then(|probe| probe()) {
            if credits.limit > 0 {
                let used_pct = (credits.used * 100 / credits.limit).min(100);
                let remain_pct = 100 - used_pct;
                if remain_pct <= thresholds.credits_remain_pct {
                    breaches.push(format!(
                        "credits remaining {remain_pct}% <= {}%",
                        thresholds.credits_remain_pct
                    ));
                }
            }
        }
        if breaches.is_empty() {
            return;
        }

        let key = breaches.join("|");
        {
            let mut last_alert = self.last_alert.lock().unwrap();
            let debounce_ms = self.config.debounce.as_millis() as u64;
            if last_alert
                .get(&key)
                .map_or(false, |&ts| now_ms.saturating_sub(ts) < debounce_ms)
            {
                return;
            }
            last_alert.insert(key, now_ms);
        }

        let note = format!("ALERT: {}", breaches.join("; "));
        warn!(%note, "slo breach");
        if let Some(notify) = &self.notify {
            notify(&note);
        }
        self.bus.emit(GuardEvent::Breach(BreachEvent {
            kind: BreachKind::Slo,
            note,
        }));
    }

    /// Background sampler; spawn with `tokio::spawn(monitor.run())`.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
            self.tick();
        }
    }
}

/// What the budget guard asks the auto-guard to do on breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetAction {
    None,
    Degrade,
    Deny,
    Stub,
}

impl fmt::Display for BudgetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BudgetAction::None => "none",
            BudgetAction::Degrade => "degrade",
            BudgetAction::Deny => "deny",
            BudgetAction::Stub => "stub",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct BudgetGuardConfig {
    pub enabled: bool,
    pub debounce: Duration,
    pub action: BudgetAction,
    /// How long a clamp imposed on breach stays active.
    pub clamp_window: Duration,
}

impl Default for BudgetGuardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce: Duration::from_secs(60),
            action: BudgetAction::Degrade,
            clamp_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct BudgetState {
    day_key: Option<String>,
    baseline_used: u64,
    last_alert_ms: Option<u64>,
}

/// Watches daily credit spend against a UTC-midnight baseline and clamps the
/// auto-guard when the spend runs past the limit.
pub struct BudgetGuard {
    config: BudgetGuardConfig,
    credits: CreditsProbe,
    bus: Arc<EventBus>,
    guard: Option<Arc<AutoGuard>>,
    state: Mutex<BudgetState>,
}

impl BudgetGuard {
    pub fn new(
        config: BudgetGuardConfig,
        credits: CreditsProbe,
        bus: Arc<EventBus>,
        guard: Option<Arc<AutoGuard>>,
    ) -> Self {
        Self {
            config,
            credits,
            bus,
            guard,
            state: Mutex::new(BudgetState::default()),
        }
    }

    pub fn tick(&self) {
        self.tick_at(epoch_ms());
    }

    pub fn tick_at(&self, now_ms: u64) {
        if !self.config.enabled {
            return;
        }
        let Some(credits) = (self.credits)() else {
            return;
        };
        if credits.limit == 0 {
            return;
        }

        let (used_delta, pct) = {
            let mut state = self.state.lock().unwrap();
            let today = utc_day(now_ms);
            if state.day_key.as_deref() != Some(today.as_str()) {
                state.day_key = Some(today);
                state.baseline_used = credits.used;
            }
            let used_delta = credits.used.saturating_sub(state.baseline_used);
            let pct = used_delta * 100 / credits.limit;
            if used_delta < credits.limit && pct < 100 {
                return;
            }
            let debounce_ms = self.config.debounce.as_millis() as u64;
            if state
                .last_alert_ms
                .map_or(false, |ts| now_ms.saturating_sub(ts) < debounce_ms)
            {
                return;
            }
            state.last_alert_ms = Some(now_ms);
            (used_delta, pct)
        };

        let note = format!(
            "budget breach: used_delta_today={used_delta} limit={} ({pct}%) action={}",
            credits.limit, self.config.action
        );
        warn!(%note, "credit budget breach");
        self.bus.emit(GuardEvent::BudgetBreach(BreachEvent {
            kind: BreachKind::Credits,
            note,
        }));

        if let Some(guard) = &self.guard {
            let until = now_ms + self.config.clamp_window.as_millis() as u64;
            let clamp = match self.config.action {
                BudgetAction::Degrade => Some(Clamp::degrade_until(until)),
                BudgetAction::Deny => Some(Clamp::deny_until(until)),
                BudgetAction::Stub => Some(Clamp::stub_until(until)),
                BudgetAction::None => None,
            };
            if let Some(clamp) = clamp {
                guard.set_budget_clamp(clamp);
            }
        }
    }

    /// Background sampler; spawn with `tokio::spawn(guard.run())`.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
            self.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auto_guard::{AutoGuardConfig, RuntimeOverrides};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    fn counting_bus() -> (Arc<EventBus>, Arc<AtomicUsize>) {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        bus.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (bus, count)
    }

    fn slow_slo() -> Arc<SloRecorder> {
        let slo = Arc::new(SloRecorder::new());
        for _ in 0..10 {
            slo.record_latency(2_000.0);
        }
        slo
    }

    #[test]
    fn breach_emits_once_within_the_debounce_window() {
        let (bus, count) = counting_bus();
        let monitor = SloMonitor::new(
            SloMonitorConfig {
                enabled: true,
                ..Default::default()
            },
            slow_slo(),
            Arc::clone(&bus),
            None,
            None,
        );

        monitor.tick_at(1_000);
        monitor.tick_at(2_000);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        monitor.tick_at(1_000 + 60_000);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn changed_breach_combination_realerts_immediately() {
        let (bus, count) = counting_bus();
        let slo = slow_slo();
        let monitor = SloMonitor::new(
            SloMonitorConfig {
                enabled: true,
                ..Default::default()
            },
            Arc::clone(&slo),
            Arc::clone(&bus),
            None,
            None,
        );

        monitor.tick_at(1_000);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Errors join the p95 breach: new debounce key, immediate re-alert.
        for _ in 0..3 {
            slo.record_error_at(1_500);
        }
        monitor.tick_at(2_000);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disabled_monitor_is_silent() {
        let (bus, count) = counting_bus();
        let monitor = SloMonitor::new(
            SloMonitorConfig::default(),
            slow_slo(),
            Arc::clone(&bus),
            None,
            None,
        );
        monitor.tick_at(1_000);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn credit_exhaustion_breaches_and_notifies() {
        let (bus, count) = counting_bus();
        let notified = Arc::new(AtomicUsize::new(0));
        let notify_count = Arc::clone(&notified);
        let monitor = SloMonitor::new(
            SloMonitorConfig {
                enabled: true,
                ..Default::default()
            },
            Arc::new(SloRecorder::new()),
            Arc::clone(&bus),
            Some(Arc::new(|| Some(Credits { used: 95, limit: 100 }))),
            Some(Arc::new(move |_note| {
                notify_count.fetch_add(1, Ordering::SeqCst);
            })),
        );

        monitor.tick_at(1_000);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    fn probe(used: &Arc<AtomicU64>, limit: u64) -> CreditsProbe {
        let used = Arc::clone(used);
        Arc::new(move || {
            Some(Credits {
                used: used.load(Ordering::Relaxed),
                limit,
            })
        })
    }

    #[test]
    fn budget_guard_debounces_and_resets_baseline_daily() {
        let (bus, count) = counting_bus();
        let used = Arc::new(AtomicU64::new(0));
        let guard = BudgetGuard::new(
            BudgetGuardConfig {
                enabled: true,
                ..Default::default()
            },
            probe(&used, 100),
            Arc::clone(&bus),
            None,
        );

        // First tick establishes the baseline; no breach.
        guard.tick_at(0);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        used.store(100, Ordering::Relaxed);
        guard.tick_at(1_000);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Debounced while the window is open.
        guard.tick_at(2_000);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Next UTC day the baseline resets to the current reading.
        guard.tick_at(1_000 + 86_400_000);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn budget_breach_applies_the_configured_clamp() {
        let (bus, _count) = counting_bus();
        let overrides = Arc::new(RuntimeOverrides::new(20, false));
        let auto_guard = Arc::new(AutoGuard::new(
            AutoGuardConfig {
                enabled: true,
                ..Default::default()
            },
            overrides,
        ));
        let used = Arc::new(AtomicU64::new(0));
        let guard = BudgetGuard::new(
            BudgetGuardConfig {
                enabled: true,
                action: BudgetAction::Stub,
                ..Default::default()
            },
            probe(&used, 50),
            bus,
            Some(Arc::clone(&auto_guard)),
        );

        guard.tick_at(0);
        used.store(50, Ordering::Relaxed);
        guard.tick_at(1_000);

        assert!(auto_guard.maybe_force_stub_at(2_000));
        // Clamp window is 60s from the breach tick.
        assert!(!auto_guard.maybe_force_stub_at(61_001));
    }

    #[test]
    fn budget_action_none_emits_but_does_not_clamp() {
        let (bus, count) = counting_bus();
        let overrides = Arc::new(RuntimeOverrides::new(20, false));
        let auto_guard = Arc::new(AutoGuard::new(
            AutoGuardConfig {
                enabled: true,
                ..Default::default()
            },
            overrides,
        ));
        let used = Arc::new(AtomicU64::new(100));
        let guard = BudgetGuard::new(
            BudgetGuardConfig {
                enabled: true,
                action: BudgetAction::None,
                ..Default::default()
            },
            probe(&used, 100),
            bus,
            Some(Arc::clone(&auto_guard)),
        );

        guard.tick_at(0);
        used.store(200, Ordering::Relaxed);
        guard.tick_at(1_000);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(auto_guard.clamp().is_none());
    }
}
