/*!
 * Environment-driven configuration, read once at startup.
 *
 * Every semantic knob of the control plane lives here. Components receive
 * their settings by reference at construction time; nothing re-reads the
 * environment mid-request.
 */

use serde::Serialize;
use std::env;
use std::time::Duration;

use rugwatch_core_guard::auto_guard::AutoGuardConfig;
use rugwatch_core_guard::breaker::BreakerConfig;
use rugwatch_core_guard::monitor::{
    BudgetAction, BudgetGuardConfig, SloMonitorConfig, SloThresholds,
};
use rugwatch_core_guard::posting_budget::{ClampPolicy, PostingBudgetConfig};

use crate::error::{AppError, Result};

/// Top-level configuration for the service.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    /// External store URL; unset selects the in-memory substrate.
    pub redis_url: Option<String>,
    pub log: LogSettings,
    /// Providers whose breakers are created eagerly at startup.
    pub providers: Vec<String>,
    pub breaker: BreakerSettings,
    pub bucket: BucketSettings,
    pub cache: CacheSettings,
    pub auto_guard: AutoGuardSettings,
    pub alerts: AlertSettings,
    pub budget: BudgetSettings,
    pub posting: PostingSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSettings {
    pub json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSettings {
    pub threshold: u32,
    pub cooldown_ms: u64,
    pub close_after: u32,
    pub provider_timeout_ms: u64,
    pub provider_attempts: u32,
}

impl BreakerSettings {
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            threshold: self.threshold,
            cooldown: Duration::from_millis(self.cooldown_ms),
            close_after: self.close_after,
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketSettings {
    /// Requests per second admitted globally; capacity equals the rate.
    pub qps: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheSettings {
    pub scan_ttl_secs: u64,
}

impl CacheSettings {
    pub fn scan_ttl(&self) -> Duration {
        Duration::from_secs(self.scan_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoGuardSettings {
    pub enabled: bool,
    pub calm_ms: u64,
    pub revert_on_calm: bool,
    pub force_stub: bool,
    /// Baseline rate-limit ceiling the escalation ladder tightens.
    pub rl_max: u32,
    pub strict_content_type: bool,
}

impl AutoGuardSettings {
    pub fn guard_config(&self) -> AutoGuardConfig {
        AutoGuardConfig {
            enabled: self.enabled,
            calm: Duration::from_millis(self.calm_ms),
            revert_overrides_on_calm: self.revert_on_calm,
            force_stub: self.force_stub,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertSettings {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub p95_ms: f64,
    pub error_count_1m: usize,
    pub breaker_hits_1m: usize,
    pub credits_remain_pct: u64,
}

impl AlertSettings {
    pub fn monitor_config(&self) -> SloMonitorConfig {
        SloMonitorConfig {
            enabled: self.enabled,
            debounce: Duration::from_millis(self.debounce_ms),
            thresholds: SloThresholds {
                p95_ms: self.p95_ms,
                error_count_1m: self.error_count_1m,
                breaker_hits_1m: self.breaker_hits_1m,
                credits_remain_pct: self.credits_remain_pct,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetSettings {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub action: BudgetAction,
    pub clamp_ms: u64,
}

impl BudgetSettings {
    pub fn guard_config(&self) -> BudgetGuardConfig {
        BudgetGuardConfig {
            enabled: self.enabled,
            debounce: Duration::from_millis(self.debounce_ms),
            action: self.action,
            clamp_window: Duration::from_millis(self.clamp_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PostingSettings {
    pub enabled: bool,
    pub max_per_hour: i64,
    pub max_per_day: i64,
    pub cooldown_ms: u64,
    pub when_clamp: ClampPolicy,
    pub sample_pct: u32,
    pub admin_override: bool,
}

impl PostingSettings {
    pub fn budget_config(&self) -> PostingBudgetConfig {
        PostingBudgetConfig {
            enabled: self.enabled,
            max_per_hour: self.max_per_hour,
            max_per_day: self.max_per_day,
            cooldown_ms: self.cooldown_ms,
            when_clamp: self.when_clamp,
            sample_pct: self.sample_pct,
            admin_override: self.admin_override,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            log: LogSettings { json: false },
            providers: vec![
                "goplus".to_string(),
                "rugcheck".to_string(),
                "dexscreener".to_string(),
                "covalent".to_string(),
            ],
            breaker: BreakerSettings {
                threshold: 3,
                cooldown_ms: 60_000,
                close_after: 3,
                provider_timeout_ms: 5_000,
                provider_attempts: 2,
            },
            bucket: BucketSettings { qps: 8.0 },
            cache: CacheSettings { scan_ttl_secs: 120 },
            auto_guard: AutoGuardSettings {
                enabled: false,
                calm_ms: 300_000,
                revert_on_calm: false,
                force_stub: false,
                rl_max: 20,
                strict_content_type: false,
            },
            alerts: AlertSettings {
                enabled: false,
                debounce_ms: 60_000,
                p95_ms: 1_500.0,
                error_count_1m: 1,
                breaker_hits_1m: 2,
                credits_remain_pct: 10,
            },
            budget: BudgetSettings {
                enabled: false,
                debounce_ms: 60_000,
                action: BudgetAction::Degrade,
                clamp_ms: 60_000,
            },
            posting: PostingSettings {
                enabled: false,
                max_per_hour: 6,
                max_per_day: 50,
                cooldown_ms: 20_000,
                when_clamp: ClampPolicy::Sample,
                sample_pct: 30,
                admin_override: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let d = AppConfig::default();
        AppConfig {
            redis_url: env_opt("REDIS_URL"),
            log: LogSettings {
                json: env_bool("LOG_JSON", d.log.json),
            },
            providers: env_opt("PROVIDERS")
                .map(|raw| {
                    raw.split(',')
                        .map(|name| name.trim().to_lowercase())
                        .filter(|name| !name.is_empty())
                        .collect()
                })
                .unwrap_or(d.providers),
            breaker: BreakerSettings {
                threshold: env_u32("BREAKER_THRESHOLD", d.breaker.threshold),
                cooldown_ms: env_u64("BREAKER_COOLDOWN_MS", d.breaker.cooldown_ms),
                close_after: env_u32("BREAKER_CLOSE_AFTER", d.breaker.close_after).max(1),
                provider_timeout_ms: env_u64("PROVIDER_TIMEOUT_MS", d.breaker.provider_timeout_ms),
                provider_attempts: env_u32("PROVIDER_ATTEMPTS", d.breaker.provider_attempts),
            },
            bucket: BucketSettings {
                qps: env_f64("GLOBAL_QPS", d.bucket.qps),
            },
            cache: CacheSettings {
                scan_ttl_secs: env_u64("SCAN_TTL_SECONDS", d.cache.scan_ttl_secs).max(1),
            },
            auto_guard: AutoGuardSettings {
                enabled: env_bool("AUTO_GUARD_ENABLED", d.auto_guard.enabled),
                calm_ms: env_u64("AUTO_GUARD_CALM_MS", d.auto_guard.calm_ms).max(1),
                revert_on_calm: env_bool("AUTO_GUARD_REVERT_ON_CALM", d.auto_guard.revert_on_calm),
                force_stub: env_bool("BREAKER_FORCE_OPEN", d.auto_guard.force_stub),
                rl_max: env_u32("RL_MAX", d.auto_guard.rl_max),
                strict_content_type: env_bool(
                    "STRICT_CONTENT_TYPE",
                    d.auto_guard.strict_content_type,
                ),
            },
            alerts: AlertSettings {
                enabled: env_bool("ALERTS_ENABLED", d.alerts.enabled),
                debounce_ms: env_u64("ALERT_DEBOUNCE_MS", d.alerts.debounce_ms).max(1),
                p95_ms: env_f64("ALERT_SLO_P95_MS", d.alerts.p95_ms),
                error_count_1m: env_usize("ALERT_ERR_1M", d.alerts.error_count_1m),
                breaker_hits_1m: env_usize("ALERT_BREAKER_1M", d.alerts.breaker_hits_1m),
                credits_remain_pct: env_u64(
                    "ALERT_CREDITS_REMAIN_PCT",
                    d.alerts.credits_remain_pct,
                ),
            },
            budget: BudgetSettings {
                enabled: env_bool("BUDGET_ENABLED", d.budget.enabled),
                debounce_ms: env_u64("BUDGET_DEBOUNCE_MS", d.budget.debounce_ms).max(1),
                action: env_opt("BUDGET_ACTION")
                    .and_then(|raw| parse_budget_action(&raw))
                    .unwrap_or(d.budget.action),
                clamp_ms: env_u64("BUDGET_CLAMP_MS", d.budget.clamp_ms),
            },
            posting: PostingSettings {
                enabled: env_bool("SIGNALS_POST_BUDGET_ENABLED", d.posting.enabled),
                max_per_hour: env_i64("SIGNALS_POST_MAX_PER_HOUR", d.posting.max_per_hour),
                max_per_day: env_i64("SIGNALS_POST_MAX_PER_DAY", d.posting.max_per_day),
                cooldown_ms: env_u64("SIGNALS_POST_COOLDOWN_MS", d.posting.cooldown_ms),
                when_clamp: env_opt("SIGNALS_POST_WHEN_CLAMP")
                    .and_then(|raw| parse_clamp_policy(&raw))
                    .unwrap_or(d.posting.when_clamp),
                sample_pct: env_u32("SIGNALS_POST_SAMPLE_PCT", d.posting.sample_pct).min(100),
                admin_override: env_bool("SIGNALS_POST_ADMIN_OVERRIDE", d.posting.admin_override),
            },
        }
    }

    /// Validate the configuration, rejecting nonsensical knob values.
    pub fn validate(&self) -> Result<()> {
        if self.breaker.threshold == 0 {
            return Err(AppError::Config(
                "breaker threshold must be at least 1".to_string(),
            ));
        }
        if self.breaker.close_after == 0 {
            return Err(AppError::Config(
                "breaker close-after streak must be at least 1".to_string(),
            ));
        }
        if self.breaker.provider_attempts == 0 {
            return Err(AppError::Config(
                "provider attempts must be at least 1".to_string(),
            ));
        }
        if self.bucket.qps <= 0.0 {
            return Err(AppError::Config(
                "global QPS must be greater than 0".to_string(),
            ));
        }
        if self.posting.sample_pct > 100 {
            return Err(AppError::Config(
                "posting sample percentage must be 0..=100".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(value) => value.to_lowercase() == "true",
        None => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_budget_action(raw: &str) -> Option<BudgetAction> {
    match raw.to_lowercase().as_str() {
        "none" => Some(BudgetAction::None),
        "degrade" => Some(BudgetAction::Degrade),
        "deny" => Some(BudgetAction::Deny),
        "stub" => Some(BudgetAction::Stub),
        _ => None,
    }
}

fn parse_clamp_policy(raw: &str) -> Option<ClampPolicy> {
    match raw.to_lowercase().as_str() {
        "deny" => Some(ClampPolicy::Deny),
        "sample" => Some(ClampPolicy::Sample),
        "allow" => Some(ClampPolicy::Allow),
        _ => None,
    }
}
