/*!
 * Application context: constructs and owns every control-plane component.
 *
 * Components are wired once at bootstrap and passed by reference into the
 * request pipeline. No globals, no reset-for-tests escape hatches.
 */

use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use rugwatch_core_guard::auto_guard::{AutoGuard, RuntimeOverrides};
use rugwatch_core_guard::breaker::BreakerRegistry;
use rugwatch_core_guard::events::EventBus;
use rugwatch_core_guard::monitor::{AdminNotifier, BudgetGuard, CreditsProbe, SloMonitor};
use rugwatch_core_guard::posting_budget::{PostingBudget, RandomDraw};
use rugwatch_core_guard::rate_limit::TokenBucket;
use rugwatch_core_guard::slo::SloRecorder;
use rugwatch_core_guard::store::{KvStore, MemoryStore};

use crate::backend::RedisStore;
use crate::config::AppConfig;
use crate::error::Result;
use crate::scan_cache::ScanCache;

/// External collaborators injected at bootstrap.
#[derive(Default)]
pub struct Probes {
    /// Current provider-credit usage, when the billing layer can report it.
    pub credits: Option<CreditsProbe>,
    /// Sink for admin alert text (e.g. a Telegram DM sender).
    pub notify_admin: Option<AdminNotifier>,
}

/// Everything the request pipeline needs.
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub overrides: Arc<RuntimeOverrides>,
    pub bus: Arc<EventBus>,
    pub breakers: Arc<BreakerRegistry>,
    pub bucket: Arc<TokenBucket>,
    pub slo: Arc<SloRecorder>,
    pub auto_guard: Arc<AutoGuard>,
    pub slo_monitor: Arc<SloMonitor>,
    pub budget_guard: Arc<BudgetGuard>,
    pub posting: Arc<PostingBudget>,
    pub scan_cache: Arc<ScanCache>,
}

impl AppContext {
    /// Build the full control plane from configuration.
    pub async fn bootstrap(config: AppConfig, probes: Probes) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        // Substrate selection happens exactly once: Redis when configured,
        // otherwise the process-local store.
        let external: Option<Arc<dyn KvStore>> = match &config.redis_url {
            Some(url) => Some(Arc::new(RedisStore::connect(url).await?)),
            None => None,
        };
        let substrate: Arc<dyn KvStore> = external
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));

        let overrides = Arc::new(RuntimeOverrides::new(
            config.auto_guard.rl_max,
            config.auto_guard.strict_content_type,
        ));
        let bus = Arc::new(EventBus::new());
        let slo = Arc::new(SloRecorder::new());

        let breakers = Arc::new(BreakerRegistry::new(config.breaker.breaker_config()));
        for provider in &config.providers {
            breakers.breaker(provider);
        }

        let bucket = Arc::new(TokenBucket::per_second(config.bucket.qps));

        let auto_guard = Arc::new(AutoGuard::new(
            config.auto_guard.guard_config(),
            Arc::clone(&overrides),
        ));
        Arc::clone(&auto_guard).attach(&bus);

        let credits = probes.credits;
        let slo_monitor = Arc::new(SloMonitor::new(
            config.alerts.monitor_config(),
            Arc::clone(&slo),
            Arc::clone(&bus),
            credits.clone(),
            probes.notify_admin,
        ));

        let credits_probe: CreditsProbe = credits.unwrap_or_else(|| Arc::new(|| None));
        let clamp_target = config
            .auto_guard
            .enabled
            .then(|| Arc::clone(&auto_guard));
        let budget_guard = Arc::new(BudgetGuard::new(
            config.budget.guard_config(),
            credits_probe,
            Arc::clone(&bus),
            clamp_target,
        ));

        let posting = Arc::new(PostingBudget::new(
            config.posting.budget_config(),
            external,
            Some(Arc::clone(&auto_guard)),
            Arc::new(RandomDraw),
        ));

        let scan_cache = Arc::new(ScanCache::new(substrate, config.cache.scan_ttl()));

        info!(
            redis = config.redis_url.is_some(),
            providers = config.providers.len(),
            qps = config.bucket.qps,
            auto_guard = config.auto_guard.enabled,
            "control plane ready"
        );

        Ok(Self {
            config,
            overrides,
            bus,
            breakers,
            bucket,
            slo,
            auto_guard,
            slo_monitor,
            budget_guard,
            posting,
            scan_cache,
        })
    }

    /// Spawn the enabled background loops; handles are returned so the caller
    /// can abort them on shutdown.
    pub fn start_background(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if self.config.auto_guard.enabled {
            handles.push(tokio::spawn(Arc::clone(&self.auto_guard).run()));
        }
        if self.config.alerts.enabled {
            handles.push(tokio::spawn(Arc::clone(&self.slo_monitor).run()));
        }
        if self.config.budget.enabled {
            handles.push(tokio::spawn(Arc::clone(&self.budget_guard).run()));
        }
        handles
    }

    /// Admin cache bust; returns the new version.
    pub async fn bust_scan_cache(&self) -> Result<i64> {
        let version = self.scan_cache.bump_version().await?;
        info!(version, "scan cache version bumped");
        Ok(version)
    }

    /// Operational snapshot for the status surface.
    pub async fn status(&self) -> serde_json::Value {
        let breakers: Vec<_> = self
            .breakers
            .states()
            .into_iter()
            .map(|(provider, state)| json!({ "provider": provider, "state": state.as_str() }))
            .collect();
        json!({
            "slo": self.slo.snapshot(),
            "routes": self.slo.route_snapshot(),
            "breakers": breakers,
            "guard": {
                "step": self.auto_guard.step(),
                "degraded": self.auto_guard.is_degraded(),
            },
            "rl_max": self.overrides.rl_max(),
            "strict_content_type": self.overrides.strict_content_type(),
            "cache_version": self.scan_cache.current_version().await,
        })
    }
}
