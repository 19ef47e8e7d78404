//! Outbound broadcast governor.
//!
//! Decides whether a signal post may go out, combining the auto-guard clamp
//! state, a cooldown armed by the previous successful post, and hour/day
//! caps. Check order matters: clamp and cooldown run before the counters so
//! a denied post never consumes quota.

use rand::Rng;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

use crate::auto_guard::AutoGuard;
use crate::store::{KvStore, StoreResult};
use crate::time::{day_stamp, hour_stamp};

// Counter keys outlive their period slightly so a stamp never outruns its key.
const HOUR_KEY_TTL_SECS: u64 = 3_700;
const DAY_KEY_TTL_SECS: u64 = 90_000;

const COOLDOWN_KEY: &str = "signals:post:cooldown";

fn hour_key(stamp: &str) -> String {
    format!("signals:post:h:{stamp}")
}

fn day_key(stamp: &str) -> String {
    format!("signals:post:d:{stamp}")
}

/// What to do with posts while the auto-guard reports degradation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClampPolicy {
    Deny,
    Sample,
    Allow,
}

/// Governor tuning; every knob comes from configuration.
#[derive(Debug, Clone)]
pub struct PostingBudgetConfig {
    pub enabled: bool,
    pub max_per_hour: i64,
    pub max_per_day: i64,
    pub cooldown_ms: u64,
    pub when_clamp: ClampPolicy,
    /// Percentage of posts allowed through while clamped, under
    /// [`ClampPolicy::Sample`].
    pub sample_pct: u32,
    pub admin_override: bool,
}

impl Default for PostingBudgetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_per_hour: 6,
            max_per_day: 50,
            cooldown_ms: 20_000,
            when_clamp: ClampPolicy::Sample,
            sample_pct: 30,
            admin_override: false,
        }
    }
}

/// Why a post was allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostReason {
    Ok,
    Disabled,
    AdminOverride,
    ClampDeny,
    ClampSampleDrop,
    Cooldown,
    HourCap,
    DayCap,
}

/// Outcome of [`PostingBudget::should_post`]. `reason` is observability
/// context, not retry guidance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PostDecision {
    pub allow: bool,
    pub reason: PostReason,
    pub wait_ms: u64,
    pub hour_used: i64,
    pub day_used: i64,
}

impl PostDecision {
    fn allowed(reason: PostReason) -> Self {
        Self {
            allow: true,
            reason,
            wait_ms: 0,
            hour_used: 0,
            day_used: 0,
        }
    }

    fn denied(reason: PostReason, wait_ms: u64) -> Self {
        Self {
            allow: false,
            reason,
            wait_ms,
            hour_used: 0,
            day_used: 0,
        }
    }
}

/// Injectable randomness for the clamp-sample draw.
pub trait DrawPercent: Send + Sync {
    /// Uniform draw in `0..100`.
    fn draw(&self) -> u32;
}

/// Production sampler backed by the thread RNG.
#[derive(Debug, Default)]
pub struct RandomDraw;

impl DrawPercent for RandomDraw {
    fn draw(&self) -> u32 {
        rand::rng().random_range(0..100)
    }
}

#[derive(Debug, Default)]
struct Window {
    stamp: String,
    count: i64,
    expires_at_ms: u64,
}

fn roll(window: &mut Window, stamp: &str, now_ms: u64, ttl_ms: u64) {
    if window.stamp != stamp || window.expires_at_ms <= now_ms {
        window.stamp = stamp.to_string();
        window.count = 0;
        window.expires_at_ms = now_ms + ttl_ms;
    }
}

#[derive(Debug, Default)]
struct MemCounters {
    cooldown_until_ms: u64,
    hour: Window,
    day: Window,
}

/// Broadcast governor. One instance per process; counters are shared across
/// replicas when an external store is injected, otherwise kept in memory.
pub struct PostingBudget {
    config: PostingBudgetConfig,
    store: Option<Arc<dyn KvStore>>,
    guard: Option<Arc<AutoGuard>>,
    sampler: Arc<dyn DrawPercent>,
    mem: Mutex<MemCounters>,
}

impl PostingBudget {
    pub fn new(
        config: PostingBudgetConfig,
        store: Option<Arc<dyn KvStore>>,
        guard: Option<Arc<AutoGuard>>,
        sampler: Arc<dyn DrawPercent>,
    ) -> Self {
        Self {
            config,
            store,
            guard,
            sampler,
            mem: Mutex::new(MemCounters::default()),
        }
    }

    /// Evaluate whether a broadcast may proceed at `now_ms`.
    pub async fn should_post(&self, now_ms: u64, admin: bool) -> PostDecision {
        if !self.config.enabled {
            return PostDecision::allowed(PostReason::Disabled);
        }
        if self.config.admin_override && admin {
            return PostDecision::allowed(PostReason::AdminOverride);
        }

        if self
            .guard
            .as_ref()
            .map_or(false, |guard| guard.is_degraded_at(now_ms))
        {
            match self.config.when_clamp {
                ClampPolicy::Deny => {
                    return PostDecision::denied(PostReason::ClampDeny, self.config.cooldown_ms);
                }
                ClampPolicy::Sample => {
                    if self.sampler.draw() >= self.config.sample_pct {
                        return PostDecision::denied(
                            PostReason::ClampSampleDrop,
                            self.config.cooldown_ms,
                        );
                    }
                }
                ClampPolicy::Allow => {}
            }
        }

        if let Some(store) = &self.store {
            match self.decide_with_store(store.as_ref(), now_ms).await {
                Ok(decision) => return decision,
                Err(err) => {
                    warn!(%err, "posting-budget store unavailable, using in-memory counters");
                }
            }
        }
        self.decide_in_memory(now_ms)
    }

    async fn decide_with_store(
        &self,
        store: &dyn KvStore,
        now_ms: u64,
    ) -> StoreResult<PostDecision> {
        if let Some(remaining) = store.pttl(COOLDOWN_KEY).await? {
            return Ok(PostDecision::denied(
                PostReason::Cooldown,
                remaining.as_millis() as u64,
            ));
        }

        let hour = hour_key(&hour_stamp(now_ms));
        let day = day_key(&day_stamp(now_ms));
        let hour_used = store.incr(&hour).await?;
        if hour_used == 1 {
            store
                .expire(&hour, Duration::from_secs(HOUR_KEY_TTL_SECS))
                .await?;
        }
        let day_used = store.incr(&day).await?;
        if day_used == 1 {
            store
                .expire(&day, Duration::from_secs(DAY_KEY_TTL_SECS))
                .await?;
        }

        if hour_used > self.config.max_per_hour {
            return Ok(PostDecision {
                allow: false,
                reason: PostReason::HourCap,
                wait_ms: self.config.cooldown_ms,
                hour_used,
                day_used,
            });
        }
        if day_used > self.config.max_per_day {
            return Ok(PostDecision {
                allow: false,
                reason: PostReason::DayCap,
                wait_ms: self.config.cooldown_ms,
                hour_used,
                day_used,
            });
        }

        store
            .set(
                COOLDOWN_KEY,
                "1",
                Some(Duration::from_millis(self.config.cooldown_ms)),
            )
            .await?;
        Ok(PostDecision {
            allow: true,
            reason: PostReason::Ok,
            wait_ms: 0,
            hour_used,
            day_used,
        })
    }

    fn decide_in_memory(&self, now_ms: u64) -> PostDecision {
        let mut mem = self.mem.lock().unwrap();
        if mem.cooldown_until_ms > now_ms {
            return PostDecision::denied(PostReason::Cooldown, mem.cooldown_until_ms - now_ms);
        }

        let hstamp = hour_stamp(now_ms);
        let dstamp = day_stamp(now_ms);
        roll(&mut mem.hour, &hstamp, now_ms, HOUR_KEY_TTL_SECS * 1_000);
        roll(&mut mem.day, &dstamp, now_ms, DAY_KEY_TTL_SECS * 1_000);
        mem.hour.count += 1;
        mem.day.count += 1;
        let (hour_used, day_used) = (mem.hour.count, mem.day.count);

        if hour_used > self.config.max_per_hour {
            return PostDecision {
                allow: false,
                reason: PostReason::HourCap,
                wait_ms: self.config.cooldown_ms,
                hour_used,
                day_used,
            };
        }
        if day_used > self.config.max_per_day {
            return PostDecision {
                allow: false,
                reason: PostReason::DayCap,
                wait_ms: self.config.cooldown_ms,
                hour_used,
                day_used,
            };
        }

        mem.cooldown_until_ms = now_ms + self.config.cooldown_ms;
        PostDecision {
            allow: true,
            reason: PostReason::Ok,
            wait_ms: 0,
            hour_used,
            day_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auto_guard::{AutoGuardConfig, Clamp, RuntimeOverrides};
    use crate::store::{MemoryStore, StoreError};
    use crate::time::epoch_ms;
    use async_trait::async_trait;

    struct FixedDraw(u32);

    impl DrawPercent for FixedDraw {
        fn draw(&self) -> u32 {
            self.0
        }
    }

    fn budget(config: PostingBudgetConfig) -> PostingBudget {
        PostingBudget::new(config, None, None, Arc::new(FixedDraw(0)))
    }

    fn enabled(config: PostingBudgetConfig) -> PostingBudgetConfig {
        PostingBudgetConfig {
            enabled: true,
            ..config
        }
    }

    fn clamped_guard() -> Arc<AutoGuard> {
        let overrides = Arc::new(RuntimeOverrides::new(20, false));
        let guard = Arc::new(AutoGuard::new(
            AutoGuardConfig {
                enabled: true,
                ..Default::default()
            },
            overrides,
        ));
        guard.set_budget_clamp(Clamp::deny_until(u64::MAX));
        guard
    }

    #[tokio::test]
    async fn disabled_governor_always_allows() {
        let budget = budget(PostingBudgetConfig::default());
        let decision = budget.should_post(0, false).await;
        assert!(decision.allow);
        assert_eq!(decision.reason, PostReason::Disabled);
    }

    #[tokio::test]
    async fn admin_override_bypasses_every_gate() {
        let config = enabled(PostingBudgetConfig {
            admin_override: true,
            ..Default::default()
        });
        let budget = PostingBudget::new(config, None, Some(clamped_guard()), Arc::new(FixedDraw(99)));
        let decision = budget.should_post(0, true).await;
        assert!(decision.allow);
        assert_eq!(decision.reason, PostReason::AdminOverride);
    }

    #[tokio::test]
    async fn cooldown_suppresses_until_exactly_elapsed() {
        let budget = budget(enabled(PostingBudgetConfig {
            cooldown_ms: 60_000,
            ..Default::default()
        }));

        let first = budget.should_post(0, false).await;
        assert!(first.allow);
        assert_eq!(first.reason, PostReason::Ok);

        let second = budget.should_post(0, false).await;
        assert!(!second.allow);
        assert_eq!(second.reason, PostReason::Cooldown);
        assert_eq!(second.wait_ms, 60_000);

        let almost = budget.should_post(59_000, false).await;
        assert_eq!(almost.reason, PostReason::Cooldown);
        assert_eq!(almost.wait_ms, 1_000);

        let third = budget.should_post(60_000, false).await;
        assert!(third.allow);
        assert_eq!(third.reason, PostReason::Ok);
    }

    #[tokio::test]
    async fn hour_cap_reports_cooldown_wait_without_arming_it() {
        let budget = budget(enabled(PostingBudgetConfig {
            max_per_hour: 2,
            cooldown_ms: 1_000,
            ..Default::default()
        }));

        assert!(budget.should_post(0, false).await.allow);
        assert!(budget.should_post(1_000, false).await.allow);

        let capped = budget.should_post(2_000, false).await;
        assert!(!capped.allow);
        assert_eq!(capped.reason, PostReason::HourCap);
        assert_eq!(capped.wait_ms, 1_000);
        assert_eq!(capped.hour_used, 3);

        // A denied post armed no cooldown: the next attempt in the same hour
        // keeps reporting the cap, not the cooldown.
        let again = budget.should_post(3_500, false).await;
        assert_eq!(again.reason, PostReason::HourCap);
        assert_eq!(again.hour_used, 4);
    }

    #[tokio::test]
    async fn hour_counters_roll_over_on_the_stamp() {
        let budget = budget(enabled(PostingBudgetConfig {
            max_per_hour: 1,
            cooldown_ms: 0,
            ..Default::default()
        }));

        assert!(budget.should_post(0, false).await.allow);
        assert_eq!(
            budget.should_post(10, false).await.reason,
            PostReason::HourCap
        );

        let next_hour = budget.should_post(3_600_010, false).await;
        assert!(next_hour.allow);
        assert_eq!(next_hour.hour_used, 1);
    }

    #[tokio::test]
    async fn day_cap_applies_across_hours() {
        let budget = budget(enabled(PostingBudgetConfig {
            max_per_hour: 100,
            max_per_day: 1,
            cooldown_ms: 0,
            ..Default::default()
        }));

        assert!(budget.should_post(0, false).await.allow);
        let capped = budget.should_post(3_600_001, false).await;
        assert_eq!(capped.reason, PostReason::DayCap);
        assert_eq!(capped.day_used, 2);
    }

    #[tokio::test]
    async fn clamp_deny_policy_blocks_posts() {
        let config = enabled(PostingBudgetConfig {
            when_clamp: ClampPolicy::Deny,
            ..Default::default()
        });
        let budget = PostingBudget::new(config, None, Some(clamped_guard()), Arc::new(FixedDraw(0)));
        let decision = budget.should_post(0, false).await;
        assert_eq!(decision.reason, PostReason::ClampDeny);
        assert_eq!(decision.wait_ms, 20_000);
    }

    #[tokio::test]
    async fn clamp_sample_drops_or_passes_per_draw() {
        let config = enabled(PostingBudgetConfig {
            when_clamp: ClampPolicy::Sample,
            sample_pct: 30,
            ..Default::default()
        });

        let dropped = PostingBudget::new(
            config.clone(),
            None,
            Some(clamped_guard()),
            Arc::new(FixedDraw(99)),
        );
        assert_eq!(
            dropped.should_post(0, false).await.reason,
            PostReason::ClampSampleDrop
        );

        let passed = PostingBudget::new(config, None, Some(clamped_guard()), Arc::new(FixedDraw(0)));
        let decision = passed.should_post(0, false).await;
        assert!(decision.allow);
        assert_eq!(decision.reason, PostReason::Ok);
    }

    #[tokio::test]
    async fn store_backed_counters_keep_the_same_semantics() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let budget = PostingBudget::new(
            enabled(PostingBudgetConfig {
                cooldown_ms: 50,
                max_per_hour: 2,
                ..Default::default()
            }),
            Some(Arc::clone(&store)),
            None,
            Arc::new(FixedDraw(0)),
        );

        let first = budget.should_post(epoch_ms(), false).await;
        assert!(first.allow);
        assert_eq!(first.hour_used, 1);

        let second = budget.should_post(epoch_ms(), false).await;
        assert_eq!(second.reason, PostReason::Cooldown);

        tokio::time::sleep(Duration::from_millis(70)).await;
        let third = budget.should_post(epoch_ms(), false).await;
        assert!(third.allow);
        assert_eq!(third.hour_used, 2);

        tokio::time::sleep(Duration::from_millis(70)).await;
        let capped = budget.should_post(epoch_ms(), false).await;
        assert_eq!(capped.reason, PostReason::HourCap);
        assert_eq!(capped.wait_ms, 50);
    }

    struct BrokenStore;

    #[async_trait]
    impl KvStore for BrokenStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn set(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Option<Duration>,
        ) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn incr(&self, _key: &str) -> StoreResult<i64> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn pttl(&self, _key: &str) -> StoreResult<Option<Duration>> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn store_failure_falls_back_to_memory_counters() {
        let budget = PostingBudget::new(
            enabled(PostingBudgetConfig {
                cooldown_ms: 60_000,
                ..Default::default()
            }),
            Some(Arc::new(BrokenStore)),
            None,
            Arc::new(FixedDraw(0)),
        );

        let first = budget.should_post(0, false).await;
        assert!(first.allow);
        assert_eq!(first.reason, PostReason::Ok);

        let second = budget.should_post(0, false).await;
        assert_eq!(second.reason, PostReason::Cooldown);
    }
}
