//! Rugwatch Core Guard: pure-logic runtime guards for the scan service.
//!
//! # Overview
//!
//! This crate provides the control-plane primitives that sit between every
//! upstream provider call and the client-facing response:
//!
//! - **Breaker**: per-provider circuit breaker with failure-count opening
//!   and success-streak closing
//! - **TokenBucket**: continuous-refill admission limiter
//! - **EventBus**: synchronous in-process breach notifications
//! - **SloRecorder / SloMonitor**: latency + error sampling and alerting
//! - **BudgetGuard**: daily credit-spend watchdog
//! - **AutoGuard**: 4-step escalation ladder plus budget clamp
//! - **PostingBudget**: hour/day caps and cooldown for outbound broadcasts
//! - **KvStore / TypedCache / VersionCounter**: cache substrate with
//!   version-based bulk invalidation
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Redis or any concrete store (the root crate injects a [`store::KvStore`])
//! - HTTP, Telegram, or any transport
//! - Provider scoring semantics
//!
//! Nothing here suspends except store access; in-memory state uses short
//! critical sections that are never held across an await.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │  Request / broadcast handlers │
//!                 └──────┬────────────┬──────────┘
//!                        │            │
//!            TokenBucket │            │ PostingBudget
//!                        ▼            ▼
//!                 ┌──────────────────────────────┐
//!                 │          AutoGuard           │◄─ clamp ── BudgetGuard
//!                 │  (step ladder + clamp)       │
//!                 └──────────────▲───────────────┘
//!                                │ alert:breach
//!                 ┌──────────────┴───────────────┐
//!                 │       EventBus ◄ SloMonitor  │◄─ samples ─ SloRecorder
//!                 └──────────────────────────────┘
//!                        │
//!               Breaker per provider
//!                        ▼
//!              upstream risk providers
//! ```
//!
//! # Usage Example
//!
//! ```
//! use rugwatch_core_guard::breaker::{Breaker, BreakerConfig, BreakerState};
//!
//! let breaker = Breaker::new("goplus", BreakerConfig::default());
//! assert!(breaker.allow());
//! breaker.fail();
//! assert_eq!(breaker.state(), BreakerState::Ok);
//! ```

pub mod auto_guard;
pub mod breaker;
pub mod cache;
pub mod events;
pub mod monitor;
pub mod posting_budget;
pub mod rate_limit;
pub mod slo;
pub mod store;
pub mod time;

// Re-export main types for convenience
pub use auto_guard::{AutoGuard, AutoGuardConfig, Clamp, DenyDecision, RuntimeOverrides};
pub use breaker::{Breaker, BreakerConfig, BreakerRegistry, BreakerState};
pub use cache::{TypedCache, VersionCounter};
pub use events::{BreachEvent, BreachKind, EventBus, GuardEvent};
pub use monitor::{
    AdminNotifier, BudgetAction, BudgetGuard, BudgetGuardConfig, Credits, CreditsProbe,
    SloMonitor, SloMonitorConfig, SloThresholds,
};
pub use posting_budget::{
    ClampPolicy, DrawPercent, PostDecision, PostReason, PostingBudget, PostingBudgetConfig,
    RandomDraw,
};
pub use rate_limit::TokenBucket;
pub use slo::{RouteSnapshot, SloRecorder, SloSnapshot};
pub use store::{KvStore, MemoryStore, StoreError, StoreResult};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use rugwatch_core_guard::prelude::*;
/// ```
pub mod prelude {
    pub use super::auto_guard::{AutoGuard, AutoGuardConfig, Clamp, RuntimeOverrides};
    pub use super::breaker::{Breaker, BreakerConfig, BreakerRegistry, BreakerState};
    pub use super::cache::{TypedCache, VersionCounter};
    pub use super::events::{BreachEvent, BreachKind, EventBus, GuardEvent};
    pub use super::monitor::{BudgetGuard, BudgetGuardConfig, Credits, SloMonitor, SloMonitorConfig};
    pub use super::posting_budget::{PostingBudget, PostingBudgetConfig};
    pub use super::rate_limit::TokenBucket;
    pub use super::slo::SloRecorder;
    pub use super::store::{KvStore, MemoryStore};
}
