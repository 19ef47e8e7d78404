/*!
 * Rugwatch: reliability control plane for a multi-chain token risk scanner.
 *
 * The bot and HTTP surfaces live elsewhere; this crate owns everything that
 * sits between them and the upstream risk providers: per-provider circuit
 * breakers, a global token bucket, a versioned scan cache, the auto-guard
 * escalation ladder with its budget clamp, the posting-budget governor for
 * outbound broadcasts, and the SLO/budget monitors that feed the event bus.
 *
 * Construction is explicit: [`AppContext::bootstrap`] wires the components
 * from an [`AppConfig`] read once from the environment, and the handlers
 * consume decisions through [`gate::admit_scan`] and [`gate::guarded_fetch`].
 */

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod logging;
pub mod scan_cache;

pub use config::AppConfig;
pub use context::{AppContext, Probes};
pub use error::{AppError, Result};
pub use gate::{admit_scan, guarded_fetch, ScanAdmission};
pub use scan_cache::ScanCache;
