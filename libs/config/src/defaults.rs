//! Default timings and limits
//!
//! Values match the fixed timings long-running game servers have used in practice.
//! They are starting points, not tuned against observed round-trip times.

/// Per-call deadline before a pending RPC is answered with `ActorTimeout` (milliseconds)
pub const CALL_TIMEOUT_MS: u64 = 40_000;

/// Cadence of the pending-call timeout sweep (milliseconds)
pub const SWEEP_INTERVAL_MS: u64 = 10_000;

/// Wait before re-resolving a relocated actor (milliseconds)
pub const RETRY_BACKOFF_MS: u64 = 1_000;

/// Relocation retries allowed for entity-addressed proxies
pub const MAX_FAILURES: u32 = 5;

/// Proxies unused for this long are disposed by the idle sweep (milliseconds)
pub const PROXY_IDLE_TIMEOUT_MS: u64 = 60_000;

/// Cadence of the proxy idle sweep (milliseconds)
pub const PROXY_IDLE_CHECK_MS: u64 = 10_000;

/// Default tracing filter
pub const LOG_LEVEL: &str = "info";

/// Prefix for environment overrides (`MESSAGING_CALL_TIMEOUT_MS=...`)
pub const ENV_PREFIX: &str = "MESSAGING";
