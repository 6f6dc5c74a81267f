//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (lifecycle/startup.rs):
//!     services with probe_on_startup
//!     → probe.rs (connect, retry while refused)
//!     → reachable / unreachable
//! ```
//!
//! # Design Decisions
//! - Reachability means "accepts TCP", no application-level check
//! - Only connection-refused is retried; anything else is final

pub mod probe;

pub use probe::{check_proxied_host, probe, ProbeError, DEFAULT_DEADLINE, RECONNECT_DELAY};
