//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound to a backend
//!     → connect.rs (IPv4-only resolution and TCP connect)
//!     → tls.rs (optional rustls client handshake)
//!     → hand off to the HTTP client or WebSocket handshake
//!
//! Inbound listener
//!     → tls.rs (optional certificate for the listener)
//!
//! WebSocket sessions
//!     → session.rs (session ids, live-session count)
//! ```

pub mod connect;
pub mod session;
pub mod tls;

pub use session::{SessionGuard, SessionId, SessionTracker};
