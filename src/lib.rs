//! Gateway data-plane proxy library.
//!
//! Forwards HTTP requests and relays WebSocket sessions from gateway mount
//! paths to per-service backends.
//!
//! ```text
//!     Client ──▶ http::server ──▶ routing::router ──┬──▶ http::proxy ──────▶ Backend (HTTP)
//!                                                   └──▶ http::websocket ──▶ Backend (WS)
//!                                       routing::translate (address, path, headers)
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Backend reachability
pub mod health;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
