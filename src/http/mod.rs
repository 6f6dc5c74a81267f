//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, mount-path dispatch)
//!     → upgrade request?
//!         yes → websocket.rs (relay session to the backend)
//!         no  → proxy.rs (single outbound call)
//!                 → response.rs (redirect rewrite)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use proxy::HttpProxy;
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use response::{rewrite_location, ClientOrigin, ListenerScheme};
pub use server::{HttpServer, ServerError};
pub use websocket::{ClosePolicy, RelayError, RelayOutcome, WebSocketProxy};
