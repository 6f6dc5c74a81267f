//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route compilation (at startup):
//!     ServiceConfig[]
//!     → route.rs (validate destination, build TLS client config)
//!     → router.rs (index by plugin/service)
//!
//! Per request:
//!     request URI
//!     → router.rs (mount-path lookup, inbound URL extraction)
//!     → translate.rs (outbound host/port/path/headers)
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Translation is a pure function of (request, route)
//! - Hooks are trait objects attached to the route, not to requests

pub mod route;
pub mod router;
pub mod translate;

pub use route::{AuthorizationInjector, HeaderProcessor, Route, RouteError, ServiceKey};
pub use router::{RouteMatch, ServiceRouter};
pub use translate::{translate, AddressFamily, OutboundRequest};
