//! Inbound request → outbound request translation.
//!
//! Pure: the same inbound request and route always produce the same
//! [`OutboundRequest`].
//!
//! Header rules, first match wins:
//! 1. listed in the route's removal list → dropped
//! 2. `host` / `origin` → `<backend-host>:<backend-port>`
//! 3. `sec-websocket-*` → dropped (renegotiated with the backend)
//! 4. anything else → copied unchanged

use axum::http::uri::InvalidUri;
use axum::http::{header, HeaderMap, HeaderName, Method, Uri};

use crate::routing::route::Route;

const WEBSOCKET_HEADER_PREFIX: &str = "sec-websocket";

/// Address family used to reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
}

/// Everything needed to issue one proxied call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub host: String,
    pub port: u16,
    pub family: AddressFamily,
    pub headers: HeaderMap,
    /// URL prefix + inbound path and query, verbatim.
    pub path: String,
    pub method: Method,
}

impl OutboundRequest {
    /// Absolute target for the given scheme, e.g. `http://10.0.0.5:8080/api/x`.
    pub fn target(&self, scheme: &str) -> String {
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }

    pub fn uri(&self, scheme: &str) -> Result<Uri, InvalidUri> {
        self.target(scheme).parse()
    }
}

/// Build the outbound request for `method url` with `headers` against `route`.
///
/// `url` is the inbound path and query as received by the proxy.
pub fn translate(method: &Method, url: &str, headers: &HeaderMap, route: &Route) -> OutboundRequest {
    OutboundRequest {
        host: route.host().to_string(),
        port: route.port(),
        family: AddressFamily::Ipv4,
        headers: translate_headers(headers, route),
        path: format!("{}{}", route.url_prefix(), url),
        method: method.clone(),
    }
}

fn translate_headers(headers: &HeaderMap, route: &Route) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.keys_len());

    for name in headers.keys() {
        if route.removes(name) {
            continue;
        }
        if name == header::HOST || name == header::ORIGIN {
            out.insert(name.clone(), route.authority().clone());
            continue;
        }
        if is_websocket_header(name) {
            continue;
        }
        for value in headers.get_all(name) {
            out.append(name.clone(), value.clone());
        }
    }

    out
}

fn is_websocket_header(name: &HeaderName) -> bool {
    // HeaderName is always lowercase.
    name.as_str().starts_with(WEBSOCKET_HEADER_PREFIX)
}
