//! Response handling and transformation.
//!
//! # Responsibilities
//! - Identify how the client reached the gateway (scheme + host)
//! - Rewrite backend `location` headers so redirects stay on the gateway
//! - Map backend failures to a bare 500
//!
//! # Design Decisions
//! - Locations already pointing under `/ZLUX/plugins/` are left alone
//! - Absolute locations are cut with the same positional `:` split the
//!   plugin framework has always used, not a URL parser, so odd inputs keep
//!   their historical rewrite

use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::routing::Route;

const PLUGINS_SEGMENT: &str = "/ZLUX/plugins/";

/// Scheme the gateway listener terminates, attached to requests as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerScheme(pub &'static str);

/// How the client addressed the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrigin {
    pub scheme: String,
    pub host: String,
}

impl ClientOrigin {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
        }
    }

    /// Scheme from an absolute URI, else the listener's, else `http`.
    /// Host from the `host` header, else the URI authority.
    pub fn from_parts(parts: &Parts) -> Self {
        let scheme = parts
            .uri
            .scheme_str()
            .map(str::to_string)
            .or_else(|| parts.extensions.get::<ListenerScheme>().map(|s| s.0.to_string()))
            .unwrap_or_else(|| "http".to_string());

        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        Self { scheme, host }
    }
}

/// Rewrite a backend `location` value, or `None` to leave it unchanged.
pub fn rewrite_location(
    location: &str,
    origin: &ClientOrigin,
    plugin_id: &str,
    service_name: &str,
) -> Option<String> {
    if is_gateway_location(location) {
        return None;
    }

    let path = if location.starts_with('/') {
        location
    } else if location.starts_with("http") {
        absolute_location_path(location)?
    } else {
        return None;
    };

    Some(format!(
        "{}://{}{}{}/services/{}/_current{}",
        origin.scheme, origin.host, PLUGINS_SEGMENT, plugin_id, service_name, path
    ))
}

/// `http…` followed by at least one character, then `/ZLUX/plugins/` and more.
fn is_gateway_location(location: &str) -> bool {
    let Some(rest) = location.strip_prefix("http") else {
        return false;
    };
    rest.match_indices(PLUGINS_SEGMENT)
        .any(|(i, m)| i >= 1 && rest.len() > i + m.len())
}

/// Path of an absolute location: the third `:`-separated part when there is
/// one (after the port), else the second, from its first `/` on. `None`
/// when the value has no `:` at all.
fn absolute_location_path(location: &str) -> Option<&str> {
    let parts: Vec<&str> = location.split(':').collect();
    let part = parts.get(2).or_else(|| parts.get(1)).copied()?;
    Some(match part.find('/') {
        Some(i) => &part[i..],
        None => part,
    })
}

/// Apply the redirect rewrite to a response header map in place.
pub fn rewrite_redirect(headers: &mut HeaderMap, origin: &ClientOrigin, route: &Route) {
    let Some(location) = headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };
    let Some(rewritten) = rewrite_location(location, origin, route.plugin_id(), route.service_name()) else {
        return;
    };

    match HeaderValue::from_str(&rewritten) {
        Ok(value) => {
            tracing::debug!(location = %rewritten, "Redirecting to");
            headers.insert(header::LOCATION, value);
        }
        Err(e) => tracing::warn!(location = %rewritten, error = %e, "Rewritten location is not a valid header"),
    }
}

/// Bare 500 sent when the backend call fails.
pub fn upstream_failure() -> Response {
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn origin() -> ClientOrigin {
        ClientOrigin::new("https", "gw.example.com")
    }

    fn rewrite(location: &str) -> Option<String> {
        rewrite_location(location, &origin(), "myplugin", "svc")
    }

    #[test]
    fn relative_location_is_mounted_under_service() {
        assert_eq!(
            rewrite("/dashboard").as_deref(),
            Some("https://gw.example.com/ZLUX/plugins/myplugin/services/svc/_current/dashboard")
        );
    }

    #[test]
    fn absolute_location_with_port_keeps_path_and_query() {
        assert_eq!(
            rewrite("http://10.0.0.5:8080/login?next=/home").as_deref(),
            Some("https://gw.example.com/ZLUX/plugins/myplugin/services/svc/_current/login?next=/home")
        );
    }

    #[test]
    fn absolute_location_without_port_follows_positional_split() {
        // Only one ':' so the part after it still holds "//host".
        assert_eq!(
            rewrite("https://backend/x").as_deref(),
            Some("https://gw.example.com/ZLUX/plugins/myplugin/services/svc/_current//backend/x")
        );
    }

    #[test]
    fn gateway_locations_are_left_alone() {
        assert_eq!(
            rewrite("https://gw.example.com/ZLUX/plugins/other/services/x/_current/"),
            None
        );
        // Needs something after the plugins segment.
        assert!(rewrite("http://h:1/ZLUX/plugins/").is_some());
    }

    #[test]
    fn other_locations_are_left_alone() {
        assert_eq!(rewrite("relative/path"), None);
        assert_eq!(rewrite("mailto:someone"), None);
    }

    #[test]
    fn http_prefixed_values_without_scheme_are_left_alone() {
        assert_eq!(rewrite("httpdocs/index.html"), None);
        assert_eq!(rewrite("http-status"), None);
        assert_eq!(rewrite("http"), None);
    }

    #[test]
    fn origin_prefers_listener_scheme_and_host_header() {
        let mut request = Request::builder()
            .uri("/a")
            .header("host", "gw.example.com:8543")
            .body(())
            .unwrap();
        request.extensions_mut().insert(ListenerScheme("https"));
        let (parts, _) = request.into_parts();

        assert_eq!(
            ClientOrigin::from_parts(&parts),
            ClientOrigin::new("https", "gw.example.com:8543")
        );
    }

    #[test]
    fn origin_defaults_to_http() {
        let (parts, _) = Request::builder().uri("/a").body(()).unwrap().into_parts();
        assert_eq!(ClientOrigin::from_parts(&parts), ClientOrigin::new("http", ""));
    }
}
