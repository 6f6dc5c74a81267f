//! Mount-path lookup and dispatch.
//!
//! # Responsibilities
//! - Store one handler per plugin/service pair
//! - Resolve `/ZLUX/plugins/{plugin}/services/{service}/{version}/...`
//! - Hand the remainder (path + query) to the service as its inbound URL
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) lookup via HashMap
//! - Explicit no-match rather than silent default

use std::collections::HashMap;

use axum::http::Uri;

use crate::routing::route::ServiceKey;

pub const PLUGINS_ROOT: &str = "/ZLUX/plugins/";

/// A resolved service and the URL it should see.
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
    pub key: ServiceKey,
    pub version: String,
    pub service: &'a T,
    /// Path after the version segment plus the original query.
    pub url: String,
}

#[derive(Debug)]
pub struct ServiceRouter<T> {
    services: HashMap<ServiceKey, T>,
}

impl<T> ServiceRouter<T> {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Register a service; returns the previous one for the same key.
    pub fn insert(&mut self, key: ServiceKey, service: T) -> Option<T> {
        self.services.insert(key, service)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Resolve a request URI to a registered service.
    pub fn match_uri(&self, uri: &Uri) -> Option<RouteMatch<'_, T>> {
        let mount = parse_mount(uri.path())?;
        let service = self.services.get(&mount.key)?;

        let url = match uri.query() {
            Some(query) => format!("{}?{}", mount.rest, query),
            None => mount.rest.to_string(),
        };

        Some(RouteMatch {
            key: mount.key,
            version: mount.version.to_string(),
            service,
            url,
        })
    }
}

impl<T> Default for ServiceRouter<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct Mount<'a> {
    key: ServiceKey,
    version: &'a str,
    rest: &'a str,
}

fn parse_mount(path: &str) -> Option<Mount<'_>> {
    let tail = path.strip_prefix(PLUGINS_ROOT)?;

    let (plugin_id, tail) = tail.split_once('/')?;
    let tail = tail.strip_prefix("services/")?;
    let (service_name, tail) = tail.split_once('/')?;

    let (version, rest) = match tail.find('/') {
        Some(i) => (&tail[..i], &tail[i..]),
        None => (tail, "/"),
    };

    if plugin_id.is_empty() || service_name.is_empty() || version.is_empty() {
        return None;
    }

    Some(Mount {
        key: ServiceKey::new(plugin_id, service_name),
        version,
        rest,
    })
}
