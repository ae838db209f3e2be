//! Caddy Ingress Common Types
//!
//! Route model and admin API wire schema shared by the controller.
//!
//! Every type here is a plain value: two routes built from the same fields are
//! equal, and that structural equality is the only identity a route has. The
//! route table in `control` relies on it for idempotent add/delete.
//!
//! Serialization follows the JSON accepted by the proxy admin endpoint
//! (`/config/apps/http/servers/{name}`) and is enabled with the `serde` feature.

use std::collections::BTreeMap;
use std::fmt;

/// Handler name for reverse proxying
pub const REVERSE_PROXY: &str = "reverse_proxy";

/// Handler name for static file serving
pub const FILE_SERVER: &str = "file_server";

// =============================================================================
// Upstream
// =============================================================================

/// A single backend dial target (`host:port`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Upstream {
    pub dial: String,
}

impl Upstream {
    /// Build a dial target from an address and a port
    ///
    /// IPv6 literals are bracketed so the port separator stays unambiguous.
    pub fn new(host: &str, port: u16) -> Self {
        let dial = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        Self { dial }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dial)
    }
}

// =============================================================================
// Match
// =============================================================================

/// Request match predicate: host list plus an optional path list
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Match {
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub host: Vec<String>,

    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub path: Option<Vec<String>>,
}

impl Match {
    /// Match a single host, any path
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: vec![host.into()],
            path: None,
        }
    }

    /// Match a single host and a single path
    pub fn host_path(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: vec![host.into()],
            path: Some(vec![path.into()]),
        }
    }
}

// =============================================================================
// Handler
// =============================================================================

/// Route handler, tagged by the `handler` field on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "handler", rename_all = "snake_case"))]
pub enum Handler {
    /// Proxy to an ordered list of upstreams
    ReverseProxy { upstreams: Vec<Upstream> },
    /// Serve files from a root directory
    FileServer { root: String },
}

impl Handler {
    /// Wire name of this handler kind
    pub fn kind(&self) -> &'static str {
        match self {
            Handler::ReverseProxy { .. } => REVERSE_PROXY,
            Handler::FileServer { .. } => FILE_SERVER,
        }
    }
}

// =============================================================================
// Route
// =============================================================================

/// One proxy rule: match predicates plus the handler chain
///
/// Routes have no key. Equality is over the full structure, nested list order
/// included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Route {
    #[cfg_attr(feature = "serde", serde(default))]
    pub handle: Vec<Handler>,

    #[cfg_attr(feature = "serde", serde(rename = "match", default))]
    pub matchers: Vec<Match>,
}

impl Route {
    /// Reverse proxy route for a single match predicate
    pub fn reverse_proxy(matcher: Match, upstreams: Vec<Upstream>) -> Self {
        Self {
            handle: vec![Handler::ReverseProxy { upstreams }],
            matchers: vec![matcher],
        }
    }

    /// Static file server route for a single match predicate
    pub fn file_server(matcher: Match, root: impl Into<String>) -> Self {
        Self {
            handle: vec![Handler::FileServer { root: root.into() }],
            matchers: vec![matcher],
        }
    }

    /// All hosts this route matches on
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.matchers
            .iter()
            .flat_map(|m| m.host.iter().map(String::as_str))
    }

    /// All upstreams across reverse proxy handlers
    pub fn upstreams(&self) -> impl Iterator<Item = &Upstream> {
        self.handle
            .iter()
            .filter_map(|h| match h {
                Handler::ReverseProxy { upstreams } => Some(upstreams),
                Handler::FileServer { .. } => None,
            })
            .flatten()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hosts: Vec<&str> = self.hosts().collect();
        let paths: Vec<&str> = self
            .matchers
            .iter()
            .filter_map(|m| m.path.as_ref())
            .flatten()
            .map(String::as_str)
            .collect();
        let upstreams: Vec<&str> = self.upstreams().map(|u| u.dial.as_str()).collect();

        write!(f, "{}", hosts.join(","))?;
        if !paths.is_empty() {
            write!(f, "{}", paths.join(","))?;
        }
        write!(f, " -> [{}]", upstreams.join(", "))
    }
}

// =============================================================================
// Server
// =============================================================================

/// Automatic TLS policy for a server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AutomaticHttps {
    pub disable: bool,
}

/// Named listener configuration pushed to the proxy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Server {
    #[cfg_attr(feature = "serde", serde(default))]
    pub listen: Vec<String>,

    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub read_timeout: Option<String>,

    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub read_header_timeout: Option<String>,

    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub write_timeout: Option<String>,

    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub idle_timeout: Option<String>,

    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub max_header_bytes: Option<u64>,

    #[cfg_attr(feature = "serde", serde(default))]
    pub routes: Vec<Route>,

    #[cfg_attr(feature = "serde", serde(default))]
    pub automatic_https: AutomaticHttps,
}

impl Server {
    /// Empty server on the given listen addresses, automatic HTTPS disabled
    pub fn new<I, S>(listen: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            listen: listen.into_iter().map(Into::into).collect(),
            automatic_https: AutomaticHttps { disable: true },
            ..Default::default()
        }
    }
}

// =============================================================================
// Config
// =============================================================================

/// Full proxy configuration, used for the startup push
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    pub apps: Apps,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Apps {
    pub http: HttpApp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HttpApp {
    /// Servers by name (ordered for deterministic output)
    pub servers: BTreeMap<String, Server>,
}

impl Config {
    /// Config holding exactly one named server
    pub fn with_server(name: impl Into<String>, server: Server) -> Self {
        let mut config = Self::default();
        config.apps.http.servers.insert(name.into(), server);
        config
    }

    /// Look up a server by name
    pub fn server(&self, name: &str) -> Option<&Server> {
        self.apps.http.servers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_dial_ipv4() {
        assert_eq!(Upstream::new("10.0.0.1", 9090).dial, "10.0.0.1:9090");
    }

    #[test]
    fn test_upstream_dial_ipv6_is_bracketed() {
        assert_eq!(Upstream::new("fd00::1", 8080).dial, "[fd00::1]:8080");
        assert_eq!(Upstream::new("[fd00::1]", 8080).dial, "[fd00::1]:8080");
    }

    #[test]
    fn test_identical_routes_are_equal() {
        let a = Route::reverse_proxy(
            Match::host("a.example.com"),
            vec![Upstream::new("10.0.0.1", 80)],
        );
        let b = Route::reverse_proxy(
            Match::host("a.example.com"),
            vec![Upstream::new("10.0.0.1", 80)],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_upstream_order_is_part_of_equality() {
        let forward = Route::reverse_proxy(
            Match::host("a.example.com"),
            vec![Upstream::new("10.0.0.1", 80), Upstream::new("10.0.0.2", 80)],
        );
        let reversed = Route::reverse_proxy(
            Match::host("a.example.com"),
            vec![Upstream::new("10.0.0.2", 80), Upstream::new("10.0.0.1", 80)],
        );
        assert_ne!(forward, reversed);
    }

    #[test]
    fn test_path_distinguishes_routes() {
        let root = Route::reverse_proxy(Match::host("a.example.com"), vec![]);
        let api = Route::reverse_proxy(Match::host_path("a.example.com", "/api"), vec![]);
        assert_ne!(root, api);
    }

    #[test]
    fn test_route_accessors() {
        let route = Route::reverse_proxy(
            Match::host_path("a.example.com", "/api"),
            vec![Upstream::new("10.0.0.1", 80)],
        );
        assert_eq!(route.hosts().collect::<Vec<_>>(), vec!["a.example.com"]);
        assert_eq!(route.upstreams().count(), 1);
        assert_eq!(route.handle[0].kind(), REVERSE_PROXY);
        assert_eq!(
            route.to_string(),
            "a.example.com/api -> [10.0.0.1:80]"
        );

        let files = Route::file_server(Match::host("static.example.com"), "/srv");
        assert_eq!(files.upstreams().count(), 0);
        assert_eq!(files.handle[0].kind(), FILE_SERVER);
    }

    #[test]
    fn test_new_server_is_empty_with_https_disabled() {
        let server = Server::new([":80"]);
        assert_eq!(server.listen, vec![":80".to_string()]);
        assert!(server.routes.is_empty());
        assert!(server.automatic_https.disable);
    }

    #[test]
    fn test_config_with_server() {
        let config = Config::with_server("kubernetes-ingress", Server::new([":80"]));
        assert!(config.server("kubernetes-ingress").is_some());
        assert!(config.server("other").is_none());
    }
}
