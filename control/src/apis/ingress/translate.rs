//! Ingress → route translation
//!
//! Pure functions: an Ingress is flattened into [`BackendRule`]s, and each rule
//! is joined with its Service and Endpoints into one reverse proxy [`Route`].
//! Nothing here touches a store or the route table.

use crate::apis::mirror::ObjectKey;
use crate::error::TranslateError;
use common::{Match, Route, Upstream};
use k8s_openapi::api::core::v1::{EndpointSubset, Endpoints, Service, ServicePort};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::fmt;
use tracing::{debug, warn};

/// How an Ingress backend refers to a Service port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServicePortRef {
    Number(i32),
    Name(String),
}

impl fmt::Display for ServicePortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServicePortRef::Number(n) => write!(f, "{}", n),
            ServicePortRef::Name(name) => f.write_str(name),
        }
    }
}

/// One host/path → service mapping taken from an Ingress
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendRule {
    pub host: Option<String>,
    pub path: Option<String>,
    pub path_type: Option<String>,
    pub service_name: String,
    pub service_port: ServicePortRef,
}

impl BackendRule {
    /// Path matcher value for the proxy, if the rule has a path
    ///
    /// `Prefix` paths become wildcard matchers (`/api` → `/api*`); `Exact` and
    /// implementation-specific paths are passed through.
    pub fn match_path(&self) -> Option<String> {
        let path = self.path.as_deref().filter(|p| !p.is_empty())?;
        match self.path_type.as_deref() {
            Some("Prefix") if path.ends_with('*') => Some(path.to_string()),
            Some("Prefix") => match path.trim_end_matches('/') {
                "" => Some("/*".to_string()),
                trimmed => Some(format!("{}*", trimmed)),
            },
            _ => Some(path.to_string()),
        }
    }
}

/// Key of the Service (and Endpoints) a rule points at
pub fn service_key(namespace: &str, rule: &BackendRule) -> ObjectKey {
    ObjectKey::new(namespace, rule.service_name.clone())
}

/// Flatten `spec.rules[].http.paths[]` in declaration order
pub fn ingress_rules(ingress: &Ingress) -> Vec<BackendRule> {
    let mut rules = Vec::new();

    let Some(spec_rules) = ingress.spec.as_ref().and_then(|s| s.rules.as_ref()) else {
        return rules;
    };

    for rule in spec_rules {
        let Some(http) = &rule.http else {
            debug!(host = ?rule.host, "Ingress rule has no http block, skipping");
            continue;
        };

        for path in &http.paths {
            let Some(service) = &path.backend.service else {
                debug!(host = ?rule.host, path = ?path.path, "Backend is not a service, skipping");
                continue;
            };

            let port = service.port.as_ref();
            let service_port = match (
                port.and_then(|p| p.number),
                port.and_then(|p| p.name.clone()),
            ) {
                (Some(number), _) => ServicePortRef::Number(number),
                (None, Some(name)) => ServicePortRef::Name(name),
                (None, None) => {
                    warn!(service = %service.name, "Service backend has no port, skipping");
                    continue;
                }
            };

            rules.push(BackendRule {
                host: rule.host.clone(),
                path: path.path.clone(),
                path_type: Some(path.path_type.clone()).filter(|t| !t.is_empty()),
                service_name: service.name.clone(),
                service_port,
            });
        }
    }

    rules
}

/// Join a rule with its Service and Endpoints into a reverse proxy route
pub fn build_route(
    rule: &BackendRule,
    service: &Service,
    endpoints: &Endpoints,
) -> Result<Route, TranslateError> {
    let host = rule
        .host
        .as_deref()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TranslateError::MissingHost {
            service: rule.service_name.clone(),
        })?;

    let service_port =
        find_service_port(service, &rule.service_port).ok_or_else(|| {
            TranslateError::UnknownServicePort {
                service: rule.service_name.clone(),
                port: rule.service_port.to_string(),
            }
        })?;

    let upstreams = resolve_upstreams(&rule.service_name, service, service_port, endpoints)?;

    let matcher = match rule.match_path() {
        Some(path) => Match::host_path(host, path),
        None => Match::host(host),
    };

    Ok(Route::reverse_proxy(matcher, upstreams))
}

fn find_service_port<'a>(service: &'a Service, port_ref: &ServicePortRef) -> Option<&'a ServicePort> {
    let ports = service.spec.as_ref()?.ports.as_ref()?;
    match port_ref {
        ServicePortRef::Number(number) => ports.iter().find(|p| p.port == *number),
        ServicePortRef::Name(name) => ports.iter().find(|p| p.name.as_ref() == Some(name)),
    }
}

/// One upstream per ready address per subset, in subset then address order
fn resolve_upstreams(
    service_name: &str,
    service: &Service,
    service_port: &ServicePort,
    endpoints: &Endpoints,
) -> Result<Vec<Upstream>, TranslateError> {
    let mut upstreams = Vec::new();
    let mut unresolved_target = false;

    for subset in endpoints.subsets.iter().flatten() {
        let addresses = subset.addresses.as_deref().unwrap_or_default();
        if addresses.is_empty() {
            continue;
        }

        let Some(port) = resolve_target_port(service, service_port, subset) else {
            unresolved_target = true;
            continue;
        };

        upstreams.extend(addresses.iter().map(|addr| Upstream::new(&addr.ip, port)));
    }

    if upstreams.is_empty() {
        if unresolved_target {
            return Err(TranslateError::UnresolvableTargetPort {
                service: service_name.to_string(),
                target: target_port_label(service_port),
            });
        }
        return Err(TranslateError::NoUpstreams {
            service: service_name.to_string(),
        });
    }

    Ok(upstreams)
}

/// Concrete port number the upstreams of `subset` listen on
///
/// A missing target port means "same as the service port". A named target port
/// is resolved through the subset's ports, where the endpoints controller
/// publishes the number under the service port's name; failing that, through a
/// service port carrying the target name.
fn resolve_target_port(
    service: &Service,
    service_port: &ServicePort,
    subset: &EndpointSubset,
) -> Option<u16> {
    match &service_port.target_port {
        None => u16::try_from(service_port.port).ok(),
        Some(IntOrString::Int(0)) => u16::try_from(service_port.port).ok(),
        Some(IntOrString::Int(number)) => u16::try_from(*number).ok(),
        Some(IntOrString::String(target)) => subset
            .ports
            .iter()
            .flatten()
            .find(|p| p.name == service_port.name)
            .and_then(|p| u16::try_from(p.port).ok())
            .or_else(|| {
                let named = service
                    .spec
                    .as_ref()?
                    .ports
                    .as_ref()?
                    .iter()
                    .find(|p| p.name.as_ref() == Some(target))?;
                match &named.target_port {
                    Some(IntOrString::Int(number)) if *number > 0 => u16::try_from(*number).ok(),
                    _ => u16::try_from(named.port).ok(),
                }
            }),
    }
}

fn target_port_label(service_port: &ServicePort) -> String {
    match &service_port.target_port {
        Some(IntOrString::Int(number)) => number.to_string(),
        Some(IntOrString::String(name)) => name.clone(),
        None => service_port.port.to_string(),
    }
}
