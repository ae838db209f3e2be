//! Reusable Kubernetes objects

use control::config::INGRESS_CLASS_ANNOTATION;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

pub const NAMESPACE: &str = "default";

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        ..Default::default()
    }
}

/// Host/path → service:port rule
pub struct RuleSpec<'a> {
    pub host: &'a str,
    pub path: Option<&'a str>,
    pub service: &'a str,
    pub port: i32,
}

impl<'a> RuleSpec<'a> {
    pub fn new(host: &'a str, service: &'a str, port: i32) -> Self {
        Self {
            host,
            path: None,
            service,
            port,
        }
    }

    pub fn with_path(mut self, path: &'a str) -> Self {
        self.path = Some(path);
        self
    }
}

/// Ingress with the class annotation set to `class` (none when `None`)
pub fn ingress(name: &str, class: Option<&str>, rules: &[RuleSpec<'_>]) -> Ingress {
    let annotations = class
        .map(|c| BTreeMap::from([(INGRESS_CLASS_ANNOTATION.to_string(), c.to_string())]));

    Ingress {
        metadata: ObjectMeta {
            annotations,
            ..meta(name)
        },
        spec: Some(IngressSpec {
            rules: Some(
                rules
                    .iter()
                    .map(|rule| IngressRule {
                        host: Some(rule.host.to_string()),
                        http: Some(HTTPIngressRuleValue {
                            paths: vec![HTTPIngressPath {
                                path: rule.path.map(String::from),
                                path_type: "Prefix".to_string(),
                                backend: IngressBackend {
                                    service: Some(IngressServiceBackend {
                                        name: rule.service.to_string(),
                                        port: Some(ServiceBackendPort {
                                            number: Some(rule.port),
                                            name: None,
                                        }),
                                    }),
                                    resource: None,
                                },
                            }],
                        }),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

/// Service with a single `port → target` mapping
pub fn service(name: &str, port: i32, target: i32) -> Service {
    Service {
        metadata: meta(name),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(target)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Endpoints with one subset of ready addresses on `port`
pub fn endpoints(name: &str, ips: &[&str], port: i32) -> Endpoints {
    Endpoints {
        metadata: meta(name),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(
                ips.iter()
                    .map(|ip| EndpointAddress {
                        ip: ip.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            not_ready_addresses: None,
            ports: Some(vec![EndpointPort {
                port,
                ..Default::default()
            }]),
        }]),
    }
}
