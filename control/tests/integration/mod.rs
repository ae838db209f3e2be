//! Integration test framework
//!
//! Drives the reconciler end to end with real kube-rs reflector stores and a
//! local HTTP server standing in for the proxy admin API.
//!
//! ## Pieces
//!
//! - [`AdminStub`]: records every request path and JSON body it receives
//! - [`Harness`]: reconciler + mirror writers wired to an `AdminStub`
//! - fixture builders for Ingress, Service and Endpoints objects

pub mod fixtures;

use control::apis::ingress::watch::process_event;
use control::apis::ingress::{IngressReconciler, Resource};
use control::apis::mirror::{mirror, MirrorWriter};
use control::config::ControllerConfig;
use control::error::ReconcileError;
use control::proxy::admin::AdminApiPusher;
use control::routes::RouteTable;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::watcher;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// One request seen by the admin stand-in
#[derive(Debug, Clone)]
pub struct AdminRequest {
    pub method: String,
    pub path: String,
    pub body: serde_json::Value,
}

/// Local HTTP server answering like the proxy admin API
pub struct AdminStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<AdminRequest>>>,
    status: Arc<AtomicU16>,
}

impl AdminStub {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind admin stub");
        let addr = listener.local_addr().expect("Admin stub has no address");
        let requests: Arc<Mutex<Vec<AdminRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let status = Arc::new(AtomicU16::new(StatusCode::OK.as_u16()));

        let seen = requests.clone();
        let answer = status.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = seen.clone();
                let answer = answer.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let seen = seen.clone();
                        let answer = answer.clone();
                        async move {
                            let method = req.method().to_string();
                            let path = req.uri().path().to_string();
                            let bytes = req
                                .into_body()
                                .collect()
                                .await
                                .map(|b| b.to_bytes())
                                .unwrap_or_default();
                            let body =
                                serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
                            seen.lock().expect("poisoned").push(AdminRequest {
                                method,
                                path,
                                body,
                            });
                            let status = StatusCode::from_u16(answer.load(Ordering::SeqCst))
                                .expect("valid status");
                            let body = if status.is_success() {
                                Bytes::new()
                            } else {
                                Bytes::from_static(b"loading config: internal error")
                            };
                            Ok::<_, Infallible>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(body))
                                    .expect("valid response"),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
            status,
        }
    }

    /// Status returned to every following request
    pub fn respond_with(&self, status: StatusCode) {
        self.status.store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<AdminRequest> {
        self.requests.lock().expect("poisoned").clone()
    }

    /// Most recent body pushed to `path`
    pub fn last_body(&self, path: &str) -> Option<serde_json::Value> {
        self.requests()
            .into_iter()
            .rev()
            .find(|r| r.path == path)
            .map(|r| r.body)
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

pub const SERVER_PATH: &str = "/config/apps/http/servers/kubernetes-ingress";

/// Reconciler wired to real mirrors and an [`AdminStub`]
pub struct Harness {
    pub admin: AdminStub,
    pub reconciler: Arc<IngressReconciler>,
    pub ingresses: MirrorWriter<Ingress>,
    pub services: MirrorWriter<Service>,
    pub endpoints: MirrorWriter<Endpoints>,
    pub shutdown: watch::Sender<bool>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(ControllerConfig::default()).await
    }

    pub async fn with_config(mut config: ControllerConfig) -> Self {
        let admin = AdminStub::start().await;
        config.admin_url = admin.base_url.clone();
        config.sync.poll_interval_ms = 10;

        let (_ingress_mirror, ingresses) = mirror::<Ingress>();
        let (service_mirror, services) = mirror::<Service>();
        let (endpoints_mirror, endpoints) = mirror::<Endpoints>();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let table = Arc::new(RouteTable::new(
            config.server_name.clone(),
            config.initial_server(),
        ));
        let pusher = Arc::new(
            AdminApiPusher::new(admin.base_url.clone(), Duration::from_secs(5))
                .expect("Failed to build pusher"),
        );

        let reconciler = Arc::new(IngressReconciler::new(
            config,
            table,
            service_mirror,
            endpoints_mirror,
            pusher,
            shutdown_rx,
        ));

        Self {
            admin,
            reconciler,
            ingresses,
            services,
            endpoints,
            shutdown,
        }
    }

    /// Run the initial listing of the Service and Endpoints mirrors
    pub async fn list_backends(&mut self, services: Vec<Service>, endpoints: Vec<Endpoints>) {
        self.service_event(watcher::Event::Init).await;
        for svc in services {
            self.service_event(watcher::Event::InitApply(svc)).await;
        }
        self.service_event(watcher::Event::InitDone).await;

        self.endpoints_event(watcher::Event::Init).await;
        for eps in endpoints {
            self.endpoints_event(watcher::Event::InitApply(eps)).await;
        }
        self.endpoints_event(watcher::Event::InitDone).await;
    }

    pub async fn ingress_event(&mut self, event: watcher::Event<Ingress>) {
        let errors = self.try_ingress_event(event).await;
        assert!(errors.is_empty(), "Ingress event failed: {:?}", errors);
    }

    /// Ingress event whose failures the test inspects itself
    pub async fn try_ingress_event(&mut self, event: watcher::Event<Ingress>) -> Vec<ReconcileError> {
        process_event(&mut self.ingresses, event, Resource::Ingress, &self.reconciler).await
    }

    pub async fn service_event(&mut self, event: watcher::Event<Service>) {
        let errors =
            process_event(&mut self.services, event, Resource::Service, &self.reconciler).await;
        assert!(errors.is_empty(), "Service event failed: {:?}", errors);
    }

    pub async fn endpoints_event(&mut self, event: watcher::Event<Endpoints>) {
        let errors =
            process_event(&mut self.endpoints, event, Resource::Endpoints, &self.reconciler).await;
        assert!(errors.is_empty(), "Endpoints event failed: {:?}", errors);
    }
}
