//! Metrics and health endpoint
//!
//! `GET /metrics` serves the controller registry in Prometheus text format,
//! `GET /healthz` answers `OK` while the process is up.

use crate::apis::metrics::gather_controller_metrics;
use crate::error::ControlError;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Bytes, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// HTTP listener for `/metrics` and `/healthz`
pub struct StatusServer {
    listener: TcpListener,
}

impl StatusServer {
    /// Bind to `addr` right away so port conflicts surface at startup
    pub async fn bind(addr: &str) -> Result<Self, ControlError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ControlError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips to true
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let bind_addr = self
            .listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        info!("Metrics server listening on {}", bind_addr);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!("Accepted connection from {} on {}", peer_addr, bind_addr);
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(|req: Request<hyper::body::Incoming>| async move {
                                    Ok::<_, Infallible>(handle_request(&req))
                                });
                                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                    debug!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error on {}: {}", bind_addr, e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Metrics server on {} stopped", bind_addr);
    }
}

fn handle_request<B>(req: &Request<B>) -> Response<Full<Bytes>> {
    if req.method() != Method::GET {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    match req.uri().path() {
        "/healthz" => text_response(StatusCode::OK, "OK"),
        "/metrics" => match gather_controller_metrics() {
            Ok(body) => text_response(StatusCode::OK, body),
            Err(e) => {
                error!("{}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, e)
            }
        },
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::apis::metrics::record_config_push;

    fn get(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[test]
    fn test_healthz_and_unknown_paths() {
        assert_eq!(handle_request(&get("/healthz")).status(), StatusCode::OK);
        assert_eq!(handle_request(&get("/nope")).status(), StatusCode::NOT_FOUND);

        let post = Request::builder()
            .method(Method::POST)
            .uri("/metrics")
            .body(())
            .unwrap();
        assert_eq!(handle_request(&post).status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_serves_metrics_until_shutdown() {
        record_config_push("status-server-test", "success");

        let server = StatusServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(server.serve(shutdown_rx));

        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("config_pushes_total"));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server should stop on shutdown")
            .unwrap();
    }
}
