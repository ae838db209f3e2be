//! Ingress (networking.k8s.io/v1) support
//!
//! - `translate`: Ingress rules + Service + Endpoints → proxy routes
//! - `ingress`: reconciler applying those routes to the route table
//! - `watch`: watcher streams feeding mirrors and the reconciler

#[allow(clippy::module_inception)]
pub mod ingress;
pub mod translate;
pub mod watch;

pub use ingress::{IngressReconciler, Resource, ResourceEvent};
