//! Kubernetes API integrations
//!
//! Watches Ingress, Service and Endpoints resources and mirrors them locally.

pub mod ingress;
pub mod metrics;
pub mod mirror;
