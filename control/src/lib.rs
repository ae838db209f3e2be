//! Caddy ingress controller library
//!
//! Exposes the route table, reconciler, mirrors and admin API client for the
//! binary and integration tests.

pub mod apis;
pub mod config;
pub mod error;
pub mod proxy;
pub mod routes;
