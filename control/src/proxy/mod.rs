//! Proxy-facing side of the controller: admin API pushes and the status endpoint

pub mod admin;
pub mod server;
