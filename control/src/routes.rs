//! Route table for one named proxy server
//!
//! All mutation goes through `add_route`/`delete_route`, and serialization
//! takes the same lock, so the admin payload never reflects a half-applied
//! change. Insertion order is match priority on the proxy side (first match
//! wins); the table never reorders.

use crate::apis::metrics::set_route_count;
use common::{Config, Route, Server};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Result of `add_route`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// A structurally equal route is already present; nothing changed
    AlreadyExists,
}

/// Result of `delete_route`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed,
    /// No structurally equal route was present; nothing changed
    NotFound,
}

/// Mutex helper that recovers from poisoning
#[inline]
fn safe_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!("Route table lock poisoned, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

/// Lock-protected route collection of one named server
#[derive(Debug)]
pub struct RouteTable {
    name: String,
    server: Mutex<Server>,
}

impl RouteTable {
    /// Create a table for `name`; any routes already on `server` are kept
    pub fn new(name: impl Into<String>, server: Server) -> Self {
        let name = name.into();
        set_route_count(&name, server.routes.len());
        Self {
            name,
            server: Mutex::new(server),
        }
    }

    /// Server name on the proxy side
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append `route` unless a structurally equal route is present
    pub fn add_route(&self, route: Route) -> AddOutcome {
        let mut server = safe_lock(&self.server);
        if server.routes.contains(&route) {
            debug!(server = %self.name, route = %route, "Route already exists");
            return AddOutcome::AlreadyExists;
        }

        info!(server = %self.name, route = %route, "Adding route");
        server.routes.push(route);
        set_route_count(&self.name, server.routes.len());
        AddOutcome::Added
    }

    /// Remove the route structurally equal to `route`, keeping the order of the rest
    pub fn delete_route(&self, route: &Route) -> DeleteOutcome {
        let mut server = safe_lock(&self.server);
        match server.routes.iter().position(|r| r == route) {
            Some(index) => {
                server.routes.remove(index);
                info!(server = %self.name, route = %route, "Deleted route");
                set_route_count(&self.name, server.routes.len());
                DeleteOutcome::Removed
            }
            None => {
                warn!(server = %self.name, route = %route, "Route for deletion not found");
                DeleteOutcome::NotFound
            }
        }
    }

    /// Wire representation of the server, taken under the table lock
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let server = safe_lock(&self.server);
        serde_json::to_vec(&*server)
    }

    /// Copy of the current server
    pub fn snapshot(&self) -> Server {
        safe_lock(&self.server).clone()
    }

    /// Copy of the current routes, in match order
    pub fn routes(&self) -> Vec<Route> {
        safe_lock(&self.server).routes.clone()
    }

    pub fn len(&self) -> usize {
        safe_lock(&self.server).routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full config containing only this server, as pushed at startup
    pub fn initial_config(&self) -> Config {
        Config::with_server(self.name.clone(), self.snapshot())
    }
}
