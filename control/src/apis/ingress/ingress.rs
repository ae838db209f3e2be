//! Ingress reconciler
//!
//! Turns watch events into route table mutations and pushes the result to the
//! proxy. Only Ingress events carrying this controller's class do any work;
//! Service and Endpoints are read lazily through the mirrors when a rule is
//! translated.
//!
//! Every pass runs under one coarse async lock, so events are applied one at a
//! time in delivery order. The same lock guards the applied-route ledger: the
//! exact routes each Ingress added, which is what a later delete removes.
//!
//! An Ingress whose pass gave up on the sync gate is parked and replayed once
//! both mirrors have synced (see [`IngressReconciler::replay_deferred`]).

use crate::apis::ingress::translate::{build_route, ingress_rules, service_key, BackendRule};
use crate::apis::metrics::record_ingress_reconciliation;
use crate::apis::mirror::{Mirror, ObjectKey};
use crate::config::{ControllerConfig, INGRESS_CLASS_ANNOTATION};
use crate::error::ReconcileError;
use crate::proxy::admin::ConfigPusher;
use crate::routes::{AddOutcome, DeleteOutcome, RouteTable};
use common::Route;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// A mirrored object, tagged with its kind
#[derive(Debug, Clone)]
pub enum Resource {
    Ingress(Arc<Ingress>),
    Service(Arc<Service>),
    Endpoints(Arc<Endpoints>),
}

impl Resource {
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Ingress(_) => "Ingress",
            Resource::Service(_) => "Service",
            Resource::Endpoints(_) => "Endpoints",
        }
    }

    pub fn key(&self) -> ObjectKey {
        match self {
            Resource::Ingress(obj) => ObjectKey::of(&**obj),
            Resource::Service(obj) => ObjectKey::of(&**obj),
            Resource::Endpoints(obj) => ObjectKey::of(&**obj),
        }
    }
}

/// Change delivered by the watch side
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Added(Resource),
    Updated { old: Resource, new: Resource },
    Deleted(Resource),
}

impl ResourceEvent {
    pub fn action(&self) -> &'static str {
        match self {
            ResourceEvent::Added(_) => "added",
            ResourceEvent::Updated { .. } => "updated",
            ResourceEvent::Deleted(_) => "deleted",
        }
    }

    /// The current object (the new one for updates)
    pub fn resource(&self) -> &Resource {
        match self {
            ResourceEvent::Added(r) | ResourceEvent::Deleted(r) => r,
            ResourceEvent::Updated { new, .. } => new,
        }
    }
}

/// Routes added on behalf of each Ingress, in the order they were produced
type AppliedRoutes = HashMap<ObjectKey, Vec<Route>>;

#[derive(Default)]
struct Ledger {
    applied: AppliedRoutes,
    /// Latest copy of each Ingress whose apply timed out waiting for sync
    deferred: HashMap<ObjectKey, Arc<Ingress>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct PassReport {
    /// At least one route was added to or removed from the table
    mutated: bool,
    /// Rules skipped because they could not be resolved
    failed: usize,
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    Apply,
    Remove,
}

/// Ingress reconciler
pub struct IngressReconciler {
    config: ControllerConfig,
    table: Arc<RouteTable>,
    services: Mirror<Service>,
    endpoints: Mirror<Endpoints>,
    pusher: Arc<dyn ConfigPusher>,
    ledger: Mutex<Ledger>,
    shutdown: watch::Receiver<bool>,
}

impl IngressReconciler {
    pub fn new(
        config: ControllerConfig,
        table: Arc<RouteTable>,
        services: Mirror<Service>,
        endpoints: Mirror<Endpoints>,
        pusher: Arc<dyn ConfigPusher>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            table,
            services,
            endpoints,
            pusher,
            ledger: Mutex::new(Ledger::default()),
            shutdown,
        }
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Push the empty baseline server; call once before handling events
    pub async fn start(&self) -> Result<(), ReconcileError> {
        let _pass = self.ledger.lock().await;
        info!(
            server = %self.table.name(),
            admin = %self.config.admin_url,
            "Pushing initial proxy config"
        );
        self.pusher
            .push_initial_config(&self.table.initial_config())
            .await?;
        Ok(())
    }

    /// Dispatch one event by kind
    pub async fn handle(&self, event: ResourceEvent) -> Result<(), ReconcileError> {
        match event {
            ResourceEvent::Added(Resource::Ingress(ingress)) => self.on_add(ingress).await,
            ResourceEvent::Updated {
                old: Resource::Ingress(old),
                new: Resource::Ingress(new),
            } => self.on_update(old, new).await,
            ResourceEvent::Deleted(Resource::Ingress(ingress)) => self.on_delete(ingress).await,
            other => {
                let resource = other.resource();
                debug!(
                    kind = resource.kind(),
                    key = %resource.key(),
                    action = other.action(),
                    "Resource changed"
                );
                Ok(())
            }
        }
    }

    pub async fn on_add(&self, ingress: Arc<Ingress>) -> Result<(), ReconcileError> {
        if !self.is_owned(&ingress) {
            debug!(
                namespace = ?ingress.namespace(),
                name = %ingress.name_any(),
                "Ingress belongs to another class, ignoring"
            );
            return Ok(());
        }
        self.reconcile(&ingress, Pass::Apply).await
    }

    pub async fn on_update(&self, old: Arc<Ingress>, new: Arc<Ingress>) -> Result<(), ReconcileError> {
        if self.is_owned(&new) {
            return self.reconcile(&new, Pass::Apply).await;
        }

        if self.is_owned(&old) {
            info!(
                namespace = ?new.namespace(),
                name = %new.name_any(),
                "Ingress no longer matches class, removing its routes"
            );
            return self.reconcile(&old, Pass::Remove).await;
        }

        Ok(())
    }

    pub async fn on_delete(&self, ingress: Arc<Ingress>) -> Result<(), ReconcileError> {
        if !self.is_owned(&ingress) {
            return Ok(());
        }
        self.reconcile(&ingress, Pass::Remove).await
    }

    /// Does this controller own `ingress`?
    ///
    /// The class annotation wins when present; otherwise `spec.ingressClassName`
    /// decides.
    pub fn is_owned(&self, ingress: &Ingress) -> bool {
        let class = self.config.ingress_class.as_str();
        match ingress.annotations().get(INGRESS_CLASS_ANNOTATION) {
            Some(value) => value == class,
            None => ingress
                .spec
                .as_ref()
                .and_then(|spec| spec.ingress_class_name.as_deref())
                .is_some_and(|name| name == class),
        }
    }

    /// Routes currently recorded for the Ingress `key`
    pub async fn applied_routes(&self, key: &ObjectKey) -> Vec<Route> {
        self.ledger
            .lock()
            .await
            .applied
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Both backend mirrors finished their initial listing
    pub fn is_synced(&self) -> bool {
        self.services.is_synced() && self.endpoints.is_synced()
    }

    /// Re-run the Ingresses parked by a sync timeout
    ///
    /// No-op until both mirrors are synced. Returns how many were replayed; every
    /// parked Ingress is attempted even when an earlier one fails, and the first
    /// failure is returned.
    pub async fn replay_deferred(&self) -> Result<usize, ReconcileError> {
        if !self.is_synced() {
            return Ok(0);
        }

        let mut ledger = self.ledger.lock().await;
        if ledger.deferred.is_empty() {
            return Ok(0);
        }
        let pending: Vec<Arc<Ingress>> = ledger.deferred.drain().map(|(_, ing)| ing).collect();
        info!(count = pending.len(), "Mirrors synced, replaying deferred ingresses");

        let mut first_error = None;
        for ingress in &pending {
            if let Err(e) = self.run_pass(&mut ledger, ingress, Pass::Apply).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(pending.len()),
        }
    }

    /// Block until both mirrors finished their initial listing
    ///
    /// Polls at `sync.poll_interval_ms`. Gives up on shutdown, or after
    /// `sync.timeout_secs` when one is configured.
    pub async fn wait_for_sync(&self) -> Result<(), ReconcileError> {
        let started = Instant::now();
        let poll_interval = self.config.sync.poll_interval();
        let timeout = self.config.sync.timeout();
        let mut shutdown = self.shutdown.clone();
        let mut shutdown_open = true;
        let mut logged = false;

        loop {
            if self.is_synced() {
                return Ok(());
            }
            if *shutdown.borrow() {
                return Err(ReconcileError::Cancelled);
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(ReconcileError::SyncTimeout(limit));
                }
            }
            if !logged {
                debug!(
                    services = self.services.is_synced(),
                    endpoints = self.endpoints.is_synced(),
                    "Waiting for mirrors to sync"
                );
                logged = true;
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed(), if shutdown_open => {
                    if changed.is_err() {
                        shutdown_open = false;
                    }
                }
            }
        }
    }

    async fn reconcile(&self, ingress: &Arc<Ingress>, pass: Pass) -> Result<(), ReconcileError> {
        let mut ledger = self.ledger.lock().await;
        self.run_pass(&mut ledger, ingress, pass).await
    }

    async fn run_pass(
        &self,
        ledger: &mut Ledger,
        ingress: &Arc<Ingress>,
        pass: Pass,
    ) -> Result<(), ReconcileError> {
        let start = Instant::now();
        let key = ObjectKey::of(&**ingress);

        let result = match pass {
            Pass::Apply => self.apply(&mut ledger.applied, &key, ingress).await,
            Pass::Remove => self.remove(&mut ledger.applied, &key, ingress).await,
        };

        // Only the newest version of an Ingress is ever parked
        match (&result, pass) {
            (Err(ReconcileError::SyncTimeout(limit)), Pass::Apply) => {
                warn!(
                    namespace = %key.namespace,
                    name = %key.name,
                    waited = ?limit,
                    "Mirrors not synced, deferring ingress until they are"
                );
                ledger.deferred.insert(key.clone(), ingress.clone());
            }
            _ => {
                ledger.deferred.remove(&key);
            }
        }

        let label = match &result {
            Ok(report) if report.failed == 0 => "success",
            Ok(_) => "partial",
            Err(e) => e.label(),
        };
        record_ingress_reconciliation(
            &key.name,
            &key.namespace,
            start.elapsed().as_secs_f64(),
            label,
        );

        result.map(|_| ())
    }

    async fn apply(
        &self,
        applied: &mut AppliedRoutes,
        key: &ObjectKey,
        ingress: &Ingress,
    ) -> Result<PassReport, ReconcileError> {
        let rules = ingress_rules(ingress);
        if !rules.is_empty() {
            self.wait_for_sync().await?;
        }

        let mut report = PassReport::default();
        let mut produced: Vec<Route> = Vec::with_capacity(rules.len());

        for rule in &rules {
            match self.resolve(&key.namespace, rule) {
                Ok(route) => {
                    if self.table.add_route(route.clone()) == AddOutcome::Added {
                        report.mutated = true;
                    }
                    if !produced.contains(&route) {
                        produced.push(route);
                    }
                }
                Err(e) => {
                    warn!(
                        namespace = %key.namespace,
                        name = %key.name,
                        host = ?rule.host,
                        service = %rule.service_name,
                        error = %e,
                        "Skipping ingress rule"
                    );
                    report.failed += 1;
                }
            }
        }

        let previous = applied.remove(key).unwrap_or_default();
        let owned = if report.failed == 0 {
            for stale in previous.iter().filter(|r| !produced.contains(r)) {
                if self.release(applied, stale) {
                    report.mutated = true;
                }
            }
            produced
        } else {
            // Partial pass: keep what the previous version added
            let mut owned = previous;
            for route in produced {
                if !owned.contains(&route) {
                    owned.push(route);
                }
            }
            owned
        };
        if !owned.is_empty() {
            applied.insert(key.clone(), owned);
        }

        info!(
            namespace = %key.namespace,
            name = %key.name,
            rules = rules.len(),
            failed = report.failed,
            "Reconciled ingress"
        );

        if report.mutated {
            self.pusher.push_server(&self.table).await?;
        }
        Ok(report)
    }

    async fn remove(
        &self,
        applied: &mut AppliedRoutes,
        key: &ObjectKey,
        ingress: &Ingress,
    ) -> Result<PassReport, ReconcileError> {
        let routes = match applied.remove(key) {
            Some(routes) => routes,
            None => {
                debug!(
                    namespace = %key.namespace,
                    name = %key.name,
                    "No applied routes recorded, re-resolving rules"
                );
                self.reconstruct(key, ingress)
            }
        };

        let mut report = PassReport::default();
        for route in &routes {
            if self.release(applied, route) {
                report.mutated = true;
            }
        }

        info!(
            namespace = %key.namespace,
            name = %key.name,
            routes = routes.len(),
            "Removed ingress"
        );

        if report.mutated {
            self.pusher.push_server(&self.table).await?;
        }
        Ok(report)
    }

    /// Best-effort rebuild of the routes an Ingress would produce right now
    ///
    /// Used only for an Ingress with no ledger entry, i.e. one that never added a
    /// route. Every route in the table is held by some ledger entry, so a rebuilt
    /// route is either kept for its owner or reported not found. Never waits for
    /// sync; an unsynced mirror just misses.
    fn reconstruct(&self, key: &ObjectKey, ingress: &Ingress) -> Vec<Route> {
        let rules = ingress_rules(ingress);
        let mut routes = Vec::with_capacity(rules.len());
        for rule in &rules {
            match self.resolve(&key.namespace, rule) {
                Ok(route) if !routes.contains(&route) => routes.push(route),
                Ok(_) => {}
                Err(e) => debug!(
                    namespace = %key.namespace,
                    name = %key.name,
                    error = %e,
                    "Cannot rebuild route for deletion"
                ),
            }
        }
        routes
    }

    /// Delete `route` from the table unless another Ingress still owns it
    fn release(&self, applied: &AppliedRoutes, route: &Route) -> bool {
        if let Some(owner) = applied
            .iter()
            .find(|(_, routes)| routes.contains(route))
            .map(|(key, _)| key)
        {
            debug!(route = %route, owner = %owner, "Route still referenced, keeping");
            return false;
        }
        self.table.delete_route(route) == DeleteOutcome::Removed
    }

    fn resolve(&self, namespace: &str, rule: &BackendRule) -> Result<Route, ReconcileError> {
        let key = service_key(namespace, rule);
        let service = self
            .services
            .get(&key)
            .ok_or_else(|| ReconcileError::Lookup {
                kind: "Service",
                key: key.clone(),
            })?;
        let endpoints = self
            .endpoints
            .get(&key)
            .ok_or_else(|| ReconcileError::Lookup {
                kind: "Endpoints",
                key: key.clone(),
            })?;

        Ok(build_route(rule, &service, &endpoints)?)
    }
}
