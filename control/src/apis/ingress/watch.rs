//! Watch glue
//!
//! One kube-rs watcher per kind (Ingress, Service, Endpoints, all namespaces).
//! Each event first updates the kind's mirror, then reaches the reconciler as
//! an Added/Updated/Deleted [`ResourceEvent`]. A relist that drops objects
//! reports them as deleted once the new listing is complete.

use crate::apis::ingress::ingress::{IngressReconciler, Resource, ResourceEvent};
use crate::apis::mirror::{MirrorWriter, ObjectKey};
use crate::error::ReconcileError;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::WatchStreamExt;
use kube::{api::Api, Client, Resource as KubeResource};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Mirror writers for the three watched kinds
pub struct Writers {
    pub ingresses: MirrorWriter<Ingress>,
    pub services: MirrorWriter<Service>,
    pub endpoints: MirrorWriter<Endpoints>,
}

/// Start the three watch loops
pub fn spawn_watchers(
    client: Client,
    writers: Writers,
    reconciler: Arc<IngressReconciler>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let Writers {
        ingresses,
        services,
        endpoints,
    } = writers;

    vec![
        tokio::spawn(run_watch(
            Api::<Service>::all(client.clone()),
            services,
            Resource::Service,
            reconciler.clone(),
            shutdown.clone(),
        )),
        tokio::spawn(run_watch(
            Api::<Endpoints>::all(client.clone()),
            endpoints,
            Resource::Endpoints,
            reconciler.clone(),
            shutdown.clone(),
        )),
        tokio::spawn(run_watch(
            Api::<Ingress>::all(client),
            ingresses,
            Resource::Ingress,
            reconciler,
            shutdown,
        )),
    ]
}

/// Feed one kind's watch stream into its mirror and the reconciler
///
/// Returns when shutdown is signalled or the stream ends. An event that is
/// already being handled always runs to completion.
pub async fn run_watch<K>(
    api: Api<K>,
    mut writer: MirrorWriter<K>,
    wrap: fn(Arc<K>) -> Resource,
    reconciler: Arc<IngressReconciler>,
    mut shutdown: watch::Receiver<bool>,
) where
    K: KubeResource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let kind = K::kind(&());
    let stream = watcher(api, WatcherConfig::default()).default_backoff();
    futures::pin_mut!(stream);

    info!("Starting {} watcher", kind);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = tokio::select! {
            next = stream.next() => next,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        let Some(event) = next else {
            warn!("{} watch stream ended", kind);
            break;
        };

        match event {
            Ok(event) => {
                for e in process_event(&mut writer, event, wrap, &reconciler).await {
                    if e.logged_at_source() {
                        debug!(kind = %kind, error = %e, "Event left unfinished");
                    } else {
                        warn!(kind = %kind, error = %e, "Failed to handle event");
                    }
                }
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "Watch error, retrying with backoff");
            }
        }
    }

    info!("{} watcher stopped", kind);
}

/// Mirror one watch event and run every pass it implies
///
/// After the derived events, Ingresses parked by a sync timeout are replayed if
/// this event completed the backend sync. Returns the failures of all passes.
pub async fn process_event<K>(
    writer: &mut MirrorWriter<K>,
    event: watcher::Event<K>,
    wrap: fn(Arc<K>) -> Resource,
    reconciler: &IngressReconciler,
) -> Vec<ReconcileError>
where
    K: KubeResource<DynamicType = ()> + Clone + 'static,
{
    let mut errors = Vec::new();
    for event in mirror_event(writer, event, wrap) {
        if let Err(e) = reconciler.handle(event).await {
            errors.push(e);
        }
    }
    if let Err(e) = reconciler.replay_deferred().await {
        errors.push(e);
    }
    errors
}

/// Apply `event` to the mirror and derive the reconciler events it implies
pub fn mirror_event<K>(
    writer: &mut MirrorWriter<K>,
    event: watcher::Event<K>,
    wrap: fn(Arc<K>) -> Resource,
) -> Vec<ResourceEvent>
where
    K: KubeResource<DynamicType = ()> + Clone + 'static,
{
    match event {
        watcher::Event::Init => {
            writer.apply(&event);
            Vec::new()
        }
        watcher::Event::InitApply(ref obj) | watcher::Event::Apply(ref obj) => {
            let previous = writer.previous(obj);
            writer.apply(&event);
            let new = wrap(Arc::new(obj.clone()));
            let change = match previous {
                Some(old) => ResourceEvent::Updated {
                    old: wrap(old),
                    new,
                },
                None => ResourceEvent::Added(new),
            };
            vec![change]
        }
        watcher::Event::Delete(ref obj) => {
            writer.apply(&event);
            vec![ResourceEvent::Deleted(wrap(Arc::new(obj.clone())))]
        }
        watcher::Event::InitDone => {
            let before = writer.state();
            writer.apply(&event);

            let present: HashSet<ObjectKey> = writer
                .state()
                .iter()
                .map(|obj| ObjectKey::of(&**obj))
                .collect();
            let vanished: Vec<ResourceEvent> = before
                .into_iter()
                .filter(|obj| !present.contains(&ObjectKey::of(&**obj)))
                .map(|obj| ResourceEvent::Deleted(wrap(obj)))
                .collect();

            debug!(
                kind = %K::kind(&()),
                objects = present.len(),
                vanished = vanished.len(),
                "Initial listing complete"
            );
            vanished
        }
    }
}
