//! Watches Services, EndpointSlices, and Pods and feeds their state
//! into a [`kubedns_registry::Registry`].

pub mod aggregate;
pub mod convert;

use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Pod as K8sPod, Service as K8sService};
use k8s_openapi::api::discovery::v1::EndpointSlice as K8sEndpointSlice;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client};
use tokio::sync::{watch, Notify};

use kubedns_registry::Registry;

use aggregate::SliceAggregator;

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Default, serde::Deserialize)]
pub struct Config {
    /// Overrides `$KUBECONFIG` when set; otherwise the in-cluster or
    /// default-kubeconfig client is used.
    pub kubeconfig: Option<String>,
}

impl Config {
    pub async fn build(self) -> Result<Watcher, kube::Error> {
        if let Some(path) = &self.kubeconfig {
            std::env::set_var("KUBECONFIG", path);
        }
        let client = Client::try_default().await?;
        Ok(Watcher::new(client))
    }
}

/// Owns the Kubernetes client and runs the three watch loops until a
/// stop signal fires.
pub struct Watcher {
    client: Client,
}

impl Watcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Runs all three watches against `registry`, completing once each
    /// has achieved its initial sync (or `stop` fires first), then
    /// blocks until `stop` fires and all three loops have terminated —
    /// bounded to [`SHUTDOWN_GRACE`], after which a warning is logged
    /// and `run` returns anyway.
    pub async fn run(&self, registry: Arc<dyn Registry>, stop: watch::Receiver<bool>) {
        let services_synced = Arc::new(Notify::new());
        let endpoints_synced = Arc::new(Notify::new());
        let pods_synced = Arc::new(Notify::new());

        let services = tokio::spawn(watch_services(
            self.client.clone(),
            registry.clone(),
            services_synced.clone(),
            stop.clone(),
        ));
        let endpoints = tokio::spawn(watch_endpoint_slices(
            self.client.clone(),
            registry.clone(),
            endpoints_synced.clone(),
            stop.clone(),
        ));
        let pods = tokio::spawn(watch_pods(
            self.client.clone(),
            registry.clone(),
            pods_synced.clone(),
            stop.clone(),
        ));

        let mut stop_for_sync = stop.clone();
        tokio::select! {
            _ = async {
                services_synced.notified().await;
                endpoints_synced.notified().await;
                pods_synced.notified().await;
            } => {
                tracing::info!("orchestrator watcher initial sync complete");
            }
            _ = wait_for_stop(&mut stop_for_sync) => {
                tracing::warn!("watcher stopped before initial sync completed");
            }
        }

        let shutdown = async {
            let _ = services.await;
            let _ = endpoints.await;
            let _ = pods.await;
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, shutdown).await.is_err() {
            tracing::warn!("watch loops did not terminate within {SHUTDOWN_GRACE:?} of shutdown");
        }
    }
}

async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

async fn watch_services(
    client: Client,
    registry: Arc<dyn Registry>,
    synced: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) {
    let api: Api<K8sService> = Api::all(client);
    let mut backoff = Duration::from_secs(1);
    let mut notified = false;

    loop {
        if *stop.borrow() {
            return;
        }
        let mut stream = watcher::watcher(api.clone(), watcher::Config::default()).boxed();
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
                next = stream.try_next() => {
                    match next {
                        Ok(Some(event)) => {
                            backoff = Duration::from_secs(1);
                            handle_service_event(registry.as_ref(), event, &synced, &mut notified);
                        }
                        Ok(None) => break,
                        Err(err) => {
                            tracing::warn!(error = %err, ?backoff, "service watch failed, reconnecting");
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn handle_service_event(registry: &dyn Registry, event: Event<K8sService>, synced: &Notify, notified: &mut bool) {
    match event {
        Event::Apply(svc) | Event::InitApply(svc) => match convert::to_service(&svc) {
            Some(service) => registry.add_service(service),
            None => tracing::debug!("discarding malformed service payload"),
        },
        Event::Delete(svc) => {
            if let (Some(ns), Some(name)) = (svc.metadata.namespace.as_deref(), svc.metadata.name.as_deref()) {
                registry.delete_service(ns, name);
            }
        }
        Event::Init => {}
        Event::InitDone => {
            if !*notified {
                synced.notify_one();
                *notified = true;
            }
        }
    }
}

async fn watch_pods(
    client: Client,
    registry: Arc<dyn Registry>,
    synced: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) {
    let api: Api<K8sPod> = Api::all(client);
    let mut backoff = Duration::from_secs(1);
    let mut notified = false;

    loop {
        if *stop.borrow() {
            return;
        }
        let mut stream = watcher::watcher(api.clone(), watcher::Config::default()).boxed();
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
                next = stream.try_next() => {
                    match next {
                        Ok(Some(event)) => {
                            backoff = Duration::from_secs(1);
                            handle_pod_event(registry.as_ref(), event, &synced, &mut notified);
                        }
                        Ok(None) => break,
                        Err(err) => {
                            tracing::warn!(error = %err, ?backoff, "pod watch failed, reconnecting");
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn handle_pod_event(registry: &dyn Registry, event: Event<K8sPod>, synced: &Notify, notified: &mut bool) {
    match event {
        Event::Apply(pod) | Event::InitApply(pod) => match convert::to_pod(&pod) {
            Some(p) => registry.add_pod(p),
            None => tracing::debug!("discarding malformed pod payload"),
        },
        Event::Delete(pod) => {
            if let (Some(ns), Some(name)) = (pod.metadata.namespace.as_deref(), pod.metadata.name.as_deref()) {
                registry.delete_pod(ns, name);
            }
        }
        Event::Init => {}
        Event::InitDone => {
            if !*notified {
                synced.notify_one();
                *notified = true;
            }
        }
    }
}

async fn watch_endpoint_slices(
    client: Client,
    registry: Arc<dyn Registry>,
    synced: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) {
    let api: Api<K8sEndpointSlice> = Api::all(client);
    let mut backoff = Duration::from_secs(1);
    let mut notified = false;
    let mut aggregator = SliceAggregator::new();

    loop {
        if *stop.borrow() {
            return;
        }
        let mut stream = watcher::watcher(api.clone(), watcher::Config::default()).boxed();
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
                next = stream.try_next() => {
                    match next {
                        Ok(Some(event)) => {
                            backoff = Duration::from_secs(1);
                            handle_endpoint_slice_event(&mut aggregator, registry.as_ref(), event, &synced, &mut notified);
                        }
                        Ok(None) => break,
                        Err(err) => {
                            tracing::warn!(error = %err, ?backoff, "endpoint slice watch failed, reconnecting");
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn handle_endpoint_slice_event(
    aggregator: &mut SliceAggregator,
    registry: &dyn Registry,
    event: Event<K8sEndpointSlice>,
    synced: &Notify,
    notified: &mut bool,
) {
    match event {
        Event::Apply(slice) | Event::InitApply(slice) => {
            let Some(slice_name) = slice.metadata.name.clone() else {
                return;
            };
            match convert::to_endpoints(&slice) {
                Some((namespace, service, endpoints)) => {
                    aggregator.apply_slice(registry, &namespace, &service, &slice_name, endpoints);
                }
                None => tracing::debug!("discarding endpoint slice with no service-name label"),
            }
        }
        Event::Delete(slice) => {
            let Some(slice_name) = slice.metadata.name.clone() else {
                return;
            };
            if let Some((namespace, service, _)) = convert::to_endpoints(&slice) {
                aggregator.remove_slice(registry, &namespace, &service, &slice_name);
            }
        }
        Event::Init => {}
        Event::InitDone => {
            if !*notified {
                synced.notify_one();
                *notified = true;
            }
        }
    }
}
