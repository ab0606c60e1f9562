//! Event orchestration for Deployment and VPAConfig lifecycle events
//!
//! Watches both resource kinds cluster-wide, classifies the raw watch stream
//! into created/updated/deleted events, and drives the cache, resolver and
//! VPA reconciler toward convergence. Handler failures are logged and
//! swallowed here; correction happens on the next triggering event or the
//! periodic re-sync pass.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Api, ListParams, ObjectMeta, PostParams},
    runtime::watcher,
    Client, Resource, ResourceExt,
};
use tracing::{debug, info, instrument, warn};

use super::cache::ConfigCache;
use super::resolver::should_manage;
use super::vpa;
use crate::crd::VPAConfig;
use crate::error::{is_not_found, Error, Result};

/// Shared state for the operator
pub struct ControllerState {
    pub client: Client,
    pub cache: ConfigCache,
    pub resync_interval: Duration,
}

/// Main entry point: loads the initial cache, then runs the watch loops and
/// the periodic re-sync until one of them terminates.
pub async fn run_operator(state: Arc<ControllerState>) -> Result<()> {
    info!("Starting autovpa controller");

    let configs: Api<VPAConfig> = Api::all(state.client.clone());
    match configs.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("VPAConfig CRD is available"),
        Err(e) if is_not_found(&e) => {
            warn!("VPAConfig CRD not installed; no namespace is managed until it appears")
        }
        Err(e) => warn!(
            "Could not verify VPAConfig CRD, continuing with periodic retries: {:?}",
            e
        ),
    }

    state.cache.refresh(&state.client).await;

    tokio::select! {
        _ = watch_configs(state.clone()) => {}
        _ = watch_deployments(state.clone()) => {}
        _ = run_resync(state.clone()) => {}
    }

    Ok(())
}

fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Watches Deployments cluster-wide.
///
/// The watch substrate only reports apply/delete, so a key set distinguishes
/// first-seen applies (dispatched as created, including initial-sync
/// replays) from re-seen applies (dispatched as updated).
async fn watch_deployments(state: Arc<ControllerState>) {
    let api: Api<Deployment> = Api::all(state.client.clone());
    let mut known: HashSet<String> = HashSet::new();
    let mut stream = watcher(api, watcher::Config::default()).boxed();

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::InitApply(dep)) => {
                known.insert(deployment_key(&dep));
                handle_deployment_created(&state, &dep).await;
            }
            Ok(watcher::Event::Apply(dep)) => {
                if known.insert(deployment_key(&dep)) {
                    handle_deployment_created(&state, &dep).await;
                } else {
                    handle_deployment_updated(&state, &dep).await;
                }
            }
            Ok(watcher::Event::Delete(dep)) => {
                known.remove(&deployment_key(&dep));
                handle_deployment_deleted(&state, &dep).await;
            }
            Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => {}
            Err(e) => warn!("Deployment watch error: {:?}", e),
        }
    }
}

fn deployment_key(dep: &Deployment) -> String {
    object_key(&dep.namespace().unwrap_or_default(), &dep.name_any())
}

/// Watches VPAConfig resources cluster-wide. Created and updated configs
/// take the same path: rebuild the cache and re-reconcile the namespace.
async fn watch_configs(state: Arc<ControllerState>) {
    let api: Api<VPAConfig> = Api::all(state.client.clone());
    let mut stream = watcher(api, watcher::Config::default()).boxed();

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::InitApply(config)) | Ok(watcher::Event::Apply(config)) => {
                handle_config_applied(&state, &config).await;
            }
            Ok(watcher::Event::Delete(config)) => {
                handle_config_deleted(&state, &config).await;
            }
            Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => {}
            Err(e) => warn!("VPAConfig watch error: {:?}", e),
        }
    }
}

/// Periodic full re-sync: refreshes the cache and re-converges every
/// configured namespace, so logged-and-abandoned operations are corrected
/// within one interval instead of waiting for an unrelated event.
async fn run_resync(state: Arc<ControllerState>) {
    let mut ticker = tokio::time::interval(state.resync_interval);
    ticker.tick().await; // first tick completes immediately
    loop {
        ticker.tick().await;
        state.cache.refresh(&state.client).await;

        let snapshot = state.cache.snapshot().await;
        debug!("Periodic re-sync over {} namespaces", snapshot.len());
        for (namespace, config) in snapshot.iter() {
            if let Err(e) = vpa::sync_policy(&state.client, namespace, config).await {
                warn!("Re-sync policy pass failed for namespace {}: {:?}", namespace, e);
            }
            if let Err(e) = reconcile_namespace(&state, namespace).await {
                warn!("Re-sync failed for namespace {}: {:?}", namespace, e);
            }
        }
    }
}

/// Deployment created: create a VPA when eligible. An ineligible Deployment
/// is left alone; only the update/delete/config paths prune stale VPAs.
#[instrument(skip(state, dep), fields(name = %dep.name_any(), namespace = dep.namespace()))]
pub async fn handle_deployment_created(state: &ControllerState, dep: &Deployment) {
    let namespace = dep.namespace().unwrap_or_else(|| "default".to_string());
    let name = dep.name_any();

    match state.cache.get(&namespace).await {
        Some(config) if should_manage(Some(&config), &name, dep.annotations()) => {
            match vpa::ensure_created(&state.client, &namespace, &name, &config).await {
                Ok(true) => {
                    emit_event(
                        state,
                        dep,
                        "Normal",
                        "Created",
                        &format!("VPA created for Deployment {name}"),
                    )
                    .await;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "Failed to create VPA for Deployment {}/{}: {:?}",
                        namespace, name, e
                    );
                    emit_event(
                        state,
                        dep,
                        "Warning",
                        "CreateFailed",
                        &format!("Failed to create VPA for Deployment {name}: {e}"),
                    )
                    .await;
                }
            }
        }
        _ => debug!(
            "Deployment {}/{} not eligible for a VPA, ignoring create",
            namespace, name
        ),
    }
}

/// Deployment updated: re-evaluate eligibility and converge in either
/// direction. Namespaces without a config are ignored entirely.
#[instrument(skip(state, dep), fields(name = %dep.name_any(), namespace = dep.namespace()))]
pub async fn handle_deployment_updated(state: &ControllerState, dep: &Deployment) {
    let namespace = dep.namespace().unwrap_or_else(|| "default".to_string());
    let name = dep.name_any();

    let Some(config) = state.cache.get(&namespace).await else {
        debug!(
            "Namespace {} has no VPAConfig, ignoring update of {}",
            namespace, name
        );
        return;
    };

    if should_manage(Some(&config), &name, dep.annotations()) {
        match vpa::ensure_created(&state.client, &namespace, &name, &config).await {
            Ok(true) => {
                emit_event(
                    state,
                    dep,
                    "Normal",
                    "Created",
                    &format!("VPA created for Deployment {name}"),
                )
                .await;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    "Failed to create VPA for Deployment {}/{}: {:?}",
                    namespace, name, e
                );
                emit_event(
                    state,
                    dep,
                    "Warning",
                    "CreateFailed",
                    &format!("Failed to create VPA for Deployment {name}: {e}"),
                )
                .await;
            }
        }
    } else {
        match vpa::ensure_deleted(&state.client, &namespace, &name).await {
            Ok(true) => {
                emit_event(
                    state,
                    dep,
                    "Normal",
                    "Deleted",
                    &format!("VPA deleted for Deployment {name}"),
                )
                .await;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    "Failed to delete VPA for Deployment {}/{}: {:?}",
                    namespace, name, e
                );
                emit_event(
                    state,
                    dep,
                    "Warning",
                    "DeleteFailed",
                    &format!("Failed to delete VPA for Deployment {name}: {e}"),
                )
                .await;
            }
        }
    }
}

/// Deployment deleted: remove the VPA if the Deployment was eligible at
/// delete time.
#[instrument(skip(state, dep), fields(name = %dep.name_any(), namespace = dep.namespace()))]
pub async fn handle_deployment_deleted(state: &ControllerState, dep: &Deployment) {
    let namespace = dep.namespace().unwrap_or_else(|| "default".to_string());
    let name = dep.name_any();

    let config = state.cache.get(&namespace).await;
    if !should_manage(config.as_ref(), &name, dep.annotations()) {
        debug!(
            "Deployment {}/{} was not eligible for a VPA, ignoring delete",
            namespace, name
        );
        return;
    }

    match vpa::ensure_deleted(&state.client, &namespace, &name).await {
        Ok(true) => {
            emit_event(
                state,
                dep,
                "Normal",
                "Deleted",
                &format!("VPA deleted for Deployment {name}"),
            )
            .await;
        }
        Ok(false) => {}
        Err(e) => {
            warn!(
                "Failed to delete VPA for Deployment {}/{}: {:?}",
                namespace, name, e
            );
            emit_event(
                state,
                dep,
                "Warning",
                "DeleteFailed",
                &format!("Failed to delete VPA for Deployment {name}: {e}"),
            )
            .await;
        }
    }
}

/// VPAConfig created or updated: rebuild the cache, bulk-sync policy when
/// the namespace's resolved config changed, then re-reconcile every
/// Deployment in the namespace in both directions.
#[instrument(skip(state, config), fields(namespace = config.namespace()))]
pub async fn handle_config_applied(state: &ControllerState, config: &VPAConfig) {
    let Some(namespace) = config.namespace() else {
        return;
    };

    let previous = state.cache.get(&namespace).await;
    state.cache.refresh(&state.client).await;
    let current = state.cache.get(&namespace).await;

    if current != previous {
        info!("Namespace {} policy changed, syncing existing VPAs", namespace);
        if let Some(config) = &current {
            if let Err(e) = vpa::sync_policy(&state.client, &namespace, config).await {
                warn!("Policy sync failed for namespace {}: {:?}", namespace, e);
            }
        }
    }

    if let Err(e) = reconcile_namespace(state, &namespace).await {
        warn!("Namespace reconciliation failed for {}: {:?}", namespace, e);
    }
}

/// VPAConfig deleted: delete the VPA of every Deployment that was eligible
/// under the outgoing config, then drop the namespace from the cache.
#[instrument(skip(state, config), fields(namespace = config.namespace()))]
pub async fn handle_config_deleted(state: &ControllerState, config: &VPAConfig) {
    let Some(namespace) = config.namespace() else {
        return;
    };

    // Eligibility is decided against the pre-refresh snapshot; the namespace
    // entry disappears once the cache is rebuilt below.
    let outgoing = state.cache.get(&namespace).await;

    let api: Api<Deployment> = Api::namespaced(state.client.clone(), &namespace);
    match api.list(&ListParams::default()).await {
        Ok(deployments) => {
            for dep in &deployments.items {
                let name = dep.name_any();
                if !should_manage(outgoing.as_ref(), &name, dep.annotations()) {
                    continue;
                }
                if let Err(e) = vpa::ensure_deleted(&state.client, &namespace, &name).await {
                    warn!(
                        "Failed to delete VPA for Deployment {}/{}: {:?}",
                        namespace, name, e
                    );
                }
            }
        }
        Err(e) => warn!(
            "Failed to list Deployments in namespace {}: {:?}",
            namespace, e
        ),
    }

    state.cache.refresh(&state.client).await;
}

/// Recomputes eligibility for every Deployment in `namespace` and converges
/// each one: create the VPA when eligible, delete it when not.
pub async fn reconcile_namespace(state: &ControllerState, namespace: &str) -> Result<()> {
    let config = state.cache.get(namespace).await;

    let api: Api<Deployment> = Api::namespaced(state.client.clone(), namespace);
    let deployments = api
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;

    for dep in &deployments.items {
        let name = dep.name_any();
        match &config {
            Some(config) if should_manage(Some(config), &name, dep.annotations()) => {
                if let Err(e) = vpa::ensure_created(&state.client, namespace, &name, config).await
                {
                    warn!(
                        "Failed to converge VPA for Deployment {}/{}: {:?}",
                        namespace, name, e
                    );
                }
            }
            _ => {
                if let Err(e) = vpa::ensure_deleted(&state.client, namespace, &name).await {
                    warn!(
                        "Failed to converge VPA for Deployment {}/{}: {:?}",
                        namespace, name, e
                    );
                }
            }
        }
    }

    Ok(())
}

/// Posts a Kubernetes Event on a Deployment. Best-effort: a failed post is
/// logged and must not fail the surrounding reconcile.
async fn emit_event(
    state: &ControllerState,
    dep: &Deployment,
    event_type: &str,
    reason: &str,
    message: &str,
) {
    let namespace = dep.namespace().unwrap_or_else(|| "default".to_string());
    let events: Api<Event> = Api::namespaced(state.client.clone(), &namespace);

    let time = chrono::Utc::now();
    let event = Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-vpa-", dep.name_any())),
            ..Default::default()
        },
        type_: Some(event_type.to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: dep.object_ref(&()),
        first_timestamp: Some(Time(time)),
        last_timestamp: Some(Time(time)),
        count: Some(1),
        ..Default::default()
    };

    if let Err(e) = events.create(&PostParams::default(), &event).await {
        debug!(
            "Failed to post event for Deployment {}/{}: {:?}",
            namespace,
            dep.name_any(),
            e
        );
    }
}
