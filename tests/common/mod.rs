//! Shared helpers for integration tests.
//!
//! The wiremock server stands in for the Kubernetes API server; these
//! helpers build the request paths and the list/object/Status JSON bodies
//! the client expects back.

#![allow(dead_code)]

use std::time::Duration;

use autovpa::controller::{ConfigCache, ControllerState};
use autovpa::crd::{VPAConfig, VPAConfigSpec};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::ObjectMeta;
use serde_json::{json, Value};
use wiremock::MockServer;

pub const CONFIGS_PATH: &str = "/apis/autovpa.autoscaling.k8s.io/v1/vpaconfigs";

pub fn vpas_path(namespace: &str) -> String {
    format!("/apis/autoscaling.k8s.io/v1/namespaces/{namespace}/verticalpodautoscalers")
}

pub fn vpa_path(namespace: &str, name: &str) -> String {
    format!("{}/{}", vpas_path(namespace), name)
}

pub fn deployments_path(namespace: &str) -> String {
    format!("/apis/apps/v1/namespaces/{namespace}/deployments")
}

pub fn events_path(namespace: &str) -> String {
    format!("/api/v1/namespaces/{namespace}/events")
}

/// Client pointed at the mock API server.
pub async fn mock_client(server: &MockServer) -> kube::Client {
    let config = kube::Config::new(server.uri().parse().unwrap());
    kube::Client::try_from(config).expect("client for mock server")
}

pub async fn controller_state(server: &MockServer) -> ControllerState {
    ControllerState {
        client: mock_client(server).await,
        cache: ConfigCache::new(),
        resync_interval: Duration::from_secs(300),
    }
}

/// Kubernetes error Status body; the code must match the HTTP status for the
/// client to classify the failure.
pub fn status_failure(code: u16, reason: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": reason,
        "reason": reason,
        "code": code,
    })
}

pub fn status_success() -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Success",
        "code": 200,
    })
}

pub fn list_json(api_version: &str, kind: &str, items: Vec<Value>, continue_token: Option<&str>) -> Value {
    json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": {"resourceVersion": "1", "continue": continue_token},
        "items": items,
    })
}

pub fn config_list_json(items: Vec<Value>) -> Value {
    list_json("autovpa.autoscaling.k8s.io/v1", "VPAConfigList", items, None)
}

pub fn vpa_list_json(items: Vec<Value>) -> Value {
    list_json("autoscaling.k8s.io/v1", "VerticalPodAutoscalerList", items, None)
}

pub fn deployment_list_json(items: Vec<Value>) -> Value {
    list_json("apps/v1", "DeploymentList", items, None)
}

/// VPAConfig resource body. `mode: None` leaves `updatePolicy` unset so the
/// operator falls back to `Off`.
pub fn config_json(namespace: &str, excluded: &[&str], mode: Option<&str>) -> Value {
    let mut spec = json!({"excludedDeployments": excluded});
    if let Some(mode) = mode {
        spec["updatePolicy"] = json!({"updateMode": mode});
    }
    json!({
        "apiVersion": "autovpa.autoscaling.k8s.io/v1",
        "kind": "VPAConfig",
        "metadata": {"name": "autoscaling", "namespace": namespace},
        "spec": spec,
    })
}

/// VerticalPodAutoscaler resource body with the given ownership annotation.
pub fn vpa_json(namespace: &str, name: &str, owner: &str) -> Value {
    json!({
        "apiVersion": "autoscaling.k8s.io/v1",
        "kind": "VerticalPodAutoscaler",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "annotations": {"autovpa.autoscaling.k8s.io/deployment": owner},
        },
        "spec": {
            "targetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": name},
            "updatePolicy": {"updateMode": "Off"},
        },
    })
}

pub fn deployment_json(namespace: &str, name: &str, annotations: Value) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "annotations": annotations,
            "uid": format!("uid-{name}"),
        },
        "spec": {
            "selector": {"matchLabels": {"app": name}},
            "template": {
                "metadata": {"labels": {"app": name}},
                "spec": {"containers": []},
            },
        },
    })
}

pub fn event_json(namespace: &str) -> Value {
    json!({
        "metadata": {"name": "evt", "namespace": namespace},
        "involvedObject": {},
    })
}

/// Typed Deployment for driving handlers directly.
pub fn deployment(namespace: &str, name: &str, annotations: &[(&str, &str)]) -> Deployment {
    let annotations = if annotations.is_empty() {
        None
    } else {
        Some(
            annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    };
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Typed VPAConfig for driving the config handlers directly.
pub fn vpaconfig(namespace: &str) -> VPAConfig {
    let mut config = VPAConfig::new("autoscaling", VPAConfigSpec::default());
    config.metadata.namespace = Some(namespace.to_string());
    config
}
