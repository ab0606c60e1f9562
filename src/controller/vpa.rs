//! VerticalPodAutoscaler resource generation and lifecycle management.
//!
//! The VPA CRD lives in API group `autoscaling.k8s.io/v1`. Because
//! `k8s-openapi` does not ship VPA types we model the resource with plain
//! `serde_json::Value` and use `kube`'s dynamic/unstructured client helpers
//! (`DynamicObject` + `ApiResource`).
//!
//! Every managed VPA carries an ownership annotation recording the
//! Deployment it was created for. A same-named VPA whose annotation does not
//! match is foreign and is never deleted by this operator.

use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
        PatchParams, PostParams},
    core::ObjectMeta,
    Client, ResourceExt,
};
use serde_json::json;
use tracing::{debug, info};

use super::cache::NamespaceConfig;
use crate::error::{is_already_exists, is_not_found, Error, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const VPA_GROUP: &str = "autoscaling.k8s.io";
const VPA_VERSION: &str = "v1";
const VPA_KIND: &str = "VerticalPodAutoscaler";
const FIELD_MANAGER: &str = "autovpa-operator";

/// Ownership marker recording the Deployment a managed VPA was created for.
pub const OWNER_ANNOTATION: &str = "autovpa.autoscaling.k8s.io/deployment";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Returns the `ApiResource` descriptor used to build the dynamic VPA API.
pub fn vpa_api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind {
        group: VPA_GROUP.to_string(),
        version: VPA_VERSION.to_string(),
        kind: VPA_KIND.to_string(),
    })
}

fn vpa_api(client: &Client, namespace: &str) -> Api<DynamicObject> {
    Api::namespaced_with(client.clone(), namespace, &vpa_api_resource())
}

/// Returns the Deployment name recorded in the VPA's ownership annotation,
/// if any.
pub fn owner_of(vpa: &DynamicObject) -> Option<&str> {
    vpa.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(OWNER_ANNOTATION))
        .map(String::as_str)
}

// ---------------------------------------------------------------------------
// Resource builder
// ---------------------------------------------------------------------------

/// Builds the VPA object for a Deployment, with policy copied from the
/// namespace config and the ownership annotation set.
pub fn build_vpa(namespace: &str, name: &str, config: &NamespaceConfig) -> DynamicObject {
    let mut spec = json!({
        "targetRef": {
            "apiVersion": "apps/v1",
            "kind":       "Deployment",
            "name":       name,
        },
        "updatePolicy": config.update_policy,
    });
    if let Some(policy) = &config.resource_policy {
        spec["resourcePolicy"] = policy.clone();
    }

    let mut obj = DynamicObject::new(name, &vpa_api_resource());
    obj.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(
            [(
                "app.kubernetes.io/managed-by".to_string(),
                FIELD_MANAGER.to_string(),
            )]
            .into_iter()
            .collect(),
        ),
        annotations: Some(
            [(OWNER_ANNOTATION.to_string(), name.to_string())]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    };
    obj.data = json!({ "spec": spec });
    obj
}

// ---------------------------------------------------------------------------
// Reconcile operations
// ---------------------------------------------------------------------------

/// Creates the VPA for a Deployment. An already existing VPA is success.
///
/// Returns `true` when a new VPA was actually created.
pub async fn ensure_created(
    client: &Client,
    namespace: &str,
    name: &str,
    config: &NamespaceConfig,
) -> Result<bool> {
    let api = vpa_api(client, namespace);
    let vpa = build_vpa(namespace, name, config);

    match api.create(&PostParams::default(), &vpa).await {
        Ok(_) => {
            info!(
                "VPA created for Deployment {}/{} (mode={})",
                namespace, name, config.update_policy.update_mode
            );
            Ok(true)
        }
        Err(e) if is_already_exists(&e) => {
            debug!("VPA {}/{} already exists, nothing to create", namespace, name);
            Ok(false)
        }
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Deletes the VPA for a Deployment if this operator owns it.
///
/// An absent VPA is success. A VPA whose ownership annotation names a
/// different Deployment is foreign and is left untouched, also success.
///
/// Returns `true` when an owned VPA was actually deleted.
pub async fn ensure_deleted(client: &Client, namespace: &str, name: &str) -> Result<bool> {
    let api = vpa_api(client, namespace);

    let vpa = match api.get(name).await {
        Ok(vpa) => vpa,
        Err(e) if is_not_found(&e) => {
            debug!("VPA {}/{} already absent, nothing to delete", namespace, name);
            return Ok(false);
        }
        Err(e) => return Err(Error::KubeError(e)),
    };

    match owner_of(&vpa) {
        Some(owner) if owner == name => {}
        owner => {
            info!(
                "VPA {}/{} has foreign ownership annotation {:?}, leaving it in place",
                namespace, name, owner
            );
            return Ok(false);
        }
    }

    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!("VPA deleted for Deployment {}/{}", namespace, name);
            Ok(true)
        }
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Overwrites the update and resource policy of every VPA in `namespace`
/// with the values from `config`.
///
/// The pass stops at the first patch failure; VPAs not yet reached stay on
/// their previous policy until the next triggering event.
pub async fn sync_policy(client: &Client, namespace: &str, config: &NamespaceConfig) -> Result<()> {
    let api = vpa_api(client, namespace);
    let vpas = api
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;

    let patch = json!({
        "spec": {
            "updatePolicy":   config.update_policy,
            "resourcePolicy": config.resource_policy,
        }
    });

    for vpa in &vpas.items {
        let name = vpa.name_any();
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(Error::KubeError)?;
        debug!(
            "VPA {}/{} policy updated (mode={})",
            namespace, name, config.update_policy.update_mode
        );
    }

    info!(
        "Policy synced to {} VPAs in namespace {}",
        vpas.items.len(),
        namespace
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{UpdateMode, UpdatePolicy};
    use serde_json::json;

    fn config_with_mode(mode: UpdateMode) -> NamespaceConfig {
        NamespaceConfig {
            update_policy: UpdatePolicy::with_mode(mode),
            ..Default::default()
        }
    }

    #[test]
    fn build_vpa_basic_structure() {
        let vpa = build_vpa("ns1", "api", &config_with_mode(UpdateMode::Initial));

        assert_eq!(vpa.metadata.name.as_deref(), Some("api"));
        assert_eq!(vpa.metadata.namespace.as_deref(), Some("ns1"));

        let target = &vpa.data["spec"]["targetRef"];
        assert_eq!(target["apiVersion"], "apps/v1");
        assert_eq!(target["kind"], "Deployment");
        assert_eq!(target["name"], "api");

        assert_eq!(vpa.data["spec"]["updatePolicy"]["updateMode"], "Initial");

        // No resourcePolicy key when the namespace config carries none
        assert!(vpa.data["spec"].get("resourcePolicy").is_none());
    }

    #[test]
    fn build_vpa_sets_ownership_annotation() {
        let vpa = build_vpa("ns1", "api", &config_with_mode(UpdateMode::Off));
        let annotations = vpa
            .metadata
            .annotations
            .as_ref()
            .expect("annotations must be present");
        assert_eq!(
            annotations.get(OWNER_ANNOTATION).map(String::as_str),
            Some("api")
        );
        assert_eq!(owner_of(&vpa), Some("api"));
    }

    #[test]
    fn build_vpa_copies_resource_policy_verbatim() {
        let policy = json!({
            "containerPolicies": [
                {"containerName": "*", "maxAllowed": {"memory": "8Gi"}},
            ],
        });
        let config = NamespaceConfig {
            resource_policy: Some(policy.clone()),
            ..config_with_mode(UpdateMode::Auto)
        };

        let vpa = build_vpa("ns1", "api", &config);
        assert_eq!(vpa.data["spec"]["resourcePolicy"], policy);
        assert_eq!(vpa.data["spec"]["updatePolicy"]["updateMode"], "Auto");
    }

    #[test]
    fn build_vpa_managed_by_label() {
        let vpa = build_vpa("ns1", "api", &config_with_mode(UpdateMode::Off));
        let labels = vpa.metadata.labels.as_ref().expect("labels must be present");
        assert_eq!(
            labels.get("app.kubernetes.io/managed-by").map(String::as_str),
            Some(FIELD_MANAGER)
        );
    }

    #[test]
    fn owner_of_missing_annotation_is_none() {
        let mut vpa = DynamicObject::new("api", &vpa_api_resource());
        assert_eq!(owner_of(&vpa), None);

        vpa.metadata.annotations = Some(
            [(OWNER_ANNOTATION.to_string(), "other-owner".to_string())]
                .into_iter()
                .collect(),
        );
        assert_eq!(owner_of(&vpa), Some("other-owner"));
    }

    #[test]
    fn vpa_api_resource_descriptor() {
        let ar = vpa_api_resource();
        assert_eq!(ar.group, "autoscaling.k8s.io");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.kind, "VerticalPodAutoscaler");
        assert_eq!(ar.plural, "verticalpodautoscalers");
    }
}
