//! VPAConfig Custom Resource Definition
//!
//! One VPAConfig per namespace declares that the operator manages VPAs for
//! the namespace's Deployments and carries the policy copied into them.
//! A namespace without a VPAConfig is entirely out of scope.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::UpdatePolicy;

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "autovpa.autoscaling.k8s.io",
    version = "v1",
    kind = "VPAConfig",
    plural = "vpaconfigs",
    namespaced,
    shortname = "vpac",
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.updatePolicy.updateMode"}"#,
    printcolumn = r#"{"name":"Excluded","type":"string","jsonPath":".spec.excludedDeployments"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VPAConfigSpec {
    /// Deployment names exempted from VPA management in this namespace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_deployments: Vec<String>,

    /// Opaque VPA resource policy, copied verbatim into managed VPAs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<serde_json::Value>,

    /// Update policy for managed VPAs; defaults to `updateMode: Off`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<UpdatePolicy>,
}
