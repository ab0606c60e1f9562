//! Shared types for VPAConfig specifications
//!
//! These types are used across the CRD definition and controller logic.
//! They mirror the `updatePolicy` block of the upstream VerticalPodAutoscaler
//! API so that the operator can copy policy verbatim into managed VPAs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Update mode applied to managed VerticalPodAutoscalers
///
/// Matches the `spec.updatePolicy.updateMode` enumeration of the
/// `autoscaling.k8s.io/v1` VerticalPodAutoscaler API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum UpdateMode {
    /// Recommendations are computed but never applied
    #[default]
    Off,

    /// Resource requests are set on pod creation only
    Initial,

    /// Pods are evicted and recreated with updated requests
    Recreate,

    /// The VPA controller picks the least disruptive mechanism available
    Auto,
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateMode::Off => write!(f, "Off"),
            UpdateMode::Initial => write!(f, "Initial"),
            UpdateMode::Recreate => write!(f, "Recreate"),
            UpdateMode::Auto => write!(f, "Auto"),
        }
    }
}

/// Update policy propagated into every managed VPA in a namespace
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    #[serde(default)]
    pub update_mode: UpdateMode,
}

impl UpdatePolicy {
    pub fn with_mode(update_mode: UpdateMode) -> Self {
        Self { update_mode }
    }
}
