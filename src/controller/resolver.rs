//! Eligibility decisions for Deployments
//!
//! Pure functions deciding whether a Deployment should own a managed VPA.
//! All policy inputs (namespace config, exclusion set, enablement
//! annotation) are combined here and nowhere else.

use std::collections::BTreeMap;

use super::cache::NamespaceConfig;

/// Per-Deployment opt-out annotation. Absent means enabled.
pub const ENABLED_ANNOTATION: &str = "autovpa.autoscaling.k8s.io/enabled";

const TRUE_LITERALS: [&str; 4] = ["yes", "true", "t", "1"];

/// Parses the enablement annotation value.
///
/// Absent defaults to enabled. A present value is true iff it matches one of
/// the accepted literals case-insensitively; every other literal is false.
pub fn parse_enabled(value: Option<&str>) -> bool {
    let value = value.unwrap_or("true");
    TRUE_LITERALS.iter().any(|lit| value.eq_ignore_ascii_case(lit))
}

/// True iff the Deployment `name` should own a managed VPA: its namespace
/// has a config, it is not excluded, and its enablement annotation parses
/// true.
pub fn should_manage(
    config: Option<&NamespaceConfig>,
    name: &str,
    annotations: &BTreeMap<String, String>,
) -> bool {
    let Some(config) = config else {
        return false;
    };
    if config.excluded_deployments.contains(name) {
        return false;
    }
    parse_enabled(annotations.get(ENABLED_ANNOTATION).map(String::as_str))
}
