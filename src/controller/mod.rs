//! Controller module for VPA lifecycle management
//!
//! Contains the namespace config cache, the eligibility resolver, the VPA
//! reconciler, and the event orchestration that ties them together.

mod cache;
mod handlers;
mod resolver;
pub mod vpa;

pub use cache::{ConfigCache, NamespaceConfig};
pub use handlers::{
    handle_config_applied, handle_config_deleted, handle_deployment_created,
    handle_deployment_deleted, handle_deployment_updated, reconcile_namespace, run_operator,
    ControllerState,
};
pub use resolver::{parse_enabled, should_manage, ENABLED_ANNOTATION};
