//! Namespace configuration cache
//!
//! Holds a process-wide snapshot mapping namespace -> resolved policy,
//! rebuilt wholesale from the cluster's VPAConfig resources. The snapshot is
//! an immutable map behind an `Arc` that is swapped in one write, so
//! concurrent readers always observe a complete pre- or post-refresh view.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::crd::{UpdatePolicy, VPAConfig, VPAConfigSpec};
use crate::error::is_not_found;

const PAGE_LIMIT: u32 = 500;

/// Resolved per-namespace policy, derived from one VPAConfig resource.
///
/// Compared with `PartialEq` by the event handlers to decide whether a
/// VPAConfig change requires a bulk policy sync of existing VPAs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamespaceConfig {
    pub excluded_deployments: BTreeSet<String>,
    pub resource_policy: Option<serde_json::Value>,
    pub update_policy: UpdatePolicy,
}

impl From<&VPAConfigSpec> for NamespaceConfig {
    fn from(spec: &VPAConfigSpec) -> Self {
        Self {
            excluded_deployments: spec.excluded_deployments.iter().cloned().collect(),
            resource_policy: spec.resource_policy.clone(),
            update_policy: spec.update_policy.clone().unwrap_or_default(),
        }
    }
}

pub type Snapshot = Arc<BTreeMap<String, NamespaceConfig>>;

/// Process-wide cache of namespace policy, shared by all event handlers.
#[derive(Default)]
pub struct ConfigCache {
    snapshot: RwLock<Snapshot>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the policy for `namespace`, or `None` when the namespace is
    /// out of scope for the operator.
    pub async fn get(&self, namespace: &str) -> Option<NamespaceConfig> {
        self.snapshot.read().await.get(namespace).cloned()
    }

    /// Returns the full current snapshot.
    pub async fn snapshot(&self) -> Snapshot {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Rebuilds the cache from the cluster's VPAConfig resources and swaps
    /// it in atomically.
    ///
    /// A listing failure does not abort the swap: whatever was enumerated
    /// before the failure replaces the previous snapshot, so a transient
    /// error can transiently evict known configuration until the next
    /// refresh.
    pub async fn refresh(&self, client: &Client) {
        let next = list_namespace_configs(client).await;
        info!("Namespace config cache refreshed ({} namespaces)", next.len());
        *self.snapshot.write().await = Arc::new(next);
    }
}

/// Lists VPAConfig resources cluster-wide, page by page, folding each page
/// into the next snapshot as it arrives.
async fn list_namespace_configs(client: &Client) -> BTreeMap<String, NamespaceConfig> {
    let api: Api<VPAConfig> = Api::all(client.clone());
    let mut next = BTreeMap::new();
    let mut params = ListParams::default().limit(PAGE_LIMIT);

    loop {
        match api.list(&params).await {
            Ok(page) => {
                fold_page(&mut next, page.items);
                match page.metadata.continue_ {
                    Some(token) if !token.is_empty() => params.continue_token = Some(token),
                    _ => break,
                }
            }
            Err(e) if is_not_found(&e) => {
                debug!("VPAConfig CRD not installed, treating configuration as empty");
                break;
            }
            Err(e) => {
                warn!(
                    "Failed to list VPAConfig resources, keeping partial result: {:?}",
                    e
                );
                break;
            }
        }
    }

    next
}

/// Folds one page of VPAConfig resources into the snapshot under
/// construction. The first resource enumerated for a namespace wins.
fn fold_page(next: &mut BTreeMap<String, NamespaceConfig>, items: Vec<VPAConfig>) {
    for config in items {
        let Some(namespace) = config.namespace() else {
            continue;
        };
        next.entry(namespace)
            .or_insert_with(|| NamespaceConfig::from(&config.spec));
    }
}
