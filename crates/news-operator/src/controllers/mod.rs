//! Source and HotNews controllers

pub mod hotnews;
pub mod owner;
pub mod retry;
pub mod source;

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::client::AggregatorClient;
use crate::config::FeedGroupRef;
use crate::store::ResourceStore;

use retry::RetryTracker;

/// Shared state for all controllers
pub struct ControllerContext {
    /// Resource store (API server in production)
    pub store: Arc<dyn ResourceStore>,
    /// Aggregation service client
    pub aggregator: Arc<dyn AggregatorClient>,
    /// Feed-group ConfigMap location
    pub feed_group: FeedGroupRef,
    /// Requeue interval after a successful HotNews reconcile
    pub hotnews_resync: Duration,
    /// Consecutive failures per object
    pub retry_tracker: Arc<RetryTracker>,
}

/// Key for the retry tracker: the UID, or `namespace/name` when the object has none
pub fn retry_key(meta: &ObjectMeta) -> String {
    match meta.uid.as_deref() {
        Some(uid) => uid.to_string(),
        None => format!(
            "{}/{}",
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default()
        ),
    }
}

pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Add `finalizer`, returning whether the metadata changed
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    if has_finalizer(meta, finalizer) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Remove `finalizer`, returning whether the metadata changed
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != before
}
