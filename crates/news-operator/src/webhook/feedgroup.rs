//! Feed-group ConfigMap admission
//!
//! Only the configured ConfigMap is checked; any other ConfigMap routed here
//! is allowed unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use tracing::debug;

use super::{into_result, AdmissionValidator, FieldError, ValidationResult};
use crate::config::FeedGroupRef;
use crate::feedgroup::{config_data, split_short_names};
use crate::store::ResourceStore;

pub struct FeedGroupValidator {
    store: Arc<dyn ResourceStore>,
    target: FeedGroupRef,
}

impl FeedGroupValidator {
    pub fn new(store: Arc<dyn ResourceStore>, target: FeedGroupRef) -> Self {
        Self { store, target }
    }

    fn is_target(&self, cm: &ConfigMap) -> bool {
        self.target
            .matches(cm.metadata.namespace.as_deref(), cm.metadata.name.as_deref())
    }

    /// Every short name in every group must name an existing Source.
    async fn validate_groups(&self, cm: &ConfigMap) -> ValidationResult {
        if !self.is_target(cm) {
            return Ok(Vec::new());
        }

        let namespace = cm.metadata.namespace.as_deref().unwrap_or("default");
        let sources = match self.store.list_sources(namespace).await {
            Ok(sources) => sources,
            Err(e) => {
                let error = FieldError::internal("data", format!("failed to list sources: {e}"));
                return into_result(cm, vec![error], Vec::new());
            }
        };

        let mut errors = Vec::new();
        for (group, value) in config_data(cm) {
            for short_name in split_short_names(value) {
                if !sources.iter().any(|s| s.spec.short_name == short_name) {
                    errors.push(FieldError::not_found(format!("data[{group}]"), short_name));
                }
            }
        }

        debug!(groups = config_data(cm).len(), errors = errors.len(), "Validated feed groups");
        into_result(cm, errors, Vec::new())
    }
}

#[async_trait]
impl AdmissionValidator for FeedGroupValidator {
    type Resource = ConfigMap;

    async fn validate_create(&self, obj: &ConfigMap) -> ValidationResult {
        self.validate_groups(obj).await
    }

    async fn validate_update(&self, _old: &ConfigMap, obj: &ConfigMap) -> ValidationResult {
        self.validate_groups(obj).await
    }

    /// Refused while any HotNews in the cluster declares feed groups.
    async fn validate_delete(&self, obj: &ConfigMap) -> ValidationResult {
        if !self.is_target(obj) {
            return Ok(Vec::new());
        }

        let error = match self.store.list_hotnews(None).await {
            Ok(all) => all
                .iter()
                .find(|hn| !hn.spec.feed_groups.is_empty())
                .map(|hn| {
                    FieldError::forbidden(
                        "data",
                        format!(
                            "feed groups are in use by HotNews {}/{}",
                            hn.metadata.namespace.as_deref().unwrap_or_default(),
                            hn.metadata.name.as_deref().unwrap_or_default()
                        ),
                    )
                }),
            Err(e) => Some(FieldError::internal("data", format!("failed to list hotnews: {e}"))),
        };

        into_result(obj, error.into_iter().collect(), Vec::new())
    }
}
