//! Resource store access used by reconcilers, mappers and validators
//!
//! Writes go through `replace` so the object's `resourceVersion` is checked by
//! the API server; a stale write surfaces as [`StoreError::Conflict`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::hotnews::HotNews;
use crate::source::Source;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write conflict on {0}, object was modified")]
    Conflict(String),
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Consistent-read and optimistic-write access to the platform store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_source(&self, namespace: &str, name: &str) -> Result<Option<Source>, StoreError>;

    async fn list_sources(&self, namespace: &str) -> Result<Vec<Source>, StoreError>;

    /// Replace metadata and spec, checked against `resourceVersion`
    async fn replace_source(&self, source: &Source) -> Result<Source, StoreError>;

    async fn replace_source_status(&self, source: &Source) -> Result<Source, StoreError>;

    async fn get_hotnews(&self, namespace: &str, name: &str)
        -> Result<Option<HotNews>, StoreError>;

    /// List HotNews in one namespace, or cluster-wide for `None`
    async fn list_hotnews(&self, namespace: Option<String>) -> Result<Vec<HotNews>, StoreError>;

    async fn replace_hotnews(&self, hotnews: &HotNews) -> Result<HotNews, StoreError>;

    async fn replace_hotnews_status(&self, hotnews: &HotNews) -> Result<HotNews, StoreError>;

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, StoreError>;
}

/// [`ResourceStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Name and namespace of an object about to be written
fn identity<K: Resource>(obj: &K) -> Result<(String, String), StoreError> {
    let meta = obj.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| StoreError::MissingField("metadata.name".to_string()))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or_else(|| StoreError::MissingField("metadata.namespace".to_string()))?;
    Ok((name, namespace))
}

/// Translate a 404 into `None`
fn found<K>(result: Result<K, kube::Error>) -> Result<Option<K>, StoreError> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Translate a 409 into [`StoreError::Conflict`]
fn written<K>(result: Result<K, kube::Error>, name: &str) -> Result<K, StoreError> {
    match result {
        Ok(obj) => Ok(obj),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Err(StoreError::Conflict(name.to_string())),
        Err(e) => Err(e.into()),
    }
}

async fn replace<K>(api: &Api<K>, name: &str, obj: &K) -> Result<K, StoreError>
where
    K: Resource + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
{
    written(api.replace(name, &PostParams::default(), obj).await, name)
}

async fn replace_status<K>(api: &Api<K>, name: &str, obj: &K) -> Result<K, StoreError>
where
    K: Resource + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
{
    let data = serde_json::to_vec(obj)?;
    written(
        api.replace_status(name, &PostParams::default(), data).await,
        name,
    )
}

#[async_trait]
impl ResourceStore for KubeStore {
    #[instrument(skip(self))]
    async fn get_source(&self, namespace: &str, name: &str) -> Result<Option<Source>, StoreError> {
        found(self.namespaced::<Source>(namespace).get(name).await)
    }

    #[instrument(skip(self))]
    async fn list_sources(&self, namespace: &str) -> Result<Vec<Source>, StoreError> {
        let list = self
            .namespaced::<Source>(namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    #[instrument(skip(self, source), fields(name = ?source.metadata.name))]
    async fn replace_source(&self, source: &Source) -> Result<Source, StoreError> {
        let (name, namespace) = identity(source)?;
        replace(&self.namespaced(&namespace), &name, source).await
    }

    #[instrument(skip(self, source), fields(name = ?source.metadata.name))]
    async fn replace_source_status(&self, source: &Source) -> Result<Source, StoreError> {
        let (name, namespace) = identity(source)?;
        replace_status(&self.namespaced(&namespace), &name, source).await
    }

    #[instrument(skip(self))]
    async fn get_hotnews(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HotNews>, StoreError> {
        found(self.namespaced::<HotNews>(namespace).get(name).await)
    }

    #[instrument(skip(self))]
    async fn list_hotnews(&self, namespace: Option<String>) -> Result<Vec<HotNews>, StoreError> {
        let api: Api<HotNews> = match namespace.as_deref() {
            Some(ns) => self.namespaced(ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    #[instrument(skip(self, hotnews), fields(name = ?hotnews.metadata.name))]
    async fn replace_hotnews(&self, hotnews: &HotNews) -> Result<HotNews, StoreError> {
        let (name, namespace) = identity(hotnews)?;
        replace(&self.namespaced(&namespace), &name, hotnews).await
    }

    #[instrument(skip(self, hotnews), fields(name = ?hotnews.metadata.name))]
    async fn replace_hotnews_status(&self, hotnews: &HotNews) -> Result<HotNews, StoreError> {
        let (name, namespace) = identity(hotnews)?;
        replace_status(&self.namespaced(&namespace), &name, hotnews).await
    }

    #[instrument(skip(self))]
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, StoreError> {
        found(self.namespaced::<ConfigMap>(namespace).get(name).await)
    }
}
