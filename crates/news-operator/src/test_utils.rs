//! In-memory resource store and fixtures for unit tests
//!
//! `FakeStore` mimics the API server behaviours the reconcilers depend on:
//! resourceVersion checks on replace, status-only writes, and removal of an
//! object once it is marked for deletion and its last finalizer is gone.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::core::ErrorResponse;
use kube::Resource;

use crate::config::FeedGroupRef;
use crate::hotnews::{HotNews, HotNewsSpec, HotNewsStatus};
use crate::source::{Source, SourceSpec, SourceStatus};
use crate::store::{ResourceStore, StoreError};

pub const NAMESPACE: &str = "default";

type Key = (String, String);

#[derive(Default)]
struct Inner {
    sources: BTreeMap<Key, Source>,
    hotnews: BTreeMap<Key, HotNews>,
    config_maps: BTreeMap<Key, ConfigMap>,
    version: u64,
    source_conflicts: usize,
    fail_status_writes: bool,
    fail_lists: bool,
}

#[derive(Default)]
pub struct FakeStore {
    inner: Mutex<Inner>,
}

fn key_of<K: Resource>(obj: &K) -> Key {
    let meta = obj.meta();
    (
        meta.namespace.clone().unwrap_or_else(|| NAMESPACE.to_string()),
        meta.name.clone().unwrap_or_default(),
    )
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn api_error(code: u16, message: &str) -> StoreError {
    StoreError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: String::new(),
        code,
    }))
}

fn deletion_time() -> Time {
    serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap()
}

fn is_released(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some() && meta.finalizers.as_ref().is_none_or(|f| f.is_empty())
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn stamp(&mut self, meta: &mut ObjectMeta) {
        meta.namespace.get_or_insert_with(|| NAMESPACE.to_string());
        if meta.uid.is_none() {
            meta.uid = meta.name.as_ref().map(|n| format!("uid-{n}"));
        }
        meta.resource_version = Some(self.next_version());
    }
}

/// Version-checked replace of metadata and spec, keeping the stored status.
fn replace_in<K, S>(
    map: &mut BTreeMap<Key, K>,
    version: String,
    obj: &K,
    status_of: fn(&mut K) -> &mut Option<S>,
) -> Result<K, StoreError>
where
    K: Resource + Clone,
    S: Clone,
{
    let k = key_of(obj);
    let stored = map
        .get_mut(&k)
        .ok_or_else(|| api_error(404, "not found"))?;
    if stored.meta().resource_version != obj.meta().resource_version {
        return Err(StoreError::Conflict(k.1));
    }

    let mut updated = obj.clone();
    *status_of(&mut updated) = status_of(stored).clone();
    updated.meta_mut().resource_version = Some(version);

    if is_released(updated.meta()) {
        map.remove(&k);
    } else {
        *stored = updated.clone();
    }
    Ok(updated)
}

/// Status-only write.
fn replace_status_in<K, S>(
    map: &mut BTreeMap<Key, K>,
    version: String,
    obj: &K,
    status_of: fn(&mut K) -> &mut Option<S>,
) -> Result<K, StoreError>
where
    K: Resource + Clone,
    S: Clone,
{
    let k = key_of(obj);
    let stored = map
        .get_mut(&k)
        .ok_or_else(|| api_error(404, "not found"))?;
    let expected = obj.meta().resource_version.as_ref();
    if expected.is_some() && stored.meta().resource_version.as_ref() != expected {
        return Err(StoreError::Conflict(k.1));
    }

    let mut incoming = obj.clone();
    *status_of(stored) = status_of(&mut incoming).clone();
    stored.meta_mut().resource_version = Some(version);
    Ok(stored.clone())
}

fn source_status(source: &mut Source) -> &mut Option<SourceStatus> {
    &mut source.status
}

fn hotnews_status(hotnews: &mut HotNews) -> &mut Option<HotNewsStatus> {
    &mut hotnews.status
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_source(&self, mut source: Source) -> Source {
        let mut inner = self.inner.lock().unwrap();
        inner.stamp(&mut source.metadata);
        inner.sources.insert(key_of(&source), source.clone());
        source
    }

    pub fn insert_hotnews(&self, mut hotnews: HotNews) -> HotNews {
        let mut inner = self.inner.lock().unwrap();
        inner.stamp(&mut hotnews.metadata);
        inner.hotnews.insert(key_of(&hotnews), hotnews.clone());
        hotnews
    }

    pub fn insert_config_map(&self, mut cm: ConfigMap) -> ConfigMap {
        let mut inner = self.inner.lock().unwrap();
        inner.stamp(&mut cm.metadata);
        inner.config_maps.insert(key_of(&cm), cm.clone());
        cm
    }

    /// Source in the default namespace
    pub fn source(&self, name: &str) -> Option<Source> {
        let inner = self.inner.lock().unwrap();
        inner.sources.get(&key(NAMESPACE, name)).cloned()
    }

    /// HotNews in the default namespace
    pub fn hotnews(&self, name: &str) -> Option<HotNews> {
        let inner = self.inner.lock().unwrap();
        inner.hotnews.get(&key(NAMESPACE, name)).cloned()
    }

    /// Request deletion; objects without finalizers disappear at once.
    pub fn mark_source_deleted(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        let k = key(NAMESPACE, name);
        if let Some(source) = inner.sources.get_mut(&k) {
            source.metadata.deletion_timestamp = Some(deletion_time());
            if is_released(&source.metadata) {
                inner.sources.remove(&k);
            }
        }
    }

    pub fn mark_hotnews_deleted(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        let k = key(NAMESPACE, name);
        if let Some(hotnews) = inner.hotnews.get_mut(&k) {
            hotnews.metadata.deletion_timestamp = Some(deletion_time());
            if is_released(&hotnews.metadata) {
                inner.hotnews.remove(&k);
            }
        }
    }

    /// Reject the next `count` Source replaces with a conflict
    pub fn conflict_next_source_writes(&self, count: usize) {
        self.inner.lock().unwrap().source_conflicts = count;
    }

    pub fn fail_status_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_status_writes = fail;
    }

    pub fn fail_lists(&self, fail: bool) {
        self.inner.lock().unwrap().fail_lists = fail;
    }
}

#[async_trait]
impl ResourceStore for FakeStore {
    async fn get_source(&self, namespace: &str, name: &str) -> Result<Option<Source>, StoreError> {
        Ok(self.inner.lock().unwrap().sources.get(&key(namespace, name)).cloned())
    }

    async fn list_sources(&self, namespace: &str) -> Result<Vec<Source>, StoreError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_lists {
            return Err(api_error(500, "list failed"));
        }
        Ok(inner
            .sources
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn replace_source(&self, source: &Source) -> Result<Source, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.source_conflicts > 0 {
            inner.source_conflicts -= 1;
            return Err(StoreError::Conflict(key_of(source).1));
        }
        let version = inner.next_version();
        replace_in(&mut inner.sources, version, source, source_status)
    }

    async fn replace_source_status(&self, source: &Source) -> Result<Source, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_status_writes {
            return Err(api_error(500, "status write failed"));
        }
        let version = inner.next_version();
        replace_status_in(&mut inner.sources, version, source, source_status)
    }

    async fn get_hotnews(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HotNews>, StoreError> {
        Ok(self.inner.lock().unwrap().hotnews.get(&key(namespace, name)).cloned())
    }

    async fn list_hotnews(&self, namespace: Option<String>) -> Result<Vec<HotNews>, StoreError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_lists {
            return Err(api_error(500, "list failed"));
        }
        Ok(inner
            .hotnews
            .iter()
            .filter(|((ns, _), _)| namespace.as_deref().is_none_or(|want| want == ns))
            .map(|(_, h)| h.clone())
            .collect())
    }

    async fn replace_hotnews(&self, hotnews: &HotNews) -> Result<HotNews, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let version = inner.next_version();
        replace_in(&mut inner.hotnews, version, hotnews, hotnews_status)
    }

    async fn replace_hotnews_status(&self, hotnews: &HotNews) -> Result<HotNews, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_status_writes {
            return Err(api_error(500, "status write failed"));
        }
        let version = inner.next_version();
        replace_status_in(&mut inner.hotnews, version, hotnews, hotnews_status)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .config_maps
            .get(&key(namespace, name))
            .cloned())
    }
}

pub fn test_source(name: &str, short_name: &str) -> Source {
    Source {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: SourceSpec {
            id: 0,
            name: name.to_string(),
            link: format!("https://{short_name}.example.com/rss"),
            short_name: short_name.to_string(),
        },
        status: None,
    }
}

pub fn test_hotnews(name: &str, spec: HotNewsSpec) -> HotNews {
    HotNews {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

pub fn feed_group_ref() -> FeedGroupRef {
    FeedGroupRef {
        namespace: NAMESPACE.to_string(),
        name: "feed-group-source".to_string(),
    }
}

pub fn feed_group_config_map(pairs: &[(&str, &str)]) -> ConfigMap {
    let target = feed_group_ref();
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(target.name),
            namespace: Some(target.namespace),
            ..Default::default()
        },
        data: Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}
