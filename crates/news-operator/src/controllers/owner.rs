//! Owner references from HotNews onto the Sources they query
//!
//! Several HotNews reconcilers may edit the same Source concurrently, so every
//! edit is a fresh read followed by a version-checked replace, retried on
//! conflict.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use tracing::{debug, warn};

use crate::hotnews::HotNews;
use crate::source::Source;
use crate::store::{ResourceStore, StoreError};

/// Attempts per Source before giving up on a conflicting edit
const MAX_CONFLICT_RETRIES: usize = 5;

/// Non-controller owner reference pointing at `hotnews`
pub fn owner_reference(hotnews: &HotNews) -> Option<OwnerReference> {
    let meta = hotnews.meta();
    Some(OwnerReference {
        api_version: HotNews::api_version(&()).to_string(),
        kind: HotNews::kind(&()).to_string(),
        name: meta.name.clone()?,
        uid: meta.uid.clone()?,
        controller: None,
        block_owner_deletion: None,
    })
}

/// Append `owner` unless a reference with the same UID exists.
pub fn add_owner(source: &mut Source, owner: &OwnerReference) -> bool {
    if source.is_owned_by(&owner.uid) {
        return false;
    }
    source
        .metadata
        .owner_references
        .get_or_insert_with(Vec::new)
        .push(owner.clone());
    true
}

/// Drop every reference to `uid`.
pub fn remove_owner(source: &mut Source, uid: &str) -> bool {
    let Some(refs) = source.metadata.owner_references.as_mut() else {
        return false;
    };
    let before = refs.len();
    refs.retain(|r| r.uid != uid);
    let changed = refs.len() != before;
    if refs.is_empty() {
        source.metadata.owner_references = None;
    }
    changed
}

/// Apply `edit` to a freshly read Source and persist it, retrying on conflict.
///
/// Returns `Ok(false)` when the Source is gone or `edit` changed nothing.
pub async fn update_source_with_retry<F>(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
    edit: F,
) -> Result<bool, StoreError>
where
    F: Fn(&mut Source) -> bool + Send + Sync,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Some(mut source) = store.get_source(namespace, name).await? else {
            debug!(source = %name, "Source disappeared before edit");
            return Ok(false);
        };
        if !edit(&mut source) {
            return Ok(false);
        }
        match store.replace_source(&source).await {
            Ok(_) => return Ok(true),
            Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                debug!(source = %name, attempt, "Conflict editing Source, retrying with fresh read");
            }
            Err(e) => {
                warn!(source = %name, attempt, error = %e, "Failed to edit Source");
                return Err(e);
            }
        }
    }
}

/// Link `hotnews` to every Source in `namespace` whose short name is in `short_names`.
///
/// Short names without a matching Source are skipped. Returns the names of the
/// Sources that were found.
pub async fn link_sources(
    store: &dyn ResourceStore,
    namespace: &str,
    hotnews: &HotNews,
    short_names: &[String],
) -> Result<Vec<String>, StoreError> {
    let owner = owner_reference(hotnews)
        .ok_or_else(|| StoreError::MissingField("metadata.uid".to_string()))?;
    let sources = store.list_sources(namespace).await?;

    let mut linked = Vec::new();
    for short_name in short_names {
        let Some(source) = sources.iter().find(|s| &s.spec.short_name == short_name) else {
            warn!(short_name = %short_name, namespace = %namespace, "Source not found, skipping");
            continue;
        };
        let Some(name) = source.metadata.name.as_deref() else {
            continue;
        };
        linked.push(name.to_string());

        if source.is_owned_by(&owner.uid) {
            continue;
        }
        if update_source_with_retry(store, namespace, name, |s| add_owner(s, &owner)).await? {
            debug!(source = %name, hotnews = %owner.name, "Added owner reference");
        }
    }
    Ok(linked)
}

/// Remove references to the HotNews `uid` from every Source in `namespace`.
pub async fn unlink_sources(
    store: &dyn ResourceStore,
    namespace: &str,
    uid: &str,
) -> Result<usize, StoreError> {
    let sources = store.list_sources(namespace).await?;

    let mut removed = 0;
    for source in sources.iter().filter(|s| s.is_owned_by(uid)) {
        let Some(name) = source.metadata.name.as_deref() else {
            continue;
        };
        if update_source_with_retry(store, namespace, name, |s| remove_owner(s, uid)).await? {
            debug!(source = %name, "Removed owner reference");
            removed += 1;
        }
    }
    Ok(removed)
}
