//! Feed-group resolution
//!
//! A feed group is a key in the feed-group ConfigMap whose value is a
//! comma-separated list of Source short names.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

/// Split a comma-separated list of short names, trimming blanks.
pub fn split_short_names(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Data section of a ConfigMap, empty if unset.
pub fn config_data(cm: &ConfigMap) -> &BTreeMap<String, String> {
    static EMPTY: BTreeMap<String, String> = BTreeMap::new();
    cm.data.as_ref().unwrap_or(&EMPTY)
}

/// Short names a single feed group expands to. Unknown groups expand to nothing.
pub fn resolve_group<'a>(data: &'a BTreeMap<String, String>, group: &str) -> Vec<&'a str> {
    data.get(group)
        .map(|value| split_short_names(value).collect())
        .unwrap_or_default()
}

/// Short names reachable through `groups`, in declaration order without duplicates.
pub fn resolve_groups(data: &BTreeMap<String, String>, groups: &[String]) -> Vec<String> {
    let mut resolved: Vec<String> = Vec::new();
    for group in groups {
        for name in resolve_group(data, group) {
            if !resolved.iter().any(|r| r == name) {
                resolved.push(name.to_string());
            }
        }
    }
    resolved
}

/// Explicit sources merged with the ones resolved from feed groups.
///
/// Returns a fresh working set; the HotNews spec itself is never touched.
pub fn effective_sources(
    sources: &[String],
    groups: &[String],
    data: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut effective: Vec<String> = Vec::with_capacity(sources.len());
    for name in sources.iter().cloned().chain(resolve_groups(data, groups)) {
        if !effective.contains(&name) {
            effective.push(name);
        }
    }
    effective
}

/// Whether any of `groups` resolves to a non-empty list.
pub fn any_group_resolves(data: &BTreeMap<String, String>, groups: &[String]) -> bool {
    groups.iter().any(|g| !resolve_group(data, g).is_empty())
}
