//! Watch-event mapping from dependencies to the HotNews objects they affect
//!
//! Both mappers are pure: they read the objects handed to them (reflector
//! snapshots in production) and return reconcile keys, sorted and unique.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::reflector::ObjectRef;

use crate::config::FeedGroupRef;
use crate::feedgroup::{any_group_resolves, config_data, resolve_groups};
use crate::hotnews::HotNews;
use crate::source::Source;

fn object_ref(hotnews: &HotNews) -> Option<ObjectRef<HotNews>> {
    let name = hotnews.metadata.name.as_deref()?;
    let namespace = hotnews.metadata.namespace.as_deref()?;
    Some(ObjectRef::new(name).within(namespace))
}

fn sorted_unique(mut refs: Vec<ObjectRef<HotNews>>) -> Vec<ObjectRef<HotNews>> {
    refs.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    refs.dedup();
    refs
}

/// HotNews to re-reconcile after the feed-group ConfigMap changed.
///
/// Other ConfigMaps map to nothing. Every HotNews whose feed groups resolve to
/// at least one short name in the new data, or in `previous` (the data seen
/// on the last event), is returned. A group removed from the ConfigMap thus
/// still enqueues the HotNews that used it.
pub fn hotnews_for_feed_groups(
    cm: &ConfigMap,
    target: &FeedGroupRef,
    hotnews: &[Arc<HotNews>],
    previous: Option<&BTreeMap<String, String>>,
) -> Vec<ObjectRef<HotNews>> {
    if !target.matches(cm.metadata.namespace.as_deref(), cm.metadata.name.as_deref()) {
        return Vec::new();
    }
    let data = config_data(cm);

    sorted_unique(
        hotnews
            .iter()
            .filter(|hn| {
                any_group_resolves(data, &hn.spec.feed_groups)
                    || previous.is_some_and(|old| any_group_resolves(old, &hn.spec.feed_groups))
            })
            .filter_map(|hn| object_ref(hn))
            .collect(),
    )
}

/// HotNews in the Source's namespace that query it, directly or via a feed group.
///
/// `feed_groups` is the current feed-group data if it could be read; `None`
/// drops the feed-group contribution instead of failing.
pub fn hotnews_for_source(
    source: &Source,
    hotnews: &[Arc<HotNews>],
    feed_groups: Option<&BTreeMap<String, String>>,
) -> Vec<ObjectRef<HotNews>> {
    let short_name = &source.spec.short_name;
    let namespace = source.metadata.namespace.as_deref();
    if short_name.is_empty() {
        return Vec::new();
    }

    sorted_unique(
        hotnews
            .iter()
            .filter(|hn| hn.metadata.namespace.as_deref() == namespace)
            .filter(|hn| {
                hn.spec.sources.contains(short_name)
                    || feed_groups.is_some_and(|data| {
                        resolve_groups(data, &hn.spec.feed_groups).contains(short_name)
                    })
            })
            .filter_map(|hn| object_ref(hn))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotnews::HotNewsSpec;
    use crate::test_utils::{feed_group_config_map, feed_group_ref, test_hotnews, test_source};

    fn hotnews(name: &str, sources: &[&str], groups: &[&str]) -> Arc<HotNews> {
        Arc::new(test_hotnews(
            name,
            HotNewsSpec {
                keywords: vec!["rust".to_string()],
                sources: sources.iter().map(|s| s.to_string()).collect(),
                feed_groups: groups.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        ))
    }

    fn names(refs: &[ObjectRef<HotNews>]) -> Vec<&str> {
        refs.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_config_map_update_enqueues_group_users_only() {
        let all = vec![
            hotnews("uses-group1", &[], &["group1"]),
            hotnews("uses-group2", &[], &["group2"]),
            hotnews("no-groups", &["source1"], &[]),
        ];
        // group1 shrinks from "source1,source2" to "source1"
        let cm = feed_group_config_map(&[("group1", "source1")]);

        let refs = hotnews_for_feed_groups(&cm, &feed_group_ref(), &all, None);

        assert_eq!(names(&refs), vec!["uses-group1"]);
    }

    #[test]
    fn test_removed_group_still_enqueues_its_users() {
        let all = vec![
            hotnews("uses-group1", &[], &["group1"]),
            hotnews("uses-group2", &[], &["group2"]),
        ];
        let old = config_data(&feed_group_config_map(&[("group1", "source1,source2")])).clone();
        let cm = feed_group_config_map(&[("group3", "source3")]);

        assert!(hotnews_for_feed_groups(&cm, &feed_group_ref(), &all, None).is_empty());

        let refs = hotnews_for_feed_groups(&cm, &feed_group_ref(), &all, Some(&old));

        assert_eq!(names(&refs), vec!["uses-group1"]);
    }

    #[test]
    fn test_previous_data_keeps_shrink_scenario_unchanged() {
        let all = vec![
            hotnews("uses-group1", &[], &["group1"]),
            hotnews("uses-group2", &[], &["group2"]),
        ];
        let old = config_data(&feed_group_config_map(&[("group1", "source1,source2")])).clone();
        let cm = feed_group_config_map(&[("group1", "source1")]);

        let refs = hotnews_for_feed_groups(&cm, &feed_group_ref(), &all, Some(&old));

        assert_eq!(names(&refs), vec!["uses-group1"]);
    }

    #[test]
    fn test_other_config_maps_are_ignored() {
        let all = vec![hotnews("uses-group1", &[], &["group1"])];
        let mut cm = feed_group_config_map(&[("group1", "source1")]);
        cm.metadata.name = Some("unrelated".to_string());

        assert!(hotnews_for_feed_groups(&cm, &feed_group_ref(), &all, None).is_empty());
    }

    #[test]
    fn test_config_map_mapping_spans_namespaces() {
        let mut other_ns = (*hotnews("elsewhere", &[], &["group1"])).clone();
        other_ns.metadata.namespace = Some("team-a".to_string());
        let all = vec![Arc::new(other_ns), hotnews("local", &[], &["group1"])];
        let cm = feed_group_config_map(&[("group1", "source1")]);

        let refs = hotnews_for_feed_groups(&cm, &feed_group_ref(), &all, None);

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].namespace.as_deref(), Some("default"));
        assert_eq!(refs[1].namespace.as_deref(), Some("team-a"));
    }

    #[test]
    fn test_source_change_enqueues_direct_and_group_users() {
        let all = vec![
            hotnews("direct", &["hn"], &[]),
            hotnews("via-group", &[], &["tech"]),
            hotnews("unrelated", &["lwn"], &["politics"]),
        ];
        let data = config_data(&feed_group_config_map(&[("tech", "hn,lwn"), ("politics", "bbc")]))
            .clone();

        let refs = hotnews_for_source(&test_source("hacker-news", "hn"), &all, Some(&data));

        assert_eq!(names(&refs), vec!["direct", "via-group"]);
    }

    #[test]
    fn test_source_mapping_without_feed_groups_degrades() {
        let all = vec![
            hotnews("direct", &["hn"], &[]),
            hotnews("via-group", &[], &["tech"]),
        ];

        let refs = hotnews_for_source(&test_source("hacker-news", "hn"), &all, None);

        assert_eq!(names(&refs), vec!["direct"]);
    }

    #[test]
    fn test_source_mapping_stays_in_namespace() {
        let mut other_ns = (*hotnews("elsewhere", &["hn"], &[])).clone();
        other_ns.metadata.namespace = Some("team-a".to_string());
        let all = vec![Arc::new(other_ns)];

        assert!(hotnews_for_source(&test_source("hacker-news", "hn"), &all, None).is_empty());
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let all = vec![
            hotnews("b", &["hn"], &["tech"]),
            hotnews("a", &["hn"], &[]),
        ];
        let data = config_data(&feed_group_config_map(&[("tech", "hn")])).clone();
        let source = test_source("hacker-news", "hn");

        let first = hotnews_for_source(&source, &all, Some(&data));
        let second = hotnews_for_source(&source, &all, Some(&data));

        assert_eq!(first, second);
        assert_eq!(names(&first), vec!["a", "b"]);
    }
}
