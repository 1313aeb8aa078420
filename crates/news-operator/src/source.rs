//! Source CRD: a feed endpoint mirrored into the aggregation service

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// Source spec - a single news feed
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "newsaggregator.dev",
    version = "v1",
    kind = "Source",
    plural = "sources",
    shortname = "src",
    namespaced = true,
    status = "SourceStatus",
    printcolumn = r#"{"name":"Short Name", "type":"string", "jsonPath":".spec.shortName"}"#,
    printcolumn = r#"{"name":"Link", "type":"string", "jsonPath":".spec.link"}"#,
    printcolumn = r#"{"name":"ID", "type":"integer", "jsonPath":".status.id"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    /// Aggregator id (0 while unassigned)
    #[serde(default)]
    pub id: i64,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Feed URL
    #[serde(default)]
    pub link: String,
    /// Search key referenced by HotNews `sources`
    #[serde(default)]
    pub short_name: String,
}

/// Source status
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    /// Id assigned by the aggregation service, authoritative once non-zero
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Source {
    /// Id assigned by the aggregation service, 0 if the source was never created there.
    pub fn external_id(&self) -> i64 {
        self.status.as_ref().map(|s| s.id).unwrap_or(0)
    }

    /// Whether a HotNews with the given UID already appears in the owner references.
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.metadata
            .owner_references
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|r| r.uid == uid))
    }
}
