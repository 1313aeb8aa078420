//! HotNews CRD: a standing query over aggregated articles

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// Titles kept in the summary when `summaryConfig.titlesCount` is unset
pub const DEFAULT_TITLES_COUNT: u32 = 10;

/// HotNews spec - keywords, date window and the sources to search
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "newsaggregator.dev",
    version = "v1",
    kind = "HotNews",
    plural = "hotnews",
    shortname = "hn",
    namespaced = true,
    status = "HotNewsStatus",
    printcolumn = r#"{"name":"Articles", "type":"integer", "jsonPath":".status.articlesCount"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[0].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HotNewsSpec {
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Inclusive start date, `YYYY-MM-DD`
    pub date_start: Option<String>,
    /// Inclusive end date, `YYYY-MM-DD`
    pub date_end: Option<String>,
    /// Source short names
    #[serde(default)]
    pub sources: Vec<String>,
    /// Keys into the feed-group ConfigMap
    #[serde(default)]
    pub feed_groups: Vec<String>,
    #[serde(default)]
    pub summary_config: SummaryConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SummaryConfig {
    #[serde(default)]
    pub titles_count: u32,
}

impl HotNewsSpec {
    /// Number of titles to keep, falling back to the default when unset.
    pub fn titles_count(&self) -> usize {
        match self.summary_config.titles_count {
            0 => DEFAULT_TITLES_COUNT as usize,
            n => n as usize,
        }
    }
}

/// HotNews status
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HotNewsStatus {
    #[serde(default)]
    pub articles_count: usize,
    /// Query URL used for the last fetch
    #[serde(default)]
    pub news_link: String,
    #[serde(default)]
    pub articles_titles: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
