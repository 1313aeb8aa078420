//! HotNews admission: defaulting, date window and source references

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use super::{into_result, AdmissionValidator, FieldError, ValidationResult, Warnings};
use crate::config::FeedGroupRef;
use crate::feedgroup::{config_data, resolve_group};
use crate::hotnews::{HotNews, HotNewsSpec, DEFAULT_TITLES_COUNT};
use crate::store::ResourceStore;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct HotNewsValidator {
    store: Arc<dyn ResourceStore>,
    feed_group: FeedGroupRef,
}

/// Set `summaryConfig.titlesCount` when it was left at zero.
pub fn apply_defaults(spec: &mut HotNewsSpec) {
    if spec.summary_config.titles_count == 0 {
        spec.summary_config.titles_count = DEFAULT_TITLES_COUNT;
    }
}

fn parse_date(field: &str, value: &str, errors: &mut Vec<FieldError>) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(value, DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(_) => {
            errors.push(FieldError::invalid(field, value, "must be a date in YYYY-MM-DD format"));
            None
        }
    }
}

/// Checks on keywords and the date window.
pub fn spec_errors(spec: &HotNewsSpec) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if spec.keywords.is_empty() {
        errors.push(FieldError::required("spec.keywords", "at least one keyword must be present"));
    }

    let start = spec
        .date_start
        .as_deref()
        .and_then(|d| parse_date("spec.dateStart", d, &mut errors));
    let end = spec
        .date_end
        .as_deref()
        .and_then(|d| parse_date("spec.dateEnd", d, &mut errors));
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            errors.push(FieldError::invalid(
                "spec.dateStart",
                start.format(DATE_FORMAT).to_string(),
                "dateStart must be before dateEnd",
            ));
        }
    }

    errors
}

/// Short names referenced by `spec.sources` that are missing from `known`.
fn missing_sources(spec: &HotNewsSpec, known: &[&str]) -> Vec<FieldError> {
    spec.sources
        .iter()
        .enumerate()
        .filter(|(_, name)| !known.contains(&name.as_str()))
        .map(|(i, name)| FieldError::not_found(format!("spec.sources[{i}]"), name))
        .collect()
}

/// Feed-group checks against the ConfigMap data.
///
/// Unknown groups are advisory; resolved short names must exist.
fn feed_group_findings(
    spec: &HotNewsSpec,
    data: &BTreeMap<String, String>,
    known: Option<&[&str]>,
    target: &FeedGroupRef,
) -> (Vec<FieldError>, Warnings) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for (i, group) in spec.feed_groups.iter().enumerate() {
        if !data.contains_key(group) {
            warnings.push(format!(
                "feed group \"{group}\" is not defined in ConfigMap {}/{}",
                target.namespace, target.name
            ));
            continue;
        }
        let Some(known) = known else { continue };
        for short_name in resolve_group(data, group) {
            if !known.contains(&short_name) {
                errors.push(FieldError::not_found(format!("spec.feedGroups[{i}]"), short_name));
            }
        }
    }

    (errors, warnings)
}

impl HotNewsValidator {
    pub fn new(store: Arc<dyn ResourceStore>, feed_group: FeedGroupRef) -> Self {
        Self { store, feed_group }
    }

    async fn validate(&self, hotnews: &HotNews) -> ValidationResult {
        let spec = &hotnews.spec;
        let namespace = hotnews.metadata.namespace.as_deref().unwrap_or("default");
        let mut errors = spec_errors(spec);
        let mut warnings = Vec::new();

        let sources = match self.store.list_sources(namespace).await {
            Ok(sources) => Some(sources),
            Err(e) => {
                errors.push(FieldError::internal(
                    "spec.sources",
                    format!("failed to list sources: {e}"),
                ));
                None
            }
        };
        let known: Option<Vec<&str>> = sources
            .as_ref()
            .map(|list| list.iter().map(|s| s.spec.short_name.as_str()).collect());

        if let Some(known) = &known {
            errors.extend(missing_sources(spec, known));
        }

        if !spec.feed_groups.is_empty() {
            let target = &self.feed_group;
            match self.store.get_config_map(&target.namespace, &target.name).await {
                Ok(Some(cm)) => {
                    let (group_errors, group_warnings) =
                        feed_group_findings(spec, config_data(&cm), known.as_deref(), target);
                    errors.extend(group_errors);
                    warnings.extend(group_warnings);
                }
                Ok(None) => warnings.push(format!(
                    "feed-group ConfigMap {}/{} not found, feedGroups will not resolve",
                    target.namespace, target.name
                )),
                Err(e) => warnings.push(format!(
                    "could not read feed-group ConfigMap {}/{}: {e}",
                    target.namespace, target.name
                )),
            }
        }

        debug!(
            name = ?hotnews.metadata.name,
            errors = errors.len(),
            warnings = warnings.len(),
            "Validated HotNews"
        );
        into_result(hotnews, errors, warnings)
    }
}

#[async_trait]
impl AdmissionValidator for HotNewsValidator {
    type Resource = HotNews;

    fn apply_defaults(&self, obj: &mut HotNews) {
        apply_defaults(&mut obj.spec);
    }

    async fn validate_create(&self, obj: &HotNews) -> ValidationResult {
        self.validate(obj).await
    }

    async fn validate_update(&self, _old: &HotNews, obj: &HotNews) -> ValidationResult {
        self.validate(obj).await
    }

    async fn validate_delete(&self, _obj: &HotNews) -> ValidationResult {
        Ok(Vec::new())
    }
}
