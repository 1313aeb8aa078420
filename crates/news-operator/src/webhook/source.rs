//! Source admission: field format and namespace-wide uniqueness

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::{into_result, AdmissionValidator, FieldError, ValidationResult};
use crate::source::Source;
use crate::store::ResourceStore;

/// Upper bound on `spec.name` and `spec.shortName`
pub const MAX_NAME_LENGTH: usize = 20;

pub struct SourceValidator {
    store: Arc<dyn ResourceStore>,
}

/// Required and length checks for a short identifier field.
fn check_name(field: &str, value: &str, errors: &mut Vec<FieldError>) {
    if value.is_empty() {
        errors.push(FieldError::required(field, "must be present"));
    } else if value.chars().count() > MAX_NAME_LENGTH {
        errors.push(FieldError::invalid(
            field,
            value,
            format!("cannot be more than {MAX_NAME_LENGTH} characters"),
        ));
    }
}

fn check_link(value: &str, errors: &mut Vec<FieldError>) {
    if value.is_empty() {
        errors.push(FieldError::required("spec.link", "must be present"));
    } else if let Err(e) = Url::parse(value) {
        errors.push(FieldError::invalid(
            "spec.link",
            value,
            format!("must be an absolute URL: {e}"),
        ));
    }
}

/// Field format errors that need no store access.
pub fn format_errors(source: &Source) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_name("spec.name", &source.spec.name, &mut errors);
    check_name("spec.shortName", &source.spec.short_name, &mut errors);
    check_link(&source.spec.link, &mut errors);
    errors
}

/// Fields of `source` already used by another Source in `existing`.
pub fn uniqueness_errors(source: &Source, existing: &[Source]) -> Vec<FieldError> {
    let own_name = source.metadata.name.as_deref();
    let others: Vec<&Source> = existing
        .iter()
        .filter(|s| s.metadata.name.as_deref() != own_name)
        .collect();

    let mut errors = Vec::new();
    let spec = &source.spec;
    if !spec.name.is_empty() && others.iter().any(|s| s.spec.name == spec.name) {
        errors.push(FieldError::duplicate("spec.name", &spec.name));
    }
    if !spec.short_name.is_empty() && others.iter().any(|s| s.spec.short_name == spec.short_name) {
        errors.push(FieldError::duplicate("spec.shortName", &spec.short_name));
    }
    if !spec.link.is_empty() && others.iter().any(|s| s.spec.link == spec.link) {
        errors.push(FieldError::duplicate("spec.link", &spec.link));
    }
    errors
}

impl SourceValidator {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    async fn validate(&self, source: &Source) -> ValidationResult {
        let mut errors = format_errors(source);
        let namespace = source.metadata.namespace.as_deref().unwrap_or("default");

        match self.store.list_sources(namespace).await {
            Ok(existing) => errors.extend(uniqueness_errors(source, &existing)),
            Err(e) => errors.push(FieldError::internal(
                "spec",
                format!("failed to list sources: {e}"),
            )),
        }

        debug!(
            name = ?source.metadata.name,
            errors = errors.len(),
            "Validated Source"
        );
        into_result(source, errors, Vec::new())
    }
}

#[async_trait]
impl AdmissionValidator for SourceValidator {
    type Resource = Source;

    async fn validate_create(&self, obj: &Source) -> ValidationResult {
        self.validate(obj).await
    }

    async fn validate_update(&self, _old: &Source, obj: &Source) -> ValidationResult {
        self.validate(obj).await
    }

    async fn validate_delete(&self, _obj: &Source) -> ValidationResult {
        Ok(Vec::new())
    }
}
