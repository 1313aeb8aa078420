//! Admission webhooks for Source, HotNews and the feed-group ConfigMap
//!
//! Each resource kind plugs an [`AdmissionValidator`] into two generic axum
//! handlers: the mutating handler applies defaults and answers with a JSON
//! patch, the validating handler dispatches on the admission operation.

pub mod feedgroup;
pub mod hotnews;
pub mod source;

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::FeedGroupRef;
use crate::store::ResourceStore;

pub use self::feedgroup::FeedGroupValidator;
pub use self::hotnews::HotNewsValidator;
pub use self::source::SourceValidator;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("failed to load TLS certificate from {path}: {source}")]
    Tls {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("webhook server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// A single field-level validation failure, rendered like apimachinery field errors.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("{field}: Required value: {detail}")]
    Required { field: String, detail: String },
    #[error("{field}: Invalid value: \"{value}\": {detail}")]
    Invalid {
        field: String,
        value: String,
        detail: String,
    },
    #[error("{field}: Duplicate value: \"{value}\"")]
    Duplicate { field: String, value: String },
    #[error("{field}: Not found: \"{value}\"")]
    NotFound { field: String, value: String },
    #[error("{field}: Forbidden: {detail}")]
    Forbidden { field: String, detail: String },
    #[error("{field}: Internal error: {detail}")]
    Internal { field: String, detail: String },
}

impl FieldError {
    pub fn required(field: impl Into<String>, detail: impl Into<String>) -> Self {
        FieldError::Required {
            field: field.into(),
            detail: detail.into(),
        }
    }

    pub fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        FieldError::Invalid {
            field: field.into(),
            value: value.into(),
            detail: detail.into(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        FieldError::Duplicate {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_found(field: impl Into<String>, value: impl Into<String>) -> Self {
        FieldError::NotFound {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn forbidden(field: impl Into<String>, detail: impl Into<String>) -> Self {
        FieldError::Forbidden {
            field: field.into(),
            detail: detail.into(),
        }
    }

    pub fn internal(field: impl Into<String>, detail: impl Into<String>) -> Self {
        FieldError::Internal {
            field: field.into(),
            detail: detail.into(),
        }
    }
}

struct FieldErrors<'a>(&'a [FieldError]);

impl fmt::Display for FieldErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            [single] => write!(f, "{single}"),
            errors => {
                f.write_str("[")?;
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Aggregate of every field error found for one object
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind} \"{name}\" is invalid: {}", FieldErrors(.errors))]
pub struct ValidationError {
    /// Qualified kind, e.g. `Source.newsaggregator.dev`
    pub kind: String,
    pub name: String,
    pub errors: Vec<FieldError>,
}

/// Advisory messages returned to the client alongside an allowed request
pub type Warnings = Vec<String>;

pub type ValidationResult = Result<Warnings, ValidationError>;

/// Turn collected field errors into a result for `obj`.
pub fn into_result<K: Resource<DynamicType = ()>>(
    obj: &K,
    errors: Vec<FieldError>,
    warnings: Warnings,
) -> ValidationResult {
    if errors.is_empty() {
        return Ok(warnings);
    }
    let group = K::group(&());
    let kind = if group.is_empty() {
        K::kind(&()).to_string()
    } else {
        format!("{}.{group}", K::kind(&()))
    };
    Err(ValidationError {
        kind,
        name: obj.meta().name.clone().unwrap_or_default(),
        errors,
    })
}

/// Defaulting and validation hooks for one resource kind
#[async_trait]
pub trait AdmissionValidator: Send + Sync + 'static {
    type Resource: Resource<DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Fill in defaults before validation. No-op unless overridden.
    fn apply_defaults(&self, _obj: &mut Self::Resource) {}

    async fn validate_create(&self, obj: &Self::Resource) -> ValidationResult;

    async fn validate_update(&self, old: &Self::Resource, obj: &Self::Resource)
        -> ValidationResult;

    async fn validate_delete(&self, obj: &Self::Resource) -> ValidationResult;
}

/// Copy of `obj` with the request namespace filled in.
///
/// Objects submitted on create often omit `metadata.namespace`.
fn scoped<K: Resource + Clone>(obj: &K, req: &AdmissionRequest<K>) -> K {
    let mut obj = obj.clone();
    if obj.meta().namespace.is_none() {
        obj.meta_mut().namespace = req.namespace.clone();
    }
    obj
}

fn parse_request<K: Resource>(
    body: AdmissionReview<K>,
) -> Result<AdmissionRequest<K>, AdmissionResponse> {
    let req: Result<AdmissionRequest<K>, _> = body.try_into();
    req.map_err(|e| {
        error!(error = %e, "Failed to parse admission request");
        AdmissionResponse::invalid(e.to_string())
    })
}

/// Mutating admission handler
pub async fn mutate_handler<V: AdmissionValidator>(
    State(validator): State<Arc<V>>,
    Json(body): Json<AdmissionReview<V::Resource>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req = match parse_request(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp.into_review()),
    };
    Json(mutate(validator.as_ref(), &req).into_review())
}

fn mutate<V: AdmissionValidator>(
    validator: &V,
    req: &AdmissionRequest<V::Resource>,
) -> AdmissionResponse {
    let Some(obj) = &req.object else {
        return AdmissionResponse::from(req);
    };

    let mut defaulted = obj.clone();
    validator.apply_defaults(&mut defaulted);

    let patch = match (serde_json::to_value(obj), serde_json::to_value(&defaulted)) {
        (Ok(before), Ok(after)) => json_patch::diff(&before, &after),
        (Err(e), _) | (_, Err(e)) => {
            error!(uid = %req.uid, error = %e, "Failed to serialize object for defaulting");
            return AdmissionResponse::from(req).deny(format!("serialization error: {e}"));
        }
    };

    if patch.0.is_empty() {
        debug!(uid = %req.uid, name = %req.name, "No defaults to apply");
        return AdmissionResponse::from(req);
    }

    info!(uid = %req.uid, name = %req.name, ops = patch.0.len(), "Applying defaults");
    match AdmissionResponse::from(req).with_patch(patch) {
        Ok(resp) => resp,
        Err(e) => {
            error!(uid = %req.uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(req).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Validating admission handler
pub async fn validate_handler<V: AdmissionValidator>(
    State(validator): State<Arc<V>>,
    Json(body): Json<AdmissionReview<V::Resource>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req = match parse_request(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp.into_review()),
    };
    Json(validate(validator.as_ref(), &req).await.into_review())
}

async fn validate<V: AdmissionValidator>(
    validator: &V,
    req: &AdmissionRequest<V::Resource>,
) -> AdmissionResponse {
    let result = match (&req.operation, &req.object, &req.old_object) {
        (Operation::Create, Some(obj), _) => validator.validate_create(&scoped(obj, req)).await,
        (Operation::Update, Some(obj), Some(old)) => {
            validator
                .validate_update(&scoped(old, req), &scoped(obj, req))
                .await
        }
        (Operation::Delete, _, Some(old)) => validator.validate_delete(&scoped(old, req)).await,
        _ => Ok(Vec::new()),
    };

    let mut resp = AdmissionResponse::from(req);
    match result {
        Ok(warnings) => {
            debug!(uid = %req.uid, name = %req.name, operation = ?req.operation, "Admission allowed");
            if !warnings.is_empty() {
                resp.warnings = Some(warnings);
            }
            resp
        }
        Err(e) => {
            warn!(uid = %req.uid, name = %req.name, operation = ?req.operation, error = %e, "Admission denied");
            resp.deny(e.to_string())
        }
    }
}

fn mutating_routes<V: AdmissionValidator>(path: &str, validator: Arc<V>) -> Router {
    Router::new()
        .route(&format!("/mutate/{path}"), post(mutate_handler::<V>))
        .with_state(validator)
}

fn validating_routes<V: AdmissionValidator>(path: &str, validator: Arc<V>) -> Router {
    Router::new()
        .route(&format!("/validate/{path}"), post(validate_handler::<V>))
        .with_state(validator)
}

/// Router serving every admission endpoint
pub fn webhook_router(store: Arc<dyn ResourceStore>, feed_group: FeedGroupRef) -> Router {
    let sources = Arc::new(SourceValidator::new(store.clone()));
    let hotnews = Arc::new(HotNewsValidator::new(store.clone(), feed_group.clone()));
    let feed_groups = Arc::new(FeedGroupValidator::new(store, feed_group));

    Router::new()
        .merge(mutating_routes("sources", sources.clone()))
        .merge(validating_routes("sources", sources))
        .merge(mutating_routes("hotnews", hotnews.clone()))
        .merge(validating_routes("hotnews", hotnews))
        .merge(validating_routes("configmaps", feed_groups))
}

/// Serve the admission endpoints over TLS until the server fails.
pub async fn run_webhook_server(
    router: Router,
    port: u16,
    cert_dir: &Path,
) -> Result<(), WebhookError> {
    let cert = cert_dir.join("tls.crt");
    let key = cert_dir.join("tls.key");
    let tls = RustlsConfig::from_pem_file(&cert, &key)
        .await
        .map_err(|source| WebhookError::Tls {
            path: cert_dir.display().to_string(),
            source,
        })?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, cert_dir = %cert_dir.display(), "Admission webhook server listening");

    axum_server::bind_rustls(addr, tls)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}
