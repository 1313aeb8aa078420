//! Source controller
//!
//! Mirrors each Source into the aggregation service:
//!
//! - `status.id == 0`: POST the spec and record the assigned id
//! - `status.id != 0`: PUT the spec to `{service}/{id}`
//! - deletion: DELETE `{service}/{id}`, then release the finalizer
//!
//! Every attempt, successful or not, leaves a condition on the status.

use std::sync::Arc;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::Client as KubeClient;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::client::ClientError;
use crate::condition::{reasons, set_condition, Condition, ConditionType};
use crate::config::finalizers;
use crate::source::Source;
use crate::store::StoreError;

use super::retry::{compute_backoff, ErrorKind};
use super::{add_finalizer, has_finalizer, remove_finalizer, retry_key, ControllerContext};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("aggregation service error: {0}")]
    Client(#[from] ClientError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Record a condition and persist the status, returning the stored object.
async fn write_condition(
    ctx: &ControllerContext,
    mut source: Source,
    condition: Condition,
) -> Result<Source, SourceError> {
    let status = source.status.get_or_insert_with(Default::default);
    set_condition(&mut status.conditions, condition);
    Ok(ctx.store.replace_source_status(&source).await?)
}

/// Register a Source that has no aggregator id yet.
async fn create(
    ctx: &ControllerContext,
    mut source: Source,
    condition_type: ConditionType,
) -> Result<(), SourceError> {
    match ctx.aggregator.create_source(&source.spec).await {
        Ok(id) => {
            info!(id, "Created source in aggregation service");
            source.status.get_or_insert_with(Default::default).id = id;
            let condition = Condition::new(
                condition_type,
                true,
                reasons::SUCCESSFUL_CREATION,
                &format!("Source registered with id {id}"),
            );
            write_condition(ctx, source, condition).await?;
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Failed to create source in aggregation service");
            let condition =
                Condition::new(condition_type, false, reasons::FAILED_CREATION, &e.to_string());
            write_condition(ctx, source, condition).await?;
            Err(e.into())
        }
    }
}

/// Push the current spec for an already registered Source.
async fn update(
    ctx: &ControllerContext,
    source: Source,
    id: i64,
    condition_type: ConditionType,
) -> Result<(), SourceError> {
    let mut spec = source.spec.clone();
    spec.id = id;

    match ctx.aggregator.update_source(id, &spec).await {
        Ok(()) => {
            debug!(id, "Updated source in aggregation service");
            let condition = Condition::new(
                condition_type,
                true,
                reasons::SUCCESSFUL_UPDATE,
                "Source synced to aggregation service",
            );
            write_condition(ctx, source, condition).await?;
            Ok(())
        }
        Err(e) => {
            warn!(id, error = %e, "Failed to update source in aggregation service");
            let condition =
                Condition::new(condition_type, false, reasons::FAILED_UPDATE, &e.to_string());
            write_condition(ctx, source, condition).await?;
            Err(e.into())
        }
    }
}

/// Delete the aggregator record and release the finalizer.
async fn finalize(ctx: &ControllerContext, mut source: Source) -> Result<Action, SourceError> {
    if !has_finalizer(&source.metadata, finalizers::SOURCE) {
        return Ok(Action::await_change());
    }

    let id = source.external_id();
    if id != 0 {
        ctx.aggregator.delete_source(id).await?;
        info!(id, "Deleted source from aggregation service");
    } else {
        debug!("Source was never registered, nothing to delete");
    }

    remove_finalizer(&mut source.metadata, finalizers::SOURCE);
    ctx.store.replace_source(&source).await?;
    Ok(Action::await_change())
}

/// Reconcile a single Source
#[instrument(
    skip(ctx, source),
    fields(
        name = %source.metadata.name.as_deref().unwrap_or("unknown"),
        namespace = %source.metadata.namespace.as_deref().unwrap_or("default")
    )
)]
pub async fn reconcile(source: Arc<Source>, ctx: Arc<ControllerContext>) -> Result<Action, SourceError> {
    let name = source
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| SourceError::MissingField("metadata.name".to_string()))?;
    let namespace = source
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| SourceError::MissingField("metadata.namespace".to_string()))?;

    let key = retry_key(&source.metadata);

    // Work from a fresh read, never from the watch cache
    let Some(mut source) = ctx.store.get_source(namespace, name).await? else {
        debug!("Source no longer exists");
        ctx.retry_tracker.reset(&key);
        return Ok(Action::await_change());
    };

    if source.metadata.deletion_timestamp.is_some() {
        let action = finalize(&ctx, source).await?;
        ctx.retry_tracker.reset(&key);
        return Ok(action);
    }

    if add_finalizer(&mut source.metadata, finalizers::SOURCE) {
        source = ctx.store.replace_source(&source).await?;
        debug!("Added finalizer");
    }

    let status = source.status.clone().unwrap_or_default();
    let condition_type = ConditionType::next(&status.conditions);

    info!(
        short_name = %source.spec.short_name,
        id = status.id,
        "Reconciling Source"
    );

    if status.id == 0 {
        create(&ctx, source, condition_type).await?;
    } else {
        update(&ctx, source, status.id, condition_type).await?;
    }

    ctx.retry_tracker.reset(&key);
    Ok(Action::await_change())
}

fn classify_error(error: &SourceError) -> ErrorKind {
    match error {
        SourceError::Store(e) if e.is_conflict() => ErrorKind::Conflict,
        SourceError::Store(StoreError::MissingField(_)) => ErrorKind::Permanent,
        SourceError::Client(ClientError::InvalidUrl(_)) => ErrorKind::Permanent,
        SourceError::Client(_) | SourceError::Store(_) => ErrorKind::Transient,
        SourceError::MissingField(_) => ErrorKind::Permanent,
    }
}

pub fn error_policy(source: Arc<Source>, error: &SourceError, ctx: Arc<ControllerContext>) -> Action {
    let kind = classify_error(error);
    let attempt = ctx.retry_tracker.increment(&retry_key(&source.metadata));

    warn!(
        name = %source.metadata.name.as_deref().unwrap_or("unknown"),
        error = %error,
        attempt = attempt,
        error_kind = ?kind,
        "Source reconciliation failed"
    );

    compute_backoff(attempt, kind)
}

/// Start the Source controller
pub async fn run(client: KubeClient, ctx: Arc<ControllerContext>) {
    let sources: Api<Source> = Api::all(client);

    info!("Starting Source controller");

    Controller::new(sources, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!(name = %obj.name, "Source reconciled");
                }
                Err(e) => {
                    warn!(error = %e, "Source controller error");
                }
            }
        })
        .await;
}
