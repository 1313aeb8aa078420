//! HotNews controller
//!
//! Each pass resolves the HotNews feed groups against the feed-group
//! ConfigMap, links the matching Sources through owner references, queries
//! the aggregation service and writes an article summary to the status.
//!
//! The controller is also triggered by:
//! - Source changes, for HotNews that query the Source directly or via a feed group
//! - feed-group ConfigMap changes, for HotNews whose feed groups resolve in the
//!   new data or in the data seen on the previous event
//!
//! Deleting a HotNews strips its owner references from all Sources in the
//! namespace before the finalizer is released.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::watcher::{watcher, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::Client as KubeClient;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::client::{ArticleQuery, ClientError};
use crate::condition::{reasons, set_condition, Condition, ConditionType};
use crate::config::finalizers;
use crate::feedgroup::{config_data, effective_sources};
use crate::hotnews::{HotNews, HotNewsStatus};
use crate::mapping::{hotnews_for_feed_groups, hotnews_for_source};
use crate::source::Source;
use crate::store::StoreError;

use super::owner::{link_sources, unlink_sources};
use super::retry::{compute_backoff, ErrorKind};
use super::{add_finalizer, has_finalizer, remove_finalizer, retry_key, ControllerContext};

#[derive(Debug, Error)]
pub enum HotNewsError {
    #[error("feed-group ConfigMap {namespace}/{name} not found")]
    ConfigMapNotFound { namespace: String, name: String },
    #[error("failed to link sources: {0}")]
    OwnerReference(#[source] StoreError),
    #[error("failed to fetch articles: {0}")]
    FetchArticles(#[from] ClientError),
    #[error("failed to update status: {0}")]
    UpdateStatus(#[source] StoreError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Build the summary written to the status from a fetch result.
fn summarize(
    request_url: String,
    titles: impl Iterator<Item = String>,
    count: usize,
    limit: usize,
    conditions: Vec<Condition>,
) -> HotNewsStatus {
    HotNewsStatus {
        articles_count: count,
        news_link: request_url,
        articles_titles: titles.take(limit).collect(),
        conditions,
    }
}

/// Record a failed pass on the status and hand back `error`.
async fn fail(
    ctx: &ControllerContext,
    mut hotnews: HotNews,
    condition_type: ConditionType,
    reason: &str,
    error: HotNewsError,
) -> HotNewsError {
    warn!(reason = %reason, error = %error, "HotNews reconciliation step failed");
    let status = hotnews.status.get_or_insert_with(Default::default);
    set_condition(
        &mut status.conditions,
        Condition::new(condition_type, false, reason, &error.to_string()),
    );
    match ctx.store.replace_hotnews_status(&hotnews).await {
        Ok(_) => error,
        Err(e) => HotNewsError::UpdateStatus(e),
    }
}

/// Normal reconcile path for a HotNews that is not being deleted.
async fn reconcile_hotnews(ctx: &ControllerContext, hotnews: HotNews) -> Result<(), HotNewsError> {
    let namespace = hotnews
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| HotNewsError::MissingField("metadata.namespace".to_string()))?;
    let conditions = hotnews
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    let condition_type = ConditionType::next(&conditions);
    let target = &ctx.feed_group;

    let cm = match ctx.store.get_config_map(&target.namespace, &target.name).await {
        Ok(Some(cm)) => cm,
        Ok(None) => {
            let err = HotNewsError::ConfigMapNotFound {
                namespace: target.namespace.clone(),
                name: target.name.clone(),
            };
            return Err(fail(ctx, hotnews, condition_type, reasons::CONFIG_MAP_NOT_FOUND, err).await);
        }
        Err(e) => {
            return Err(fail(ctx, hotnews, condition_type, reasons::CONFIG_MAP_NOT_FOUND, e.into()).await);
        }
    };

    let sources = effective_sources(
        &hotnews.spec.sources,
        &hotnews.spec.feed_groups,
        config_data(&cm),
    );
    debug!(sources = ?sources, "Resolved effective sources");

    if let Err(e) = link_sources(ctx.store.as_ref(), &namespace, &hotnews, &sources).await {
        let err = HotNewsError::OwnerReference(e);
        return Err(fail(ctx, hotnews, condition_type, reasons::OWNER_REFERENCE_FAILED, err).await);
    }

    let query = ArticleQuery {
        keywords: hotnews.spec.keywords.clone(),
        date_start: hotnews.spec.date_start.clone(),
        date_end: hotnews.spec.date_end.clone(),
        sources,
    };
    let summary = match ctx.aggregator.fetch_articles(&query).await {
        Ok(summary) => summary,
        Err(e) => {
            return Err(fail(ctx, hotnews, condition_type, reasons::FETCH_ARTICLES_FAILED, e.into()).await);
        }
    };

    let count = summary.articles.len();
    let mut status = summarize(
        summary.request_url,
        summary.articles.into_iter().map(|a| a.title),
        count,
        hotnews.spec.titles_count(),
        conditions,
    );
    set_condition(
        &mut status.conditions,
        Condition::new(
            condition_type,
            true,
            reasons::RECONCILED,
            &format!("{count} articles found"),
        ),
    );

    let mut updated = hotnews;
    updated.status = Some(status);
    if let Err(e) = ctx.store.replace_hotnews_status(&updated).await {
        let err = HotNewsError::UpdateStatus(e);
        return Err(fail(ctx, updated, condition_type, reasons::UPDATE_STATUS_FAILED, err).await);
    }

    info!(articles = count, "HotNews summary updated");
    Ok(())
}

/// Release owner references on Sources, then the finalizer.
async fn finalize(ctx: &ControllerContext, mut hotnews: HotNews) -> Result<Action, HotNewsError> {
    if !has_finalizer(&hotnews.metadata, finalizers::HOTNEWS) {
        return Ok(Action::await_change());
    }
    let namespace = hotnews
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| HotNewsError::MissingField("metadata.namespace".to_string()))?;

    if let Some(uid) = hotnews.metadata.uid.as_deref() {
        let removed = unlink_sources(ctx.store.as_ref(), &namespace, uid).await?;
        info!(removed, "Removed owner references from Sources");
    }

    remove_finalizer(&mut hotnews.metadata, finalizers::HOTNEWS);
    ctx.store.replace_hotnews(&hotnews).await?;
    Ok(Action::await_change())
}

/// Reconcile a single HotNews
#[instrument(
    skip(ctx, hotnews),
    fields(
        name = %hotnews.metadata.name.as_deref().unwrap_or("unknown"),
        namespace = %hotnews.metadata.namespace.as_deref().unwrap_or("default")
    )
)]
pub async fn reconcile(
    hotnews: Arc<HotNews>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, HotNewsError> {
    let name = hotnews
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| HotNewsError::MissingField("metadata.name".to_string()))?;
    let namespace = hotnews
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| HotNewsError::MissingField("metadata.namespace".to_string()))?;

    let key = retry_key(&hotnews.metadata);

    let Some(mut hotnews) = ctx.store.get_hotnews(namespace, name).await? else {
        debug!("HotNews no longer exists");
        ctx.retry_tracker.reset(&key);
        return Ok(Action::await_change());
    };

    if hotnews.metadata.deletion_timestamp.is_some() {
        let action = finalize(&ctx, hotnews).await?;
        ctx.retry_tracker.reset(&key);
        return Ok(action);
    }

    if add_finalizer(&mut hotnews.metadata, finalizers::HOTNEWS) {
        hotnews = ctx.store.replace_hotnews(&hotnews).await?;
        debug!("Added finalizer");
    }

    info!(
        keywords = ?hotnews.spec.keywords,
        feed_groups = ?hotnews.spec.feed_groups,
        "Reconciling HotNews"
    );
    reconcile_hotnews(&ctx, hotnews).await?;

    ctx.retry_tracker.reset(&key);
    Ok(Action::requeue(ctx.hotnews_resync))
}

fn classify_error(error: &HotNewsError) -> ErrorKind {
    match error {
        HotNewsError::Store(e) | HotNewsError::OwnerReference(e) | HotNewsError::UpdateStatus(e)
            if e.is_conflict() =>
        {
            ErrorKind::Conflict
        }
        HotNewsError::MissingField(_) => ErrorKind::Permanent,
        HotNewsError::FetchArticles(ClientError::InvalidUrl(_)) => ErrorKind::Permanent,
        // The ConfigMap may be created later; its watch also retriggers us
        HotNewsError::ConfigMapNotFound { .. } => ErrorKind::Transient,
        HotNewsError::OwnerReference(_)
        | HotNewsError::FetchArticles(_)
        | HotNewsError::UpdateStatus(_)
        | HotNewsError::Store(_) => ErrorKind::Transient,
    }
}

pub fn error_policy(
    hotnews: Arc<HotNews>,
    error: &HotNewsError,
    ctx: Arc<ControllerContext>,
) -> Action {
    let kind = classify_error(error);
    let attempt = ctx.retry_tracker.increment(&retry_key(&hotnews.metadata));

    warn!(
        name = %hotnews.metadata.name.as_deref().unwrap_or("unknown"),
        error = %error,
        attempt = attempt,
        error_kind = ?kind,
        "HotNews reconciliation failed"
    );

    compute_backoff(attempt, kind)
}

/// Start the HotNews controller
pub async fn run(client: KubeClient, ctx: Arc<ControllerContext>) {
    let hotnews: Api<HotNews> = Api::all(client.clone());
    let sources: Api<Source> = Api::all(client.clone());
    let target = ctx.feed_group.clone();
    let config_maps: Api<ConfigMap> = Api::namespaced(client, &target.namespace);

    // Feed-group ConfigMap cache, read by the Source mapper
    let (feed_groups, writer) = reflector::store::<ConfigMap>();
    let feed_group_events = watcher(
        config_maps,
        WatcherConfig::default().fields(&format!("metadata.name={}", target.name)),
    )
    .default_backoff()
    .reflect(writer)
    .touched_objects();

    let controller = Controller::new(hotnews, WatcherConfig::default());
    let hotnews_cache = controller.store();

    let source_mapper = {
        let hotnews_cache = hotnews_cache.clone();
        let cm_ref = ObjectRef::<ConfigMap>::new(&target.name).within(&target.namespace);
        move |source: Source| {
            let cm = feed_groups.get(&cm_ref);
            hotnews_for_source(&source, &hotnews_cache.state(), cm.as_deref().map(config_data))
        }
    };
    // Data from the previous ConfigMap event, so removed groups still map
    let last_feed_groups: Mutex<Option<BTreeMap<String, String>>> = Mutex::new(None);
    let config_map_mapper = move |cm: ConfigMap| {
        let mut last = last_feed_groups.lock().unwrap_or_else(|e| e.into_inner());
        let refs = hotnews_for_feed_groups(&cm, &target, &hotnews_cache.state(), last.as_ref());
        if target.matches(cm.metadata.namespace.as_deref(), cm.metadata.name.as_deref()) {
            *last = Some(config_data(&cm).clone());
        }
        refs
    };

    info!("Starting HotNews controller");

    controller
        .watches(sources, WatcherConfig::default(), source_mapper)
        .watches_stream(feed_group_events, config_map_mapper)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!(name = %obj.name, "HotNews reconciled");
                }
                Err(e) => {
                    warn!(error = %e, "HotNews controller error");
                }
            }
        })
        .await;
}
