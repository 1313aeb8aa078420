use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::Client;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use news_operator::client::HttpAggregatorClient;
use news_operator::config::OperatorConfig;
use news_operator::controllers::retry::RetryTracker;
use news_operator::controllers::{self, ControllerContext};
use news_operator::health::{run_health_server, HealthState};
use news_operator::store::{KubeStore, ResourceStore};
use news_operator::webhook::{run_webhook_server, webhook_router};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON formatting for production
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_current_span(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = OperatorConfig::parse();

    info!(
        source_service = %config.source_service_url,
        article_service = %config.article_service_url,
        feed_group_namespace = %config.feed_group_namespace,
        feed_group_name = %config.feed_group_name,
        webhooks = config.enable_webhooks,
        "news-operator starting"
    );

    let kube_client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    info!("Connected to Kubernetes cluster");

    let aggregator = HttpAggregatorClient::new(
        &config.source_service_url,
        &config.article_service_url,
        config.http_timeout(),
    )
    .context("Failed to create aggregation service client")?;

    let store: Arc<dyn ResourceStore> = Arc::new(KubeStore::new(kube_client.clone()));

    let ctx = Arc::new(ControllerContext {
        store: store.clone(),
        aggregator: Arc::new(aggregator),
        feed_group: config.feed_group(),
        hotnews_resync: config.hotnews_resync(),
        retry_tracker: Arc::new(RetryTracker::new()),
    });

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    let health = Arc::new(HealthState::new());
    let health_server = tokio::spawn(run_health_server(health.clone(), config.health_port));

    let webhook_server = if config.enable_webhooks {
        // Several crates link rustls; pick the provider explicitly
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let router = webhook_router(store, config.feed_group());
        let cert_dir = config.webhook_cert_dir.clone();
        let port = config.webhook_port;
        Some(tokio::spawn(async move {
            run_webhook_server(router, port, &cert_dir).await
        }))
    } else {
        info!("Admission webhooks disabled");
        None
    };

    info!("Starting controllers");
    let source = tokio::spawn(controllers::source::run(kube_client.clone(), ctx.clone()));
    let hotnews = tokio::spawn(controllers::hotnews::run(kube_client, ctx));
    health.mark_started();

    select! {
        result = source => {
            return handle_controller_exit("Source", result);
        }
        result = hotnews => {
            return handle_controller_exit("HotNews", result);
        }
        result = health_server => {
            return handle_server_exit("health", result.map(|r| r.map_err(anyhow::Error::from)));
        }
        result = wait_optional(webhook_server) => {
            return handle_server_exit("webhook", result.map(|r| r.map_err(anyhow::Error::from)));
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Await an optional task, pending forever when there is none
async fn wait_optional<T>(
    task: Option<JoinHandle<T>>,
) -> std::result::Result<T, tokio::task::JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Handle a controller task exit, returning an error to trigger pod restart
fn handle_controller_exit(
    name: &str,
    result: std::result::Result<(), tokio::task::JoinError>,
) -> Result<()> {
    match result {
        Ok(()) => {
            error!(controller = name, "Controller exited unexpectedly");
            bail!("{} controller exited unexpectedly", name)
        }
        Err(e) if e.is_panic() => {
            error!(controller = name, "Controller panicked");
            bail!("{} controller panicked: {:?}", name, e.into_panic())
        }
        Err(e) if e.is_cancelled() => {
            warn!(controller = name, "Controller was cancelled");
            bail!("{} controller was cancelled", name)
        }
        Err(e) => {
            error!(controller = name, error = ?e, "Controller task failed");
            bail!("{} controller task failed: {}", name, e)
        }
    }
}

/// Handle an HTTP server task exit; servers only return on failure
fn handle_server_exit(
    name: &str,
    result: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match result {
        Ok(Ok(())) => bail!("{} server exited unexpectedly", name),
        Ok(Err(e)) => {
            error!(server = name, error = %e, "Server failed");
            Err(e.context(format!("{name} server failed")))
        }
        Err(e) => {
            error!(server = name, error = ?e, "Server task failed");
            bail!("{} server task failed: {}", name, e)
        }
    }
}
