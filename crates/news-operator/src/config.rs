//! Operator configuration and well-known names

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Command line / environment configuration for the operator
#[derive(Clone, Debug, Parser)]
#[command(name = "news-operator", about = "Reconciles news Sources and HotNews queries")]
pub struct OperatorConfig {
    /// Aggregation service endpoint for Source CRUD
    #[arg(long, env = "SOURCE_SERVICE_URL")]
    pub source_service_url: String,

    /// Aggregation service endpoint for article queries
    #[arg(long, env = "ARTICLE_SERVICE_URL")]
    pub article_service_url: String,

    /// Namespace of the feed-group ConfigMap
    #[arg(long, env = "FEED_GROUP_NAMESPACE", default_value = "default")]
    pub feed_group_namespace: String,

    /// Name of the feed-group ConfigMap
    #[arg(long, env = "FEED_GROUP_NAME", default_value = "feed-group-source")]
    pub feed_group_name: String,

    /// Timeout for each call to the aggregation service
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 5)]
    pub http_timeout_secs: u64,

    /// Resync interval for HotNews article summaries
    #[arg(long, env = "HOTNEWS_RESYNC_SECS", default_value_t = 300)]
    pub hotnews_resync_secs: u64,

    /// HTTPS port for the admission webhooks
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 9443)]
    pub webhook_port: u16,

    /// Directory holding tls.crt and tls.key for the webhook server
    #[arg(
        long,
        env = "WEBHOOK_CERT_DIR",
        default_value = "/tmp/k8s-webhook-server/serving-certs"
    )]
    pub webhook_cert_dir: PathBuf,

    /// Serve admission webhooks
    #[arg(long, env = "ENABLE_WEBHOOKS", default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_webhooks: bool,

    /// Port for /healthz and /readyz
    #[arg(long, env = "HEALTH_PORT", default_value_t = crate::health::DEFAULT_HEALTH_PORT)]
    pub health_port: u16,
}

impl OperatorConfig {
    pub fn feed_group(&self) -> FeedGroupRef {
        FeedGroupRef {
            namespace: self.feed_group_namespace.clone(),
            name: self.feed_group_name.clone(),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn hotnews_resync(&self) -> Duration {
        Duration::from_secs(self.hotnews_resync_secs)
    }
}

/// Location of the feed-group ConfigMap
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedGroupRef {
    pub namespace: String,
    pub name: String,
}

impl FeedGroupRef {
    /// Whether the given object identity is the configured ConfigMap.
    pub fn matches(&self, namespace: Option<&str>, name: Option<&str>) -> bool {
        namespace == Some(self.namespace.as_str()) && name == Some(self.name.as_str())
    }
}

/// Finalizers owned by the operator
pub mod finalizers {
    /// Held until the aggregation service record is deleted
    pub const SOURCE: &str = "source.newsaggregator.dev/finalizer";
    /// Held until owner references on Sources are cleaned up
    pub const HOTNEWS: &str = "hotnews.newsaggregator.dev/finalizer";
}
