//! HTTP client for the article aggregation service
//!
//! # Source endpoints
//!
//! ```text
//! POST   {source_url}        body: Source spec  ->  200 {"id": 42, ...}
//! PUT    {source_url}/{id}   body: Source spec  ->  200
//! DELETE {source_url}/{id}                      ->  200
//! ```
//!
//! # Article query
//!
//! ```text
//! GET {article_url}?keywords=a,b&date_start=2023-09-01&date_end=2023-09-10&sources=s1,s2
//!     -> 200 [{"Id": .., "Title": .., "Description": .., "Link": .., "Source": .., "PubDate": ..}]
//! ```
//!
//! Any status other than 200 is a failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::source::SourceSpec;

/// Operations against the aggregation service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AggregatorClient: Send + Sync {
    /// Register a source, returning the id assigned by the service
    async fn create_source(&self, spec: &SourceSpec) -> Result<i64, ClientError>;

    async fn update_source(&self, id: i64, spec: &SourceSpec) -> Result<(), ClientError>;

    async fn delete_source(&self, id: i64) -> Result<(), ClientError>;

    async fn fetch_articles(&self, query: &ArticleQuery) -> Result<ArticleSummary, ClientError>;
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid service URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("aggregation service returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Article as returned by the aggregation service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Article {
    #[serde(default)]
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub pub_date: String,
}

/// Parameters of an article search
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArticleQuery {
    pub keywords: Vec<String>,
    pub date_start: Option<String>,
    pub date_end: Option<String>,
    pub sources: Vec<String>,
}

/// Result of an article search
#[derive(Clone, Debug, PartialEq)]
pub struct ArticleSummary {
    /// Full request URL, recorded as the HotNews news link
    pub request_url: String,
    pub articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct CreatedSource {
    id: i64,
}

/// Encode a list as one comma-separated query value, keeping the commas literal.
fn encode_list<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| url::form_urlencoded::byte_serialize(v.as_ref().as_bytes()).collect::<String>())
        .collect::<Vec<_>>()
        .join(",")
}

fn encode_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Build the article query URL. Empty parameters are omitted.
pub fn article_query_url(base: &Url, query: &ArticleQuery) -> Url {
    let mut params: Vec<String> = Vec::new();
    if !query.keywords.is_empty() {
        params.push(format!("keywords={}", encode_list(&query.keywords)));
    }
    if let Some(start) = query.date_start.as_deref().filter(|s| !s.is_empty()) {
        params.push(format!("date_start={}", encode_value(start)));
    }
    if let Some(end) = query.date_end.as_deref().filter(|s| !s.is_empty()) {
        params.push(format!("date_end={}", encode_value(end)));
    }
    if !query.sources.is_empty() {
        params.push(format!("sources={}", encode_list(&query.sources)));
    }

    let mut url = base.clone();
    if params.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&params.join("&")));
    }
    url
}

/// [`AggregatorClient`] speaking HTTP/JSON
pub struct HttpAggregatorClient {
    http: reqwest::Client,
    source_url: Url,
    article_url: Url,
}

impl HttpAggregatorClient {
    pub fn new(source_url: &str, article_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let source_url = Url::parse(source_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{source_url}: {e}")))?;
        let article_url = Url::parse(article_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{article_url}: {e}")))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            source_url,
            article_url,
        })
    }

    /// `{source_url}/{id}`
    fn source_item_url(&self, id: i64) -> Result<Url, ClientError> {
        let mut url = self.source_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.source_url.to_string()))?
            .pop_if_empty()
            .push(&id.to_string());
        Ok(url)
    }

    async fn ensure_ok(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status != StatusCode::OK {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl AggregatorClient for HttpAggregatorClient {
    #[instrument(skip(self, spec), fields(short_name = %spec.short_name))]
    async fn create_source(&self, spec: &SourceSpec) -> Result<i64, ClientError> {
        let response = self
            .http
            .post(self.source_url.clone())
            .json(spec)
            .send()
            .await?;
        let response = Self::ensure_ok(response).await?;

        let body: CreatedSource = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("create response: {e}")))?;

        debug!(id = body.id, "Source registered with aggregation service");
        Ok(body.id)
    }

    #[instrument(skip(self, spec), fields(short_name = %spec.short_name))]
    async fn update_source(&self, id: i64, spec: &SourceSpec) -> Result<(), ClientError> {
        let response = self
            .http
            .put(self.source_item_url(id)?)
            .json(spec)
            .send()
            .await?;
        Self::ensure_ok(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_source(&self, id: i64) -> Result<(), ClientError> {
        let response = self.http.delete(self.source_item_url(id)?).send().await?;

        // Already gone on the service side
        if response.status() == StatusCode::NOT_FOUND {
            debug!(id, "Source not found on aggregation service, treating as deleted");
            return Ok(());
        }

        Self::ensure_ok(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_articles(&self, query: &ArticleQuery) -> Result<ArticleSummary, ClientError> {
        let url = article_query_url(&self.article_url, query);
        let request_url = url.to_string();

        let response = self.http.get(url).send().await?;
        let response = Self::ensure_ok(response).await?;

        let articles: Vec<Article> = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("articles response: {e}")))?;

        debug!(count = articles.len(), url = %request_url, "Fetched articles");
        Ok(ArticleSummary {
            request_url,
            articles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://aggregator:8080/articles").unwrap()
    }

    #[test]
    fn test_query_url_with_all_params() {
        let query = ArticleQuery {
            keywords: vec!["rust".to_string(), "k8s".to_string()],
            date_start: Some("2023-09-01".to_string()),
            date_end: Some("2023-09-10".to_string()),
            sources: vec!["hn".to_string(), "lwn".to_string()],
        };

        assert_eq!(
            article_query_url(&base(), &query).as_str(),
            "http://aggregator:8080/articles?keywords=rust,k8s&date_start=2023-09-01&date_end=2023-09-10&sources=hn,lwn"
        );
    }

    #[test]
    fn test_query_url_omits_empty_params() {
        let query = ArticleQuery {
            keywords: vec!["rust".to_string()],
            date_start: Some(String::new()),
            ..Default::default()
        };

        assert_eq!(
            article_query_url(&base(), &query).as_str(),
            "http://aggregator:8080/articles?keywords=rust"
        );
    }

    #[test]
    fn test_query_url_escapes_separators_inside_values() {
        let query = ArticleQuery {
            keywords: vec!["a&b".to_string(), "c d".to_string()],
            ..Default::default()
        };

        assert_eq!(
            article_query_url(&base(), &query).as_str(),
            "http://aggregator:8080/articles?keywords=a%26b,c+d"
        );
    }

    #[test]
    fn test_source_item_url() {
        let client = HttpAggregatorClient::new(
            "http://aggregator:8080/sources/",
            "http://aggregator:8080/articles",
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            client.source_item_url(42).unwrap().as_str(),
            "http://aggregator:8080/sources/42"
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = HttpAggregatorClient::new("not a url", "http://a/", Duration::from_secs(5));
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }

    #[test]
    fn test_article_decodes_pascal_case() {
        let json = r#"{"Id": 7, "Title": "Rust 2.0", "Description": "", "Link": "https://x", "Source": "hn", "PubDate": "2023-09-02"}"#;
        let article: Article = serde_json::from_str(json).unwrap();
        assert_eq!(article.id, 7);
        assert_eq!(article.title, "Rust 2.0");
        assert_eq!(article.pub_date, "2023-09-02");
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Api {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "aggregation service returned 503: unavailable"
        );
    }
}
