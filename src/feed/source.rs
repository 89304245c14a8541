use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, DATE};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use super::FeedEnvelope;
use crate::clock::parse_http_date;
use crate::logging::ts_epoch_ms;

/// Result of one read of the sample store.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched {
        envelope: FeedEnvelope,
        /// Server clock from the response, when the transport carries one.
        server_date: Option<f64>,
    },
    Failed(String),
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    fn describe(&self) -> String;
    async fn fetch(&self) -> FetchOutcome;
}

/// Remote store read over HTTP with a cache-busting query parameter.
pub struct HttpFeed {
    client: Client,
    url: Url,
}

impl HttpFeed {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            url: Url::parse(url)?,
        })
    }

    /// URL for a single request, `t=<epoch ms>` appended.
    pub fn busted_url(&self, epoch_ms: u64) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("t", &epoch_ms.to_string());
        url
    }

    async fn fetch_inner(&self) -> Result<(FeedEnvelope, Option<f64>)> {
        let resp = self
            .client
            .get(self.busted_url(ts_epoch_ms()))
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?;

        if !resp.status().is_success() {
            bail!("status {}", resp.status());
        }

        let server_date = resp
            .headers()
            .get(DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);

        let body = resp.text().await?;
        Ok((FeedEnvelope::parse(&body)?, server_date))
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    async fn fetch(&self) -> FetchOutcome {
        match self.fetch_inner().await {
            Ok((envelope, server_date)) => FetchOutcome::Fetched {
                envelope,
                server_date,
            },
            Err(e) => FetchOutcome::Failed(e.to_string()),
        }
    }
}

/// Store read straight from the local filesystem (same host as the updater).
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FeedSource for FileFeed {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> FetchOutcome {
        let body = match tokio::fs::read_to_string(&self.path).await {
            Ok(b) => b,
            Err(e) => return FetchOutcome::Failed(e.to_string()),
        };
        match FeedEnvelope::parse(&body) {
            Ok(envelope) => FetchOutcome::Fetched {
                envelope,
                server_date: None,
            },
            Err(e) => FetchOutcome::Failed(e.to_string()),
        }
    }
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

pub fn source_for(location: &str) -> Result<Arc<dyn FeedSource>> {
    if is_remote(location) {
        Ok(Arc::new(HttpFeed::new(location)?))
    } else {
        Ok(Arc::new(FileFeed::new(location)))
    }
}

/// Whole body of a URL or file, used for side documents like the lexicon.
pub async fn read_location(location: &str) -> Result<String> {
    if is_remote(location) {
        let resp = Client::new().get(location).send().await?;
        if !resp.status().is_success() {
            bail!("status {}", resp.status());
        }
        Ok(resp.text().await?)
    } else {
        Ok(tokio::fs::read_to_string(location).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cache_buster_keeps_existing_query() {
        let feed = HttpFeed::new("https://example.org/bitcoin.json?v=2").unwrap();
        let url = feed.busted_url(1234);
        assert_eq!(url.as_str(), "https://example.org/bitcoin.json?v=2&t=1234");
    }

    #[test]
    fn picks_source_by_scheme() {
        assert!(is_remote("http://x/y.json"));
        assert!(!is_remote("./bitcoin.json"));
        assert!(source_for("not a url://").is_ok());
    }

    #[tokio::test]
    async fn file_feed_reads_and_reports_failures() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"meta":{{"updated_at":1000,"interval":60}},"prices":[{{"ts":940,"value":100}},{{"ts":1000,"value":110}}]}}"#).unwrap();

        match FileFeed::new(f.path()).fetch().await {
            FetchOutcome::Fetched { envelope, server_date } => {
                assert_eq!(envelope.samples().len(), 2);
                assert!(server_date.is_none());
            }
            FetchOutcome::Failed(e) => panic!("unexpected failure: {}", e),
        }

        let missing = FileFeed::new(f.path().with_extension("missing"));
        assert!(matches!(missing.fetch().await, FetchOutcome::Failed(_)));
    }
}
