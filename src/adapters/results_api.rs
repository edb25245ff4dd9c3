//! HTTP client for the race results collector.

use crate::domain::race::RaceResult;
use crate::error::{Result, StewardError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Source of final race results.
///
/// `Ok(None)` means the collector does not know the race yet; the
/// caller decides whether to retry. A returned [`RaceResult`] may still
/// be empty, which means the race is known but not finished.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultsFetcher: Send + Sync {
    async fn fetch_result(&self, race_id: &str) -> Result<Option<RaceResult>>;
}

/// Fetches results over HTTP from the collector service.
#[derive(Clone)]
pub struct HttpResultsClient {
    http: Client,
    base_url: String,
}

impl HttpResultsClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .user_agent("steward-results-client/0.1")
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ResultsFetcher for HttpResultsClient {
    async fn fetch_result(&self, race_id: &str) -> Result<Option<RaceResult>> {
        let url = format!("{}/race/result", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("race_id", race_id)])
            .send()
            .await?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            debug!(race_id, "collector does not know this race yet");
            return Ok(None);
        }

        let text = resp.text().await?;
        if !status.is_success() {
            return Err(StewardError::TransientFetch(format!(
                "results API returned {status} for race {race_id}: {text}"
            )));
        }

        let mut result: RaceResult = serde_json::from_str(&text).map_err(|e| {
            StewardError::TransientFetch(format!(
                "invalid results payload for race {race_id}: {e}"
            ))
        })?;
        if result.race_id.is_empty() {
            result.race_id = race_id.to_string();
        }
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_trimmed() {
        let client = HttpResultsClient::new("http://localhost:8788///", 5).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8788");
    }
}
