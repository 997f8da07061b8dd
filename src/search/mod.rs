//! Web search used to ground market and competitor prompts.
//!
//! Search is optional. When it is not configured, or a call fails, the wizard stores
//! an empty research result and prompts fall back to a "no results" placeholder.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::SearchError;

pub const GOOGLE_SEARCH_BASE: &str = "https://www.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;
}

pub type DynSearcher = Box<dyn Searcher + Send + Sync>;

/// Google Programmable Search (Custom Search JSON API).
pub struct GoogleSearch {
    client: Client,
    api_key: String,
    cx: String,
    base: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: String,
}

impl GoogleSearch {
    pub fn new(
        api_key: impl Into<String>,
        cx: impl Into<String>,
        base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Transport(e.to_string()))?;
        Ok(Self { client, api_key: api_key.into(), cx: cx.into(), base: base.into() })
    }

    /// Reads `GOOGLE_SEARCH_API_KEY` and `GOOGLE_SEARCH_CX`. `None` when either is unset.
    pub fn from_env(base: &str, timeout: Duration) -> Option<Self> {
        let key = std::env::var("GOOGLE_SEARCH_API_KEY").ok().filter(|v| !v.is_empty())?;
        let cx = std::env::var("GOOGLE_SEARCH_CX").ok().filter(|v| !v.is_empty())?;
        Self::new(key, cx, base, timeout).ok()
    }
}

#[async_trait]
impl Searcher for GoogleSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!("{}/customsearch/v1", self.base.trim_end_matches('/'));
        // the API rejects num outside 1..=10
        let num = max_results.clamp(1, 10).to_string();
        tracing::debug!(%query, %num, "web search");

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| SearchError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(SearchError::Service { status: status.as_u16(), body: text });
        }

        let parsed: SearchResponse =
            serde_json::from_str(&text).map_err(|e| SearchError::Decode(e.to_string()))?;
        Ok(parsed
            .items
            .into_iter()
            .take(max_results)
            .map(|i| SearchHit { title: i.title, snippet: i.snippet, url: i.link })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(base: &str) -> GoogleSearch {
        GoogleSearch::new("k", "cx1", base, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn returns_hits() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/customsearch/v1")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("key".into(), "k".into()),
                Matcher::UrlEncoded("cx".into(), "cx1".into()),
                Matcher::UrlEncoded("num".into(), "10".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"items":[{"title":"A","snippet":"sa","link":"https://a"},{"title":"B","snippet":"sb","link":"https://b"}]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let hits = client(&server.url()).search("widgets market", 25).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], SearchHit { title: "A".into(), snippet: "sa".into(), url: "https://a".into() });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_items_is_empty() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/customsearch/v1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"searchInformation":{"totalResults":"0"}}"#)
            .create_async()
            .await;

        let hits = client(&server.url()).search("nothing", 3).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn service_error_keeps_status() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/customsearch/v1")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("quota")
            .create_async()
            .await;

        let err = client(&server.url()).search("q", 3).await.unwrap_err();
        assert!(matches!(err, SearchError::Service { status: 403, .. }));
    }
}
