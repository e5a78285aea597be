//! Knowledge-service implementations used to enrich translation diagnostics.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::KnowledgeService;
use crate::error::Result;

/// Separator between concatenated search results.
const RESULT_SEPARATOR: &str = "\n---\n";

/// Knowledge service that never returns context.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKnowledge;

#[async_trait]
impl KnowledgeService for NoKnowledge {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<String> {
        Ok(String::new())
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(alias = "content", alias = "snippet")]
    text: String,
}

/// Documentation search over HTTP.
///
/// POSTs `{"query", "limit"}` to the endpoint and expects
/// `{"results": [{"text": ...}, ...]}` back.
pub struct HttpKnowledgeService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpKnowledgeService {
    /// Create a client for the given search endpoint.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl KnowledgeService for HttpKnowledgeService {
    async fn search(&self, query: &str, top_k: usize) -> Result<String> {
        let response: SearchResponse = self
            .client
            .post(&self.endpoint)
            .json(&SearchRequest {
                query,
                limit: top_k,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(join_results(response, top_k))
    }
}

fn join_results(response: SearchResponse, top_k: usize) -> String {
    response
        .results
        .into_iter()
        .take(top_k)
        .map(|hit| hit.text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(RESULT_SEPARATOR)
}
