//! Pinecone data-plane client (query only).
//!
//! Env:
//!   PINECONE_API_KEY     : required
//!   PINECONE_INDEX_HOST  : index host, e.g. "myindex-abc123.svc.us-east-1.pinecone.io"

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::ResourceError;
use crate::resources::{IndexMatch, VectorIndex};
use crate::util::trunc_for_log;

#[derive(Clone)]
pub struct PineconeIndex {
  client: reqwest::Client,
  api_key: String,
  pub host: String,
}

impl PineconeIndex {
  /// Construct the client if both env variables are present; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("PINECONE_API_KEY").ok()?;
    let host = std::env::var("PINECONE_INDEX_HOST").ok()?;
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(10))
      .build()
      .ok()?;
    Some(Self { client, api_key, host: normalize_host(&host) })
  }
}

fn normalize_host(host: &str) -> String {
  let h = host.trim().trim_end_matches('/');
  if h.starts_with("http://") || h.starts_with("https://") { h.to_string() } else { format!("https://{h}") }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
  #[instrument(level = "info", skip(self, vector), fields(dims = vector.len()))]
  async fn query(
    &self,
    namespace: &str,
    vector: Vec<f32>,
    top_k: usize,
  ) -> Result<Vec<IndexMatch>, ResourceError> {
    let url = format!("{}/query", self.host);
    let req = QueryRequest { namespace, vector, top_k, include_metadata: true };

    let start = std::time::Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "quiz-tutor-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("Api-Key", &self.api_key)
      .header("X-Pinecone-API-Version", "2024-07")
      .json(&req).send().await
      .map_err(|e| ResourceError::Query(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      return Err(ResourceError::Query(format!("Pinecone HTTP {}: {}", status, trunc_for_log(&body, 300))));
    }

    let body: QueryResponse = res.json().await.map_err(|e| ResourceError::Query(e.to_string()))?;
    info!(elapsed = ?start.elapsed(), matches = body.matches.len(), "Pinecone query done");
    Ok(body.matches.into_iter().map(Into::into).collect())
  }
}

// --- Query DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
  namespace: &'a str,
  vector: Vec<f32>,
  top_k: usize,
  include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
  #[serde(default)] matches: Vec<MatchResp>,
}

#[derive(Deserialize)]
struct MatchResp {
  id: String,
  #[serde(default)] score: f32,
  #[serde(default)] metadata: Option<HashMap<String, serde_json::Value>>,
}

impl From<MatchResp> for IndexMatch {
  fn from(m: MatchResp) -> Self {
    IndexMatch { id: m.id, score: m.score, metadata: m.metadata.unwrap_or_default() }
  }
}
