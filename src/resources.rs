//! Semantic resource lookup: embed text, query the vector index, map the top
//! match's metadata into a `Resource`.
//!
//! Lookup is best-effort. Every failure is logged and reported as "no resource".

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::config::ResourceConfig;
use crate::domain::Resource;
use crate::error::ResourceError;

#[async_trait]
pub trait Embedder: Send + Sync {
  async fn embed(&self, text: &str) -> Result<Vec<f32>, ResourceError>;
}

/// One nearest-neighbour hit.
#[derive(Clone, Debug, Default)]
pub struct IndexMatch {
  pub id: String,
  pub score: f32,
  pub metadata: HashMap<String, serde_json::Value>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
  async fn query(
    &self,
    namespace: &str,
    vector: Vec<f32>,
    top_k: usize,
  ) -> Result<Vec<IndexMatch>, ResourceError>;
}

#[derive(Clone)]
pub struct ResourceIndex {
  embedder: Arc<dyn Embedder>,
  index: Arc<dyn VectorIndex>,
  cfg: ResourceConfig,
}

impl ResourceIndex {
  pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, cfg: ResourceConfig) -> Self {
    Self { embedder, index, cfg }
  }

  /// Nearest resource for `query_text`, or None on no match or any failure.
  #[instrument(level = "info", skip(self, query_text), fields(namespace = %self.cfg.namespace, query_len = query_text.len()))]
  pub async fn lookup(&self, query_text: &str) -> Option<Resource> {
    match self.try_lookup(query_text).await {
      Ok(Some(r)) => {
        debug!(target: "quiz", title = %r.title, "Resource found");
        Some(r)
      }
      Ok(None) => {
        debug!(target: "quiz", "No resource matched");
        None
      }
      Err(e) => {
        warn!(target: "quiz", error = %e, "Resource lookup failed; continuing without resource");
        None
      }
    }
  }

  async fn try_lookup(&self, query_text: &str) -> Result<Option<Resource>, ResourceError> {
    let vector = self.embedder.embed(query_text).await?;
    let matches = self.index.query(&self.cfg.namespace, vector, self.cfg.top_k.max(1)).await?;
    Ok(matches.into_iter().next().map(|m| {
      debug!(target: "quiz", id = %m.id, score = m.score, "Top resource match");
      self.to_resource(&m.metadata)
    }))
  }

  fn to_resource(&self, meta: &HashMap<String, serde_json::Value>) -> Resource {
    let field = |key: &str, default: &str| {
      meta.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
    };
    Resource {
      title: field("title", &self.cfg.default_title),
      link: field("link", &self.cfg.default_link),
      description: field("description", &self.cfg.default_description),
    }
  }
}
