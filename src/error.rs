//! Error types for collaborator calls and host-level dispatch.
//!
//! The quiz pipeline never lets `ConversationError` or `ResourceError` escape:
//! `session.rs` maps them to canned values. Only `HostError` reaches clients,
//! wrapped in the `{success: false, error}` envelope.

use thiserror::Error;

/// Classified failure from the generative model.
#[derive(Debug, Clone, Error)]
pub enum ConversationError {
  /// The model (or its moderation layer) refused to produce the content.
  #[error("content-safety rejection: {0}")]
  Safety(String),

  #[error("transport error: {0}")]
  Transport(String),

  #[error("model API HTTP {status}: {message}")]
  Api { status: u16, message: String },

  #[error("malformed model response: {0}")]
  Malformed(String),

  /// No generative model is configured for this process.
  #[error("generative model unavailable")]
  Unavailable,
}

impl ConversationError {
  pub fn is_safety(&self) -> bool {
    matches!(self, ConversationError::Safety(_))
  }
}

impl From<reqwest::Error> for ConversationError {
  fn from(err: reqwest::Error) -> Self {
    ConversationError::Transport(err.to_string())
  }
}

/// Failure during embedding or nearest-neighbour query. Always swallowed.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
  #[error("embedding failed: {0}")]
  Embedding(String),

  #[error("vector query failed: {0}")]
  Query(String),
}

/// Faults detected by the HTTP/WS host before the core is invoked.
#[derive(Debug, Clone, Error)]
pub enum HostError {
  #[error("Malformed request: {0}")]
  MalformedRequest(String),

  #[error("Unknown sessionId: {0}")]
  UnknownSession(String),

  #[error("Missing sessionId")]
  MissingSession,
}
