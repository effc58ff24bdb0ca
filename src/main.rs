//! Quiz Tutor · Financial Literacy Quiz Backend
//!
//! - Axum HTTP API (session table, fallback policy) + WebSocket interactive session (retry policy)
//! - OpenAI chat for question/answer/evaluation, OpenAI embeddings + Pinecone for resource lookup
//! - Static frontend fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                    : u16 (default 3000)
//!   OPENAI_API_KEY          : enables the generative model (and embeddings) if present
//!   OPENAI_BASE_URL         : default "https://api.openai.com/v1"
//!   OPENAI_CHAT_MODEL       : default "gpt-4o-mini"
//!   OPENAI_EMBEDDING_MODEL  : default "text-embedding-3-small"
//!   PINECONE_API_KEY        : enables resource lookup together with PINECONE_INDEX_HOST
//!   PINECONE_INDEX_HOST     : Pinecone index host
//!   TUTOR_CONFIG_PATH       : path to TOML config (prompts, fallbacks, policies, resources, sessions)
//!   LOG_LEVEL               : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT              : "pretty" (default) or "json"

mod telemetry;
mod util;
mod error;
mod domain;
mod config;
mod prompt;
mod conversation;
mod openai;
mod pinecone;
mod resources;
mod session;
mod state;
mod protocol;
mod routes;
#[cfg(test)]
mod test_utils;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state: config, collaborators, session table.
  let state = Arc::new(AppState::from_env());
  info!(target: "quiz_tutor", model = %state.conversations.describe(), resources = state.resources.is_some(), "State ready");

  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "quiz_tutor", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "quiz_tutor", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "quiz_tutor", "Shutdown signal received");
}
