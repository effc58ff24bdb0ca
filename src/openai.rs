//! Minimal OpenAI client for our use-cases.
//!
//! - chat.completions with the caller's turn history (one `OpenAIChat` per session)
//! - embeddings for resource lookup
//!
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//! Content-safety refusals are classified as `ConversationError::Safety` so the
//! session can apply its failure policy.
//!
//! NOTE: We never log the API key.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::conversation::{Conversation, ConversationFactory};
use crate::error::{ConversationError, ResourceError};
use crate::resources::Embedder;
use crate::util::trunc_for_log;

const UA: &str = "quiz-tutor-backend/0.1";

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub chat_model: String,
  pub embedding_model: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let chat_model =
      std::env::var("OPENAI_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let embedding_model =
      std::env::var("OPENAI_EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-3-small".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, chat_model, embedding_model })
  }

  /// Chat completion over the full message list.
  #[instrument(level = "info", skip(self, messages), fields(model = %self.chat_model, turns = messages.len()))]
  async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ConversationError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: &self.chat_model,
      messages,
      temperature: 0.7,
    };

    let start = std::time::Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, UA)
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let err = classify_http_error(status, &body);
      error!(elapsed = ?start.elapsed(), %status, error = %err, "OpenAI chat call failed");
      return Err(err);
    }

    let body: ChatCompletionResponse = res.json().await
      .map_err(|e| ConversationError::Malformed(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = extract_completion(body)?;
    info!(elapsed = ?start.elapsed(), reply_len = text.len(), "Model response received");
    Ok(text)
  }

  #[instrument(level = "info", skip(self, text), fields(model = %self.embedding_model, text_len = text.len()))]
  async fn embeddings(&self, text: &str) -> Result<Vec<f32>, ResourceError> {
    let url = format!("{}/embeddings", self.base_url);
    let req = EmbeddingRequest { model: &self.embedding_model, input: text };

    let res = self.client.post(&url)
      .header(USER_AGENT, UA)
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await
      .map_err(|e| ResourceError::Embedding(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).map(|e| e.message).unwrap_or_else(|| trunc_for_log(&body, 300));
      return Err(ResourceError::Embedding(format!("OpenAI HTTP {}: {}", status, msg)));
    }

    let body: EmbeddingResponse = res.json().await
      .map_err(|e| ResourceError::Embedding(e.to_string()))?;
    body.data.into_iter().next()
      .map(|d| d.embedding)
      .ok_or_else(|| ResourceError::Embedding("empty embedding response".into()))
  }
}

/// One session's conversation: the client plus accumulated turns.
pub struct OpenAIChat {
  api: OpenAI,
  history: Vec<ChatMessage>,
}

#[async_trait]
impl Conversation for OpenAIChat {
  async fn send_message(&mut self, prompt: &str) -> Result<String, ConversationError> {
    let mut messages = self.history.clone();
    messages.push(ChatMessage { role: "user".into(), content: prompt.into() });
    let reply = self.api.chat(&messages).await?;
    messages.push(ChatMessage { role: "assistant".into(), content: reply.clone() });
    self.history = messages;
    Ok(reply)
  }

  fn turns(&self) -> usize { self.history.len() / 2 }
}

impl ConversationFactory for OpenAI {
  fn start_chat(&self) -> Box<dyn Conversation> {
    Box::new(OpenAIChat { api: self.clone(), history: Vec::new() })
  }

  fn describe(&self) -> String { format!("openai:{}", self.chat_model) }
}

#[async_trait]
impl Embedder for OpenAI {
  async fn embed(&self, text: &str) -> Result<Vec<f32>, ResourceError> {
    self.embeddings(text).await
  }
}

// --- Response classification ---

/// Map a non-2xx chat response to a classified error.
fn classify_http_error(status: u16, body: &str) -> ConversationError {
  match extract_openai_error(body) {
    Some(e) if is_policy_code(e.code.as_deref()) || is_policy_code(e.r#type.as_deref()) => {
      ConversationError::Safety(e.message)
    }
    Some(e) => ConversationError::Api { status, message: e.message },
    None => ConversationError::Api { status, message: trunc_for_log(body, 300) },
  }
}

fn is_policy_code(code: Option<&str>) -> bool {
  matches!(code, Some("content_filter") | Some("content_policy_violation"))
}

/// Pull the assistant text out of a 2xx response, detecting filtered or refused output.
fn extract_completion(body: ChatCompletionResponse) -> Result<String, ConversationError> {
  let choice = body.choices.into_iter().next()
    .ok_or_else(|| ConversationError::Malformed("no choices in response".into()))?;

  if choice.finish_reason.as_deref() == Some("content_filter") {
    return Err(ConversationError::Safety("completion stopped by content filter".into()));
  }
  if let Some(refusal) = choice.message.refusal.filter(|r| !r.trim().is_empty()) {
    return Err(ConversationError::Safety(refusal));
  }
  choice.message.content
    .ok_or_else(|| ConversationError::Malformed("choice has no content".into()))
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
  model: &'a str,
  messages: &'a [ChatMessage],
  temperature: f32,
}
#[derive(Clone, Debug, Serialize)]
struct ChatMessage { role: String, content: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
  #[serde(default)] finish_reason: Option<String>,
}
#[derive(Deserialize)]
struct ChatMessageResp {
  #[serde(default)] content: Option<String>,
  #[serde(default)] refusal: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

// --- Embedding DTOs ---

#[derive(Serialize)]
struct EmbeddingRequest<'a> { model: &'a str, input: &'a str }
#[derive(Deserialize)]
struct EmbeddingResponse { data: Vec<EmbeddingData> }
#[derive(Deserialize)]
struct EmbeddingData { embedding: Vec<f32> }

#[derive(Deserialize)]
struct EObj {
  message: String,
  #[serde(default)] r#type: Option<String>,
  #[serde(default)] code: Option<String>,
}

/// Try to extract the error object from an OpenAI error body.
fn extract_openai_error(body: &str) -> Option<EObj> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(body: &str) -> ChatCompletionResponse {
    serde_json::from_str(body).expect("response json")
  }

  #[test]
  fn plain_completion_yields_text() {
    let body = parse(r#"{"choices":[{"message":{"content":"Question: What is APR?"},"finish_reason":"stop"}]}"#);
    assert_eq!(extract_completion(body).expect("text"), "Question: What is APR?");
  }

  #[test]
  fn content_filter_finish_is_a_safety_rejection() {
    let body = parse(r#"{"choices":[{"message":{"content":null},"finish_reason":"content_filter"}]}"#);
    assert!(extract_completion(body).expect_err("filtered").is_safety());
  }

  #[test]
  fn refusal_is_a_safety_rejection() {
    let body = parse(r#"{"choices":[{"message":{"content":null,"refusal":"I can't help with that."}}]}"#);
    match extract_completion(body) {
      Err(ConversationError::Safety(msg)) => assert_eq!(msg, "I can't help with that."),
      other => panic!("unexpected: {other:?}"),
    }
  }

  #[test]
  fn empty_choices_are_malformed() {
    let body = parse(r#"{"choices":[]}"#);
    assert!(matches!(extract_completion(body), Err(ConversationError::Malformed(_))));
  }

  #[test]
  fn http_errors_are_classified_by_code() {
    let policy = r#"{"error":{"message":"flagged","type":"invalid_request_error","code":"content_policy_violation"}}"#;
    assert!(classify_http_error(400, policy).is_safety());

    let quota = r#"{"error":{"message":"quota exceeded","type":"insufficient_quota","code":null}}"#;
    match classify_http_error(429, quota) {
      ConversationError::Api { status, message } => {
        assert_eq!(status, 429);
        assert_eq!(message, "quota exceeded");
      }
      other => panic!("unexpected: {other:?}"),
    }

    assert!(matches!(classify_http_error(502, "bad gateway"), ConversationError::Api { status: 502, .. }));
  }
}
