//! Conversational collaborator seam.
//!
//! A `Conversation` owns its turn history; a `ConversationFactory` starts fresh
//! ones. Sessions never share a conversation.

use async_trait::async_trait;

use crate::error::ConversationError;

#[async_trait]
pub trait Conversation: Send {
  /// Send one prompt in the context of prior turns.
  /// The turn is recorded in history only when `Ok` is returned.
  async fn send_message(&mut self, prompt: &str) -> Result<String, ConversationError>;

  /// Number of completed turns held in history.
  fn turns(&self) -> usize;
}

pub trait ConversationFactory: Send + Sync {
  fn start_chat(&self) -> Box<dyn Conversation>;

  /// Short label for logs.
  fn describe(&self) -> String;
}

/// Used when no generative model is configured: every call fails with `Unavailable`.
pub struct OfflineFactory;

struct OfflineConversation;

#[async_trait]
impl Conversation for OfflineConversation {
  async fn send_message(&mut self, _prompt: &str) -> Result<String, ConversationError> {
    Err(ConversationError::Unavailable)
  }

  fn turns(&self) -> usize { 0 }
}

impl ConversationFactory for OfflineFactory {
  fn start_chat(&self) -> Box<dyn Conversation> {
    Box::new(OfflineConversation)
  }

  fn describe(&self) -> String { "offline".into() }
}
