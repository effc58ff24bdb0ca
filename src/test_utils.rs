//! Scripted collaborators for unit and router tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::conversation::{Conversation, ConversationFactory};
use crate::error::{ConversationError, ResourceError};
use crate::resources::{Embedder, IndexMatch, VectorIndex};

/// A prompt as the model saw it.
#[derive(Clone, Debug)]
pub struct SentPrompt {
  pub chat: usize,
  pub prior_turns: usize,
  pub prompt: String,
}

#[derive(Default)]
struct Script {
  replies: VecDeque<Result<String, ConversationError>>,
  otherwise: Option<Result<String, ConversationError>>,
  sent: Vec<SentPrompt>,
  chats_started: usize,
}

/// Factory whose conversations pop replies from one shared queue.
/// An exhausted queue answers with the `always` reply, or a transport error.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
  script: Arc<Mutex<Script>>,
}

impl ScriptedFactory {
  pub fn new() -> Self { Self::default() }

  pub fn reply(self, text: &str) -> Self {
    self.push(Ok(text.to_string()));
    self
  }

  pub fn fail(self, err: ConversationError) -> Self {
    self.push(Err(err));
    self
  }

  pub fn safety(self) -> Self {
    self.fail(ConversationError::Safety("blocked".into()))
  }

  /// Reply given whenever the queue is empty.
  pub fn always(self, item: Result<String, ConversationError>) -> Self {
    self.script.lock().unwrap().otherwise = Some(item);
    self
  }

  pub fn push(&self, item: Result<String, ConversationError>) {
    self.script.lock().unwrap().replies.push_back(item);
  }

  pub fn sent(&self) -> Vec<SentPrompt> {
    self.script.lock().unwrap().sent.clone()
  }

  pub fn calls(&self) -> usize {
    self.script.lock().unwrap().sent.len()
  }

  pub fn chats_started(&self) -> usize {
    self.script.lock().unwrap().chats_started
  }
}

struct ScriptedConversation {
  script: Arc<Mutex<Script>>,
  chat: usize,
  turns: usize,
}

#[async_trait]
impl Conversation for ScriptedConversation {
  async fn send_message(&mut self, prompt: &str) -> Result<String, ConversationError> {
    let next = {
      let mut s = self.script.lock().unwrap();
      s.sent.push(SentPrompt { chat: self.chat, prior_turns: self.turns, prompt: prompt.to_string() });
      s.replies.pop_front().or_else(|| s.otherwise.clone())
    };
    let out = next.unwrap_or_else(|| Err(ConversationError::Transport("script exhausted".into())));
    if out.is_ok() {
      self.turns += 1;
    }
    out
  }

  fn turns(&self) -> usize { self.turns }
}

impl ConversationFactory for ScriptedFactory {
  fn start_chat(&self) -> Box<dyn Conversation> {
    let chat = {
      let mut s = self.script.lock().unwrap();
      s.chats_started += 1;
      s.chats_started
    };
    Box::new(ScriptedConversation { script: self.script.clone(), chat, turns: 0 })
  }

  fn describe(&self) -> String { "scripted".into() }
}

/// Conversation that always answers the same way, for unbounded-retry tests.
pub struct RepeatingConversation {
  pub reply: Result<String, ConversationError>,
  pub calls: Arc<Mutex<usize>>,
}

#[async_trait]
impl Conversation for RepeatingConversation {
  async fn send_message(&mut self, _prompt: &str) -> Result<String, ConversationError> {
    *self.calls.lock().unwrap() += 1;
    self.reply.clone()
  }

  fn turns(&self) -> usize { 0 }
}

pub struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
  async fn embed(&self, text: &str) -> Result<Vec<f32>, ResourceError> {
    Ok(vec![text.len() as f32, 1.0, 0.0])
  }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
  async fn embed(&self, _text: &str) -> Result<Vec<f32>, ResourceError> {
    Err(ResourceError::Embedding("model offline".into()))
  }
}

/// Index returning the same matches for every query, recording namespaces.
pub struct StaticIndex {
  matches: Option<Vec<IndexMatch>>,
  queried: Mutex<Vec<String>>,
}

impl StaticIndex {
  pub fn new(matches: Vec<IndexMatch>) -> Self {
    Self { matches: Some(matches), queried: Mutex::new(Vec::new()) }
  }

  pub fn failing() -> Self {
    Self { matches: None, queried: Mutex::new(Vec::new()) }
  }

  pub fn hit(id: &str, meta: &[(&str, serde_json::Value)]) -> IndexMatch {
    let metadata: HashMap<String, serde_json::Value> =
      meta.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    IndexMatch { id: id.to_string(), score: 0.9, metadata }
  }

  pub fn queried_namespaces(&self) -> Vec<String> {
    self.queried.lock().unwrap().clone()
  }
}

#[async_trait]
impl VectorIndex for StaticIndex {
  async fn query(
    &self,
    namespace: &str,
    _vector: Vec<f32>,
    top_k: usize,
  ) -> Result<Vec<IndexMatch>, ResourceError> {
    self.queried.lock().unwrap().push(namespace.to_string());
    match &self.matches {
      Some(m) => Ok(m.iter().take(top_k).cloned().collect()),
      None => Err(ResourceError::Query("index down".into())),
    }
  }
}
