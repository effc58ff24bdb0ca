//! Quiz session: the question → reference answer → evaluation protocol.
//!
//! One `QuizSession` owns one conversation. Every stage goes over that
//! conversation so later prompts see earlier turns. Collaborator failures
//! never escape: they become canned values according to the session's
//! `FailurePolicy`, and resource lookup failures are dropped.
//!
//! Session fields are written only after a stage finishes, so a host that
//! cancels an in-flight call (by dropping the future) leaves the previous
//! round intact.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, instrument, warn};

use crate::config::TutorConfig;
use crate::conversation::Conversation;
use crate::domain::{EvaluationResult, FailurePolicy, RetryNotice, RetryReason, Stage};
use crate::prompt::{
  answer_prompt, evaluation_prompt, extract_after_marker, general_prompt, has_marker,
  is_judged_correct, question_prompt,
};
use crate::resources::ResourceIndex;

pub struct QuizSession {
  conversation: Box<dyn Conversation>,
  cfg: Arc<TutorConfig>,
  policy: FailurePolicy,
  resources: Option<Arc<ResourceIndex>>,
  notices: Option<UnboundedSender<RetryNotice>>,
  current_question: String,
  current_reference_answer: String,
}

impl QuizSession {
  pub fn new(
    conversation: Box<dyn Conversation>,
    cfg: Arc<TutorConfig>,
    policy: FailurePolicy,
    resources: Option<Arc<ResourceIndex>>,
  ) -> Self {
    Self {
      conversation,
      cfg,
      policy,
      resources,
      notices: None,
      current_question: String::new(),
      current_reference_answer: String::new(),
    }
  }

  /// Report each retry on `tx` (retry mode only).
  pub fn with_retry_notices(mut self, tx: UnboundedSender<RetryNotice>) -> Self {
    self.notices = Some(tx);
    self
  }

  pub fn policy(&self) -> FailurePolicy { self.policy }

  pub fn current_question(&self) -> &str { &self.current_question }

  pub fn current_reference_answer(&self) -> &str { &self.current_reference_answer }

  /// Turns accumulated in this session's conversation.
  pub fn history_len(&self) -> usize { self.conversation.turns() }

  /// Ask for one question on `topic` (blank = configured default topic).
  /// Starts a new round: the previous reference answer is dropped.
  #[instrument(level = "info", skip(self, topic), fields(topic_len = topic.len(), policy = ?self.policy))]
  pub async fn generate_question(&mut self, topic: &str) -> String {
    let topic = match topic.trim() {
      "" => self.cfg.sessions.default_topic.clone(),
      t => t.to_string(),
    };
    let prompt = question_prompt(&self.cfg.prompts, &topic);
    let question = self.run_stage(Stage::Question, &prompt).await;

    info!(target: "quiz", %topic, question_len = question.len(), turns = self.history_len(), "Question ready");
    self.current_question = question.clone();
    self.current_reference_answer.clear();
    question
  }

  /// Ask for the correct answer to the current question.
  #[instrument(level = "info", skip(self), fields(question_len = self.current_question.len()))]
  pub async fn generate_answer(&mut self) -> String {
    if self.current_question.is_empty() {
      warn!(target: "quiz", "generate_answer called without a question");
      return self.cfg.fallbacks.no_question.clone();
    }
    let prompt = answer_prompt(&self.cfg.prompts, &self.current_question);
    let answer = self.run_stage(Stage::Answer, &prompt).await;

    info!(target: "quiz", answer_len = answer.len(), "Reference answer ready");
    self.current_reference_answer = answer.clone();
    answer
  }

  /// Judge `user_answer` against the current reference answer.
  /// On a negative judgment, attaches the nearest resource when the index is configured.
  #[instrument(level = "info", skip(self, user_answer), fields(answer_len = user_answer.len()))]
  pub async fn evaluate_answer(&mut self, user_answer: &str) -> EvaluationResult {
    if self.current_question.is_empty() || self.current_reference_answer.is_empty() {
      warn!(target: "quiz", "evaluate_answer called without a complete round");
      return EvaluationResult::precondition_failed(self.cfg.fallbacks.no_round.clone());
    }

    let reference = self.current_reference_answer.clone();
    let prompt = evaluation_prompt(&self.cfg.prompts, &self.current_question, user_answer, &reference);

    let raw = match self.conversation.send_message(&prompt).await {
      Ok(raw) => raw,
      Err(e) => {
        error!(target: "quiz", error = %e, "Evaluation call failed");
        return EvaluationResult {
          is_correct: false,
          raw_feedback: format!("Error evaluating answer: {e}"),
          reference_answer: Some(reference),
          resource: None,
        };
      }
    };

    let is_correct = is_judged_correct(&raw);
    info!(target: "quiz", %is_correct, feedback_len = raw.len(), "Answer evaluated");

    let resource = match (&self.resources, is_correct) {
      (Some(ri), false) => ri.lookup(&reference).await,
      _ => None,
    };

    EvaluationResult { is_correct, raw_feedback: raw, reference_answer: Some(reference), resource }
  }

  /// `generate_answer` followed by `evaluate_answer`, as both front-ends submit.
  pub async fn submit_answer(&mut self, user_answer: &str) -> EvaluationResult {
    self.generate_answer().await;
    self.evaluate_answer(user_answer).await
  }

  /// Free-form educational answer. Uses the shared history but leaves the round untouched.
  #[instrument(level = "info", skip(self, question), fields(question_len = question.len()))]
  pub async fn answer_general_question(&mut self, question: &str) -> String {
    let prompt = general_prompt(&self.cfg.prompts, question);
    match self.conversation.send_message(&prompt).await {
      Ok(text) => text,
      Err(e) => {
        error!(target: "quiz", error = %e, "General question failed; using apology");
        self.cfg.fallbacks.general_on_error.clone()
      }
    }
  }

  // -------- Stage execution --------

  fn canned(&self, stage: Stage, safety: bool) -> String {
    let f = &self.cfg.fallbacks;
    match (stage, safety) {
      (Stage::Question, true) => f.question_on_safety.clone(),
      (Stage::Question, false) => f.question_on_error.clone(),
      (Stage::Answer, true) => f.answer_on_safety.clone(),
      (Stage::Answer, false) => f.answer_on_error.clone(),
    }
  }

  async fn run_stage(&mut self, stage: Stage, prompt: &str) -> String {
    match self.policy {
      FailurePolicy::Fallback => self.fallback_stage(stage, prompt).await,
      FailurePolicy::Retry { max_attempts } => self.retry_stage(stage, prompt, max_attempts).await,
    }
  }

  async fn fallback_stage(&mut self, stage: Stage, prompt: &str) -> String {
    match self.conversation.send_message(prompt).await {
      Ok(raw) => {
        let text = extract_after_marker(&raw, stage.marker());
        if text.is_empty() {
          warn!(target: "quiz", stage = stage.as_str(), "Empty completion; using canned value");
          self.canned(stage, false)
        } else {
          text
        }
      }
      Err(e) if e.is_safety() => {
        warn!(target: "quiz", stage = stage.as_str(), error = %e, "Safety rejection; using canned value");
        self.canned(stage, true)
      }
      Err(e) => {
        error!(target: "quiz", stage = stage.as_str(), error = %e, "Model call failed; using canned value");
        self.canned(stage, false)
      }
    }
  }

  /// Resend until a completion carries the stage marker, up to `max_attempts`.
  /// Transient failures are not retried.
  async fn retry_stage(&mut self, stage: Stage, prompt: &str, max_attempts: Option<u32>) -> String {
    let marker = stage.marker();
    let mut attempt: u32 = 1;
    let mut last_unmarked: Option<String> = None;

    loop {
      let reason = match self.conversation.send_message(prompt).await {
        Ok(raw) if has_marker(&raw, marker) => {
          let text = extract_after_marker(&raw, marker);
          if !text.is_empty() {
            debug!(target: "quiz", stage = stage.as_str(), attempt, "Marked completion accepted");
            return text;
          }
          RetryReason::MissingMarker
        }
        Ok(raw) => {
          let t = raw.trim();
          if !t.is_empty() {
            last_unmarked = Some(t.to_string());
          }
          RetryReason::MissingMarker
        }
        Err(e) if e.is_safety() => {
          warn!(target: "quiz", stage = stage.as_str(), attempt, error = %e, "Safety rejection; retrying");
          RetryReason::SafetyRejection
        }
        Err(e) => {
          error!(target: "quiz", stage = stage.as_str(), attempt, error = %e, "Model call failed; using canned value");
          return self.canned(stage, false);
        }
      };

      if max_attempts.is_some_and(|max| attempt >= max) {
        warn!(target: "quiz", stage = stage.as_str(), attempt, "Retry attempts exhausted");
        return match last_unmarked {
          Some(text) => text,
          None => self.canned(stage, reason == RetryReason::SafetyRejection),
        };
      }

      attempt += 1;
      if let Some(tx) = &self.notices {
        let _ = tx.send(RetryNotice { stage, attempt, reason });
      }
      // Cancellation point between attempts.
      tokio::task::yield_now().await;
    }
  }
}
