//! Loading tutor configuration (prompts, canned fallbacks, failure policies,
//! resource lookup and session settings) from TOML.
//!
//! Every table is optional; see `TutorConfig` for the schema.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::FailurePolicy;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TutorConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub fallbacks: Fallbacks,
  #[serde(default)]
  pub policy: PolicyConfig,
  #[serde(default)]
  pub resources: ResourceConfig,
  #[serde(default)]
  pub sessions: SessionConfig,
}

/// Prompt templates sent over the shared conversation.
/// `safety_directive` is prepended to every one of them.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub safety_directive: String,
  /// Placeholders: `{topic}`
  pub question_template: String,
  /// Placeholders: `{question}`
  pub answer_template: String,
  /// Placeholders: `{question}`, `{user_answer}`, `{reference_answer}`
  pub evaluation_template: String,
  /// Placeholders: `{question}`
  pub general_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      safety_directive: "Please ensure that the content you generate is safe, appropriate, and free from explicit or harmful language.".into(),
      question_template: "Generate a random question related to {topic}. Respond with 'Question: [generated question]'.".into(),
      answer_template: "Provide the correct answer to the following question: {question}. Respond with 'Answer: [correct answer]'.".into(),
      evaluation_template: "\nQuestion: {question}\nUser's Answer: {user_answer}\nCorrect Answer: {reference_answer}\n\nBased on the provided correct answer, is the user's answer correct?\nRespond with 'Evaluation: Correct' if the user's answer is correct,\nor 'Evaluation: Incorrect' if it is incorrect.\n".into(),
      general_template: "Answer this financial literacy question: {question}. Provide a helpful, educational response.".into(),
    }
  }
}

/// Canned strings substituted when a stage cannot produce content.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Fallbacks {
  pub question_on_safety: String,
  pub question_on_error: String,
  pub answer_on_safety: String,
  pub answer_on_error: String,
  pub no_question: String,
  pub no_round: String,
  pub general_on_error: String,
}

impl Default for Fallbacks {
  fn default() -> Self {
    Self {
      question_on_safety: "What is the recommended amount for an emergency fund?".into(),
      question_on_error: "What factors should you consider when choosing a credit card?".into(),
      answer_on_safety: "Please refer to financial literacy resources for the correct answer.".into(),
      answer_on_error: "Unable to generate answer at this time.".into(),
      no_question: "No question available.".into(),
      no_round: "No question or answer available.".into(),
      general_on_error: "I apologize, but I'm having trouble answering that question right now. Please try again.".into(),
    }
  }
}

/// Failure policy per front-end.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
  pub http: FailurePolicy,
  pub ws: FailurePolicy,
}

impl Default for PolicyConfig {
  fn default() -> Self {
    Self { http: FailurePolicy::Fallback, ws: FailurePolicy::Retry { max_attempts: Some(5) } }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
  pub namespace: String,
  pub top_k: usize,
  pub default_title: String,
  pub default_link: String,
  pub default_description: String,
}

impl Default for ResourceConfig {
  fn default() -> Self {
    Self {
      namespace: "auto_loan_resources".into(),
      top_k: 1,
      default_title: "Financial Resource".into(),
      default_link: "#".into(),
      default_description: String::new(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  pub idle_timeout_secs: u64,
  pub default_topic: String,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self { idle_timeout_secs: 3600, default_topic: "financial literacy".into() }
  }
}

/// Attempt to load `TutorConfig` from TUTOR_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_tutor_config_from_env() -> Option<TutorConfig> {
  let path = std::env::var("TUTOR_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<TutorConfig>(&s) {
      Ok(cfg) => {
        info!(target: "quiz_tutor", %path, "Loaded tutor config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "quiz_tutor", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "quiz_tutor", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
