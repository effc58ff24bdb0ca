//! Domain models: evaluation results, learning resources, failure policies and retry notices.

use serde::{Deserialize, Serialize};

/// A learning resource attached to an incorrect evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
  pub title: String,
  pub link: String,
  pub description: String,
}

/// Outcome of judging one user answer.
///
/// Field names on the wire match the reference host (`message`, `correct_answer`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EvaluationResult {
  pub is_correct: bool,
  #[serde(rename = "message")]
  pub raw_feedback: String,
  #[serde(rename = "correct_answer", skip_serializing_if = "Option::is_none")]
  pub reference_answer: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub resource: Option<Resource>,
}

impl EvaluationResult {
  /// Negative result produced without contacting any collaborator.
  pub fn precondition_failed(message: impl Into<String>) -> Self {
    Self { is_correct: false, raw_feedback: message.into(), reference_answer: None, resource: None }
  }
}

/// Which generation stage a prompt belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  Question,
  Answer,
}

impl Stage {
  pub fn as_str(&self) -> &'static str {
    match self {
      Stage::Question => "question",
      Stage::Answer => "answer",
    }
  }
}

/// How question/answer generation reacts to a refused or unusable completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Substitute a canned value immediately (service contexts).
  #[default]
  Fallback,
  /// Resend the same prompt; `None` means no attempt cap (interactive contexts).
  Retry {
    #[serde(default)]
    max_attempts: Option<u32>,
  },
}

/// Why a retry was issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
  SafetyRejection,
  MissingMarker,
}

/// Emitted by a session in retry mode before each resend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RetryNotice {
  pub stage: Stage,
  /// 1-based number of the attempt about to be sent.
  pub attempt: u32,
  pub reason: RetryReason,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Deserialize)]
  struct Holder { policy: FailurePolicy }

  #[test]
  fn policy_parses_from_toml_tables() {
    let h: Holder = toml::from_str("policy = { mode = \"fallback\" }").expect("fallback");
    assert_eq!(h.policy, FailurePolicy::Fallback);

    let h: Holder = toml::from_str("policy = { mode = \"retry\", max_attempts = 4 }").expect("capped");
    assert_eq!(h.policy, FailurePolicy::Retry { max_attempts: Some(4) });

    let h: Holder = toml::from_str("policy = { mode = \"retry\" }").expect("unbounded");
    assert_eq!(h.policy, FailurePolicy::Retry { max_attempts: None });
  }

  #[test]
  fn policy_defaults_to_fallback() {
    assert_eq!(FailurePolicy::default(), FailurePolicy::Fallback);
  }

  #[test]
  fn evaluation_omits_absent_resource_on_the_wire() {
    let r = EvaluationResult {
      is_correct: true,
      raw_feedback: "Evaluation: Correct".into(),
      reference_answer: Some("Three to six months of expenses.".into()),
      resource: None,
    };
    let v = serde_json::to_value(&r).expect("json");
    assert_eq!(v["is_correct"], true);
    assert_eq!(v["message"], "Evaluation: Correct");
    assert_eq!(v["correct_answer"], "Three to six months of expenses.");
    assert!(v.get("resource").is_none());
  }
}
