//! Prompt construction and response parsing for the three quiz stages.

use crate::config::Prompts;
use crate::domain::Stage;
use crate::util::fill_template;

pub const QUESTION_MARKER: &str = "Question:";
pub const ANSWER_MARKER: &str = "Answer:";
/// Affirmative evaluation token. Matched by case-sensitive containment,
/// so "Incorrect" does not match but any other "Correct" substring does.
pub const CORRECT_MARKER: &str = "Correct";

impl Stage {
  pub fn marker(&self) -> &'static str {
    match self {
      Stage::Question => QUESTION_MARKER,
      Stage::Answer => ANSWER_MARKER,
    }
  }
}

fn with_safety(prompts: &Prompts, body: &str) -> String {
  format!("{} {}", prompts.safety_directive, body)
}

pub fn question_prompt(prompts: &Prompts, topic: &str) -> String {
  with_safety(prompts, &fill_template(&prompts.question_template, &[("topic", topic)]))
}

pub fn answer_prompt(prompts: &Prompts, question: &str) -> String {
  with_safety(prompts, &fill_template(&prompts.answer_template, &[("question", question)]))
}

pub fn evaluation_prompt(prompts: &Prompts, question: &str, user_answer: &str, reference_answer: &str) -> String {
  with_safety(
    prompts,
    &fill_template(
      &prompts.evaluation_template,
      &[("question", question), ("user_answer", user_answer), ("reference_answer", reference_answer)],
    ),
  )
}

pub fn general_prompt(prompts: &Prompts, question: &str) -> String {
  with_safety(prompts, &fill_template(&prompts.general_template, &[("question", question)]))
}

/// Text after the last `marker`, trimmed; the whole trimmed text when the marker is absent.
pub fn extract_after_marker(raw: &str, marker: &str) -> String {
  match raw.rfind(marker) {
    Some(pos) => raw[pos + marker.len()..].trim().to_string(),
    None => raw.trim().to_string(),
  }
}

pub fn has_marker(raw: &str, marker: &str) -> bool {
  raw.contains(marker)
}

pub fn is_judged_correct(raw: &str) -> bool {
  raw.contains(CORRECT_MARKER)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn marker_text_is_extracted_after_last_occurrence() {
    assert_eq!(extract_after_marker("Question: What is an emergency fund?", QUESTION_MARKER), "What is an emergency fund?");
    assert_eq!(
      extract_after_marker("Question: draft\nQuestion:  What is a credit score?  \n", QUESTION_MARKER),
      "What is a credit score?"
    );
  }

  #[test]
  fn missing_marker_keeps_full_trimmed_text() {
    assert_eq!(extract_after_marker("  Save three months of expenses.\n", ANSWER_MARKER), "Save three months of expenses.");
  }

  #[test]
  fn correctness_is_case_sensitive_containment() {
    assert!(is_judged_correct("Evaluation: Correct"));
    assert!(is_judged_correct("That is Correct-ish, mostly."));
    assert!(!is_judged_correct("Evaluation: Incorrect"));
    assert!(!is_judged_correct("evaluation: correct"));
  }

  #[test]
  fn every_prompt_starts_with_the_safety_directive() {
    let p = Prompts::default();
    let prompts = [
      question_prompt(&p, "credit"),
      answer_prompt(&p, "What is APR?"),
      evaluation_prompt(&p, "What is APR?", "interest", "Annual percentage rate."),
      general_prompt(&p, "How do I budget?"),
    ];
    for s in prompts {
      assert!(s.starts_with(&p.safety_directive), "missing directive: {s}");
    }
  }

  #[test]
  fn evaluation_prompt_carries_all_three_texts() {
    let s = evaluation_prompt(&Prompts::default(), "What is APR?", "a rate", "Annual percentage rate.");
    assert!(s.contains("Question: What is APR?"));
    assert!(s.contains("User's Answer: a rate"));
    assert!(s.contains("Correct Answer: Annual percentage rate."));
  }

  #[test]
  fn question_prompt_names_the_topic() {
    let s = question_prompt(&Prompts::default(), "credit");
    assert!(s.contains("related to credit."));
    assert!(s.contains("'Question: [generated question]'"));
  }
}
