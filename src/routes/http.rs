//! HTTP endpoint handlers. These are thin wrappers that forward to the session table
//! and `QuizSession`, and wrap every result in the `{success, ...}` envelope.
//! Each handler is instrumented and logs session ids and basic result info.

use std::sync::Arc;
use axum::{
  extract::{rejection::JsonRejection, State},
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::HostError;
use crate::protocol::*;
use crate::state::AppState;

type Body<T> = Result<Json<T>, JsonRejection>;

fn respond<T: Serialize>(result: Result<T, HostError>) -> Response {
  match result {
    Ok(payload) => Json(Envelope { success: true, payload }).into_response(),
    Err(e) => {
      warn!(target: "quiz_tutor", error = %e, "Request rejected");
      Json(Envelope { success: false, payload: Failure { error: e.to_string() } }).into_response()
    }
  }
}

fn parse<T>(body: Body<T>) -> Result<T, HostError> {
  body.map(|Json(b)| b).map_err(|e| HostError::MalformedRequest(e.body_text()))
}

/// Like `parse`, but a request without a JSON body counts as an empty object.
fn parse_or_default<T: Default>(body: Body<T>) -> Result<T, HostError> {
  match body {
    Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
    other => parse(other),
  }
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, sessions: state.session_count().await })
}

#[instrument(level = "info", skip_all)]
pub async fn http_generate_question(
  State(state): State<Arc<AppState>>,
  body: Body<GenerateQuestionIn>,
) -> Response {
  respond(generate_question(&state, body).await)
}

async fn generate_question(state: &AppState, body: Body<GenerateQuestionIn>) -> Result<QuestionOut, HostError> {
  let body = parse(body)?;
  let (session_id, session) = state.get_or_create(body.session_id.as_deref()).await?;
  let topic = body.topic.unwrap_or_default();
  let mut session = session.lock().await;
  let question = session.generate_question(&topic).await;
  info!(target: "quiz", %session_id, stored_len = session.current_question().len(), "HTTP question served");
  Ok(QuestionOut { session_id, question })
}

#[instrument(level = "info", skip_all)]
pub async fn http_submit_answer(
  State(state): State<Arc<AppState>>,
  body: Body<SubmitAnswerIn>,
) -> Response {
  respond(submit_answer(&state, body).await)
}

async fn submit_answer(state: &AppState, body: Body<SubmitAnswerIn>) -> Result<EvaluationOut, HostError> {
  let body = parse(body)?;
  let session_id = body.session_id.ok_or(HostError::MissingSession)?;
  let session = state.get_session(&session_id).await?;
  let answer = body.answer.unwrap_or_default();
  let mut session = session.lock().await;
  let evaluation = session.submit_answer(&answer).await;
  info!(
    target: "quiz",
    %session_id,
    question_len = session.current_question().len(),
    reference_len = session.current_reference_answer().len(),
    correct = evaluation.is_correct,
    has_resource = evaluation.resource.is_some(),
    "HTTP submit_answer evaluated"
  );
  Ok(EvaluationOut { session_id, evaluation })
}

#[instrument(level = "info", skip_all)]
pub async fn http_ask_question(
  State(state): State<Arc<AppState>>,
  body: Body<AskQuestionIn>,
) -> Response {
  respond(ask_question(&state, body).await)
}

async fn ask_question(state: &AppState, body: Body<AskQuestionIn>) -> Result<AskOut, HostError> {
  let body = parse(body)?;
  let (session_id, session) = state.get_or_create(body.session_id.as_deref()).await?;
  let question = body.question.unwrap_or_default();
  let response = session.lock().await.answer_general_question(&question).await;
  Ok(AskOut { session_id, response })
}

#[instrument(level = "info", skip_all)]
pub async fn http_reset_chat(
  State(state): State<Arc<AppState>>,
  body: Body<SessionIn>,
) -> Response {
  respond(reset_chat(&state, body).await)
}

async fn reset_chat(state: &AppState, body: Body<SessionIn>) -> Result<ResetOut, HostError> {
  let body = parse_or_default(body)?;
  let session_id = match body.session_id {
    Some(id) => {
      state.reset_session(&id).await?;
      id
    }
    None => state.create_session().await.0,
  };
  Ok(ResetOut { session_id, message: "Chat reset successfully".into() })
}

#[instrument(level = "info", skip_all)]
pub async fn http_end_session(
  State(state): State<Arc<AppState>>,
  body: Body<SessionIn>,
) -> Response {
  respond(end_session(&state, body).await)
}

async fn end_session(state: &AppState, body: Body<SessionIn>) -> Result<EndOut, HostError> {
  let session_id = parse(body)?.session_id.ok_or(HostError::MissingSession)?;
  let removed = state.remove_session(&session_id).await;
  info!(target: "quiz", %session_id, removed, "HTTP session ended");
  Ok(EndOut { session_id, removed })
}
