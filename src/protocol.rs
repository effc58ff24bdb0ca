//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{EvaluationResult, RetryNotice, RetryReason, Stage};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    NewQuestion {
        #[serde(default)]
        topic: Option<String>,
    },
    SubmitAnswer {
        #[serde(default)]
        answer: String,
    },
    Ask {
        question: String,
    },
    Reset,
    /// Cancel the operation in flight.
    Abort,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Question {
        text: String,
    },
    Retrying {
        stage: Stage,
        attempt: u32,
        reason: RetryReason,
    },
    Evaluation {
        evaluation: EvaluationResult,
    },
    Answer {
        text: String,
    },
    Reset,
    Aborted,
    Error {
        message: String,
    },
}

impl From<RetryNotice> for ServerWsMessage {
    fn from(n: RetryNotice) -> Self {
        ServerWsMessage::Retrying { stage: n.stage, attempt: n.attempt, reason: n.reason }
    }
}

//
// HTTP envelope
//

/// `{success: true, ...payload}`
#[derive(Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub payload: T,
}

/// Payload of `{success: false, error}`
#[derive(Serialize)]
pub struct Failure {
    pub error: String,
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct GenerateQuestionIn {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}
#[derive(Serialize)]
pub struct QuestionOut {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitAnswerIn {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}
#[derive(Serialize)]
pub struct EvaluationOut {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub evaluation: EvaluationResult,
}

#[derive(Debug, Deserialize)]
pub struct AskQuestionIn {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}
#[derive(Serialize)]
pub struct AskOut {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub response: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionIn {
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}
#[derive(Serialize)]
pub struct ResetOut {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub message: String,
}
#[derive(Serialize)]
pub struct EndOut {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub removed: bool,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub sessions: usize,
}
