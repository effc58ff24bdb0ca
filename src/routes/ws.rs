//! WebSocket upgrade + message loop for the interactive front-end.
//!
//! Each connection owns one `QuizSession` (retry policy from `policy.ws`).
//! While an operation runs, the loop keeps reading the socket: `abort` or a
//! closed socket drops the in-flight future, anything else is answered with
//! `busy`. Retry notices are forwarded as `retrying` messages.

use std::{future::Future, sync::Arc};
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::RetryNotice;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::session::QuizSession;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "quiz_tutor", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Per-connection session plus its retry-notice channel.
struct WsSession {
  state: Arc<AppState>,
  session: QuizSession,
  notices: UnboundedReceiver<RetryNotice>,
}

impl WsSession {
  fn new(state: Arc<AppState>) -> Self {
    let (tx, notices) = mpsc::unbounded_channel();
    let session = state.new_session(state.cfg.policy.ws).with_retry_notices(tx);
    Self { state, session, notices }
  }

  fn reset(&mut self) {
    *self = WsSession::new(self.state.clone());
  }
}

enum Outcome<T> {
  Done(T),
  Aborted,
  Closed,
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "quiz_tutor", "WebSocket connected");
  let mut ws = WsSession::new(state);
  debug!(target: "quiz_tutor", policy = ?ws.session.policy(), "WebSocket session ready");

  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "quiz_tutor", bytes = txt.len(), "WS message received");
            match handle_client_ws(incoming, &mut ws, &mut socket).await {
              Some(reply) => reply,
              None => break,
            }
          }
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        };

        if send_msg(&mut socket, &reply_msg).await.is_err() {
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "quiz_tutor", "WebSocket disconnected");
}

async fn send_msg(socket: &mut WebSocket, msg: &ServerWsMessage) -> Result<(), axum::Error> {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  socket.send(Message::Text(out)).await.map_err(|e| {
    error!(target: "quiz_tutor", error = %e, "WS send error");
    e
  })
}

/// Dispatch one client message. `None` means the socket is gone.
#[instrument(level = "info", skip_all)]
async fn handle_client_ws(msg: ClientWsMessage, ws: &mut WsSession, socket: &mut WebSocket) -> Option<ServerWsMessage> {
  let reply = match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::NewQuestion { topic } => {
      let topic = topic.unwrap_or_default();
      match run_cancellable(socket, &mut ws.notices, ws.session.generate_question(&topic)).await {
        Outcome::Done(text) => ServerWsMessage::Question { text },
        Outcome::Aborted => ServerWsMessage::Aborted,
        Outcome::Closed => return None,
      }
    }

    ClientWsMessage::SubmitAnswer { answer } => {
      match run_cancellable(socket, &mut ws.notices, ws.session.submit_answer(&answer)).await {
        Outcome::Done(evaluation) => {
          info!(target: "quiz", correct = evaluation.is_correct, "WS submit_answer evaluated");
          ServerWsMessage::Evaluation { evaluation }
        }
        Outcome::Aborted => ServerWsMessage::Aborted,
        Outcome::Closed => return None,
      }
    }

    ClientWsMessage::Ask { question } => {
      match run_cancellable(socket, &mut ws.notices, ws.session.answer_general_question(&question)).await {
        Outcome::Done(text) => ServerWsMessage::Answer { text },
        Outcome::Aborted => ServerWsMessage::Aborted,
        Outcome::Closed => return None,
      }
    }

    ClientWsMessage::Reset => {
      ws.reset();
      info!(target: "quiz", "WS session reset");
      ServerWsMessage::Reset
    }

    ClientWsMessage::Abort => ServerWsMessage::Error { message: "Nothing to abort.".into() },
  };
  Some(reply)
}

/// Drive `op` while watching the socket for `abort` and forwarding retry notices.
async fn run_cancellable<T, F>(
  socket: &mut WebSocket,
  notices: &mut UnboundedReceiver<RetryNotice>,
  op: F,
) -> Outcome<T>
where
  F: Future<Output = T>,
{
  tokio::pin!(op);
  let outcome = loop {
    tokio::select! {
      out = &mut op => break Outcome::Done(out),
      Some(notice) = notices.recv() => {
        if send_msg(socket, &ServerWsMessage::from(notice)).await.is_err() {
          break Outcome::Closed;
        }
      }
      incoming = socket.recv() => match incoming {
        Some(Ok(Message::Text(txt))) => match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(ClientWsMessage::Abort) => {
            warn!(target: "quiz", "Operation aborted by client");
            break Outcome::Aborted;
          }
          _ => {
            if send_msg(socket, &ServerWsMessage::Error { message: "busy".into() }).await.is_err() {
              break Outcome::Closed;
            }
          }
        },
        Some(Ok(Message::Ping(payload))) => { let _ = socket.send(Message::Pong(payload)).await; }
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break Outcome::Closed,
        Some(Ok(_)) => {}
      },
    }
  };
  // Notices from a finished or dropped operation are stale.
  while notices.try_recv().is_ok() {}
  outcome
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  use futures::{SinkExt, StreamExt};
  use serde_json::{json, Value};
  use tokio::{net::TcpStream, time::timeout};
  use tokio_tungstenite::{connect_async, tungstenite::Message as Frame, MaybeTlsStream, WebSocketStream};

  use crate::config::TutorConfig;
  use crate::domain::FailurePolicy;
  use crate::error::ConversationError;
  use crate::routes::build_router;
  use crate::test_utils::ScriptedFactory;

  type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

  fn blocked() -> Result<String, ConversationError> {
    Err(ConversationError::Safety("blocked".into()))
  }

  /// Serve the router on an ephemeral port with unbounded WS retry and connect to `/ws`.
  async fn connect(f: &ScriptedFactory) -> Client {
    let mut cfg = TutorConfig::default();
    cfg.policy.ws = FailurePolicy::Retry { max_attempts: None };
    let state = Arc::new(AppState::new(cfg, Arc::new(f.clone()), None));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
      axum::serve(listener, build_router(state)).await.expect("server");
    });

    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.expect("connect");
    client
  }

  async fn send(client: &mut Client, msg: Value) {
    client.send(Frame::Text(msg.to_string())).await.expect("send");
  }

  async fn recv(client: &mut Client) -> Value {
    loop {
      let frame = timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("websocket error");
      match frame {
        Frame::Text(text) => return serde_json::from_str(&text).expect("json frame"),
        Frame::Ping(_) | Frame::Pong(_) => {}
        other => panic!("unexpected frame: {other:?}"),
      }
    }
  }

  /// Next frame that is not a `retrying` notice.
  async fn recv_after_retries(client: &mut Client) -> Value {
    loop {
      let v = recv(client).await;
      if v["type"] != "retrying" {
        return v;
      }
    }
  }

  #[tokio::test]
  async fn ping_and_invalid_json_are_answered_when_idle() {
    let f = ScriptedFactory::new();
    let mut client = connect(&f).await;

    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut client).await, json!({"type": "pong"}));

    client.send(Frame::Text("{nope".into())).await.expect("send");
    let v = recv(&mut client).await;
    assert_eq!(v["type"], "error");
    assert!(v["message"].as_str().expect("message").starts_with("Invalid JSON"));

    send(&mut client, json!({"type": "abort"})).await;
    assert_eq!(recv(&mut client).await, json!({"type": "error", "message": "Nothing to abort."}));
  }

  #[tokio::test]
  async fn retries_are_streamed_and_abort_then_reset_starts_fresh() {
    let f = ScriptedFactory::new().reply("Question: What is APR?").always(blocked());
    let mut client = connect(&f).await;

    send(&mut client, json!({"type": "new_question", "topic": "credit"})).await;
    assert_eq!(recv(&mut client).await, json!({"type": "question", "text": "What is APR?"}));

    // Every further completion is rejected; the second question retries until aborted.
    send(&mut client, json!({"type": "new_question", "topic": "budgeting"})).await;
    assert_eq!(
      recv(&mut client).await,
      json!({"type": "retrying", "stage": "question", "attempt": 2, "reason": "safety_rejection"})
    );

    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv_after_retries(&mut client).await, json!({"type": "error", "message": "busy"}));

    send(&mut client, json!({"type": "abort"})).await;
    assert_eq!(recv_after_retries(&mut client).await, json!({"type": "aborted"}));

    // No stale notices follow the abort.
    send(&mut client, json!({"type": "reset"})).await;
    assert_eq!(recv(&mut client).await, json!({"type": "reset"}));

    let sent = f.sent();
    assert!(sent.len() >= 2);
    assert!(sent[1..].iter().all(|p| p.chat == 1 && p.prior_turns == 1));

    f.push(Ok("Question: What is a budget?".into()));
    send(&mut client, json!({"type": "new_question", "topic": "budgeting"})).await;
    assert_eq!(recv(&mut client).await, json!({"type": "question", "text": "What is a budget?"}));

    let last = f.sent().last().cloned().expect("sent");
    assert_eq!(last.chat, 2);
    assert_eq!(last.prior_turns, 0);
  }

  #[tokio::test]
  async fn closing_the_socket_cancels_the_call_in_flight() {
    let f = ScriptedFactory::new().always(blocked());
    let mut client = connect(&f).await;

    send(&mut client, json!({"type": "new_question"})).await;
    assert_eq!(recv(&mut client).await["type"], "retrying");
    drop(client);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = f.calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.calls(), settled);
  }
}
