//! Application state: config, collaborators, and the session table.
//!
//! This module owns:
//!   - the tutor config (prompts, fallbacks, policies) shared by all sessions
//!   - the conversation factory (OpenAI or offline)
//!   - the optional resource index (embedder + vector index)
//!   - the session table keyed by session id
//!
//! Every session owns its own conversation; resetting one session never
//! touches another.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::{load_tutor_config_from_env, TutorConfig};
use crate::conversation::{ConversationFactory, OfflineFactory};
use crate::domain::FailurePolicy;
use crate::error::HostError;
use crate::openai::OpenAI;
use crate::pinecone::PineconeIndex;
use crate::resources::ResourceIndex;
use crate::session::QuizSession;

pub type SharedSession = Arc<Mutex<QuizSession>>;

struct SessionEntry {
    session: SharedSession,
    last_used: Instant,
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<TutorConfig>,
    pub conversations: Arc<dyn ConversationFactory>,
    pub resources: Option<Arc<ResourceIndex>>,
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl AppState {
    /// Build state from env: load config, init OpenAI and Pinecone when configured.
    #[instrument(level = "info", skip_all)]
    pub fn from_env() -> Self {
        let cfg = load_tutor_config_from_env().unwrap_or_default();

        let openai = OpenAI::from_env();
        let conversations: Arc<dyn ConversationFactory> = match &openai {
            Some(oa) => {
                info!(target: "quiz_tutor", base_url = %oa.base_url, chat_model = %oa.chat_model, embedding_model = %oa.embedding_model, "OpenAI enabled.");
                Arc::new(oa.clone())
            }
            None => {
                info!(target: "quiz_tutor", "OpenAI disabled (no OPENAI_API_KEY). Every stage will use canned values.");
                Arc::new(OfflineFactory)
            }
        };

        let resources = match (openai, PineconeIndex::from_env()) {
            (Some(oa), Some(pc)) => {
                info!(target: "quiz_tutor", host = %pc.host, namespace = %cfg.resources.namespace, "Resource lookup enabled.");
                Some(Arc::new(ResourceIndex::new(Arc::new(oa), Arc::new(pc), cfg.resources.clone())))
            }
            _ => {
                info!(target: "quiz_tutor", "Resource lookup disabled (needs OPENAI_API_KEY, PINECONE_API_KEY and PINECONE_INDEX_HOST).");
                None
            }
        };

        Self::new(cfg, conversations, resources)
    }

    pub fn new(
        cfg: TutorConfig,
        conversations: Arc<dyn ConversationFactory>,
        resources: Option<Arc<ResourceIndex>>,
    ) -> Self {
        Self {
            cfg: Arc::new(cfg),
            conversations,
            resources,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A fresh session with a new conversation. Not registered in the table.
    pub fn new_session(&self, policy: FailurePolicy) -> QuizSession {
        QuizSession::new(
            self.conversations.start_chat(),
            self.cfg.clone(),
            policy,
            self.resources.clone(),
        )
    }

    fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.sessions.idle_timeout_secs)
    }

    /// Register a new HTTP session and return its id.
    #[instrument(level = "debug", skip(self))]
    pub async fn create_session(&self) -> (String, SharedSession) {
        self.prune_idle().await;
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Mutex::new(self.new_session(self.cfg.policy.http)));
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id.clone(),
            SessionEntry { session: session.clone(), last_used: Instant::now() },
        );
        info!(target: "quiz", session_id = %id, active = sessions.len(), "Session created");
        (id, session)
    }

    /// Look up a session by id and mark it used.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_session(&self, id: &str) -> Result<SharedSession, HostError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| HostError::UnknownSession(id.to_string()))?;
        entry.last_used = Instant::now();
        Ok(entry.session.clone())
    }

    /// Existing session when an id is given, otherwise a new one.
    pub async fn get_or_create(
        &self,
        id: Option<&str>,
    ) -> Result<(String, SharedSession), HostError> {
        match id {
            Some(id) => Ok((id.to_string(), self.get_session(id).await?)),
            None => Ok(self.create_session().await),
        }
    }

    /// Replace one session with a fresh instance; history is discarded.
    #[instrument(level = "info", skip(self))]
    pub async fn reset_session(&self, id: &str) -> Result<(), HostError> {
        let fresh = Arc::new(Mutex::new(self.new_session(self.cfg.policy.http)));
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| HostError::UnknownSession(id.to_string()))?;
        entry.session = fresh;
        entry.last_used = Instant::now();
        info!(target: "quiz", session_id = %id, "Session reset");
        Ok(())
    }

    /// Forget a session entirely.
    #[instrument(level = "info", skip(self))]
    pub async fn remove_session(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions idle longer than the configured timeout.
    #[instrument(level = "debug", skip(self))]
    pub async fn prune_idle(&self) -> usize {
        let timeout = self.idle_timeout();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, e| e.last_used.elapsed() < timeout);
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!(target: "quiz", pruned, active = sessions.len(), "Pruned idle sessions");
        }
        pruned
    }
}
