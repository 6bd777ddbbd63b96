use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use analyst_core::{
    DatasetContext, Downgrade, IntentRouter, ProviderConfig, Question, SessionMemoryStore,
};

use crate::config::AnalystLoopConfig;
use crate::engine::CapabilityEngine;
use crate::error::SessionError;
use crate::runner::{run_conclusions, run_question, Answer};
use crate::session::Session;

/// Owns all live sessions.
///
/// Each session sits behind its own mutex, so requests to one session run one
/// at a time while different sessions proceed in parallel. Every session has a
/// cancellation token; each request works on a child of it.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<Session>>>>>,
    cancel_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
    engine: Arc<dyn CapabilityEngine>,
    router: Arc<IntentRouter>,
    config: Arc<AnalystLoopConfig>,
}

impl SessionManager {
    pub fn new(engine: Arc<dyn CapabilityEngine>, config: AnalystLoopConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            cancel_tokens: Arc::new(RwLock::new(HashMap::new())),
            engine,
            router: Arc::new(IntentRouter::new()),
            config: Arc::new(config),
        }
    }

    /// Opens a fresh session for a newly loaded dataset.
    pub async fn open_session(&self, dataset: DatasetContext) -> Result<String, SessionError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.open_session_with_id(&session_id, dataset).await?;
        Ok(session_id)
    }

    /// Opens (or reloads) a session under a known id. A previous session with
    /// the same id is cancelled and replaced. Persisted memory is restored only
    /// when it was recorded for the same dataset; otherwise the session starts
    /// empty and the stale record is overwritten.
    pub async fn open_session_with_id(
        &self,
        session_id: &str,
        dataset: DatasetContext,
    ) -> Result<(), SessionError> {
        if let Some(previous) = self
            .cancel_tokens
            .write()
            .await
            .insert(session_id.to_string(), CancellationToken::new())
        {
            previous.cancel();
        }
        let previous = self.sessions.write().await.remove(session_id);
        if let Some(previous) = previous {
            // let the cancelled request finish before touching the record
            drop(previous.lock().await);
        }

        let mut session = Session::new(session_id, dataset, &self.config);

        if let Some(storage) = &self.config.storage {
            let dataset_line = session.dataset().summary_line();
            match storage.load_record(session_id).await? {
                Some(record) if record.dataset_info.as_deref() == Some(dataset_line.as_str()) => {
                    info!("Restoring memory for session {}", session_id);
                    session = session.with_memory(SessionMemoryStore::from_record(
                        record,
                        self.config.memory_limits,
                    ));
                }
                Some(record) => {
                    info!(
                        "Session {} reloaded with {} (was {:?}), starting fresh memory",
                        session_id, dataset_line, record.dataset_info
                    );
                    storage
                        .save_record(session_id, &session.memory().record())
                        .await?;
                }
                None => {}
            }
        }

        info!(
            "Opened session {} for {} on {}",
            session_id,
            session.dataset().summary_line(),
            session.provider_config().provider_id()
        );

        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), Arc::new(Mutex::new(session)));
        Ok(())
    }

    async fn session(&self, session_id: &str) -> Result<Arc<Mutex<Session>>, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    async fn request_token(&self, session_id: &str) -> Result<CancellationToken, SessionError> {
        self.cancel_tokens
            .read()
            .await
            .get(session_id)
            .map(CancellationToken::child_token)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    pub async fn ask(&self, session_id: &str, question: &str) -> Result<Answer, SessionError> {
        self.ask_with(session_id, question, false).await
    }

    /// Like [`Self::ask`]; `visualization_only` skips the narrative step and
    /// always produces a chart.
    pub async fn ask_with(
        &self,
        session_id: &str,
        question: &str,
        visualization_only: bool,
    ) -> Result<Answer, SessionError> {
        let handle = self.session(session_id).await?;
        // taken before queueing on the lock so `cancel` reaches waiting requests
        let token = self.request_token(session_id).await?;
        let mut session = handle.lock().await;
        let question = Question::new(question);

        let run = run_question(
            &mut session,
            self.engine.as_ref(),
            &self.router,
            &question,
            visualization_only,
            &token,
        );
        let answer = self.with_deadline(run, &token).await;

        self.persist(&handle, &session).await;
        Ok(answer)
    }

    /// Runs [`Self::ask`] as its own task.
    pub fn spawn_ask(
        &self,
        session_id: impl Into<String>,
        question: impl Into<String>,
    ) -> JoinHandle<Result<Answer, SessionError>> {
        let manager = self.clone();
        let session_id = session_id.into();
        let question = question.into();
        tokio::spawn(async move { manager.ask(&session_id, &question).await })
    }

    pub async fn conclusions(&self, session_id: &str) -> Result<Answer, SessionError> {
        let handle = self.session(session_id).await?;
        let token = self.request_token(session_id).await?;
        let mut session = handle.lock().await;

        let run = run_conclusions(&mut session, self.engine.as_ref(), &token);
        let answer = self.with_deadline(run, &token).await;

        self.persist(&handle, &session).await;
        Ok(answer)
    }

    /// Cancels `token` when the request deadline passes, then lets the
    /// request wind down to its `Cancelled` result.
    async fn with_deadline<F>(&self, run: F, token: &CancellationToken) -> Answer
    where
        F: std::future::Future<Output = Answer>,
    {
        tokio::pin!(run);
        tokio::select! {
            answer = &mut run => answer,
            _ = tokio::time::sleep(self.config.request_timeout) => {
                warn!("Request exceeded {:?}, cancelling", self.config.request_timeout);
                token.cancel();
                run.await
            }
        }
    }

    pub async fn set_provider(
        &self,
        session_id: &str,
        config: ProviderConfig,
    ) -> Result<Option<Downgrade>, SessionError> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        Ok(session.set_provider(config))
    }

    /// Cancels every in-flight request of the session. Later requests get a
    /// fresh token.
    pub async fn cancel(&self, session_id: &str) -> Result<(), SessionError> {
        let mut tokens = self.cancel_tokens.write().await;
        let token = tokens
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        token.cancel();
        *token = CancellationToken::new();
        info!("Cancelled requests for session {}", session_id);
        Ok(())
    }

    /// Clears the session memory, keeping dataset and provider.
    pub async fn reset(&self, session_id: &str) -> Result<(), SessionError> {
        self.cancel(session_id).await?;
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        session.reset();
        if let Some(storage) = &self.config.storage {
            storage
                .save_record(session_id, &session.memory().record())
                .await?;
        }
        Ok(())
    }

    /// Drops the session and its persisted memory. Returns whether it existed.
    pub async fn close(&self, session_id: &str) -> Result<bool, SessionError> {
        if let Some(token) = self.cancel_tokens.write().await.remove(session_id) {
            token.cancel();
        }
        let removed = self.sessions.write().await.remove(session_id);
        let existed = removed.is_some();
        // an in-flight request persists under the session lock; wait for it
        let _idle = match &removed {
            Some(session) => Some(session.lock().await),
            None => None,
        };
        if let Some(storage) = &self.config.storage {
            storage.delete_record(session_id).await?;
        }
        if existed {
            info!("Closed session {}", session_id);
        }
        Ok(existed)
    }

    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn provider_config(&self, session_id: &str) -> Result<ProviderConfig, SessionError> {
        let session = self.session(session_id).await?;
        let session = session.lock().await;
        Ok(session.provider_config().clone())
    }

    pub async fn memory_summary(&self, session_id: &str) -> Result<String, SessionError> {
        let session = self.session(session_id).await?;
        let session = session.lock().await;
        Ok(session.memory().default_summary())
    }

    /// Saves memory unless the session was closed or replaced meanwhile.
    /// Callers hold the session lock, which `close` also takes before
    /// deleting the record.
    async fn persist(&self, handle: &Arc<Mutex<Session>>, session: &Session) {
        let Some(storage) = &self.config.storage else {
            return;
        };
        let current = self
            .sessions
            .read()
            .await
            .get(session.id())
            .is_some_and(|live| Arc::ptr_eq(live, handle));
        if !current {
            info!("Session {} is gone, not saving its memory", session.id());
            return;
        }
        if let Err(error) = storage
            .save_record(session.id(), &session.memory().record())
            .await
        {
            warn!("Failed to save memory for session {}: {}", session.id(), error);
        }
    }
}
