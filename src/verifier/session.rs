use std::{collections::BTreeMap, fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tracing::{debug, warn};

use crate::core::authorization_request::{parameters::SessionId, AuthorizationRequest};

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub status: Status,
    pub authorization_request: AuthorizationRequest,
    pub expires_at: Instant,
}

impl Session {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The request has been handed out, no response has arrived yet.
    Issued,
    /// A response has arrived and has not been accepted or rejected yet.
    PendingResponse,
    /// Verifier has finished processing the response.
    Complete(Outcome),
}

impl Status {
    pub fn is_complete(&self) -> bool {
        matches!(self, Status::Complete(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The response is verified and authenticates `subject`.
    Verified { subject: String },
    /// The response was rejected.
    Failed { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session not found")]
    NotFound,
    #[error("session already exists")]
    AlreadyExists,
    #[error("session is already complete")]
    AlreadyComplete,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Storage interface for session information.
///
/// Implementations must make [SessionStore::initiate] an insert-if-absent and
/// [SessionStore::complete] a compare-and-set, so that concurrent callers cannot overwrite one
/// another. Expired sessions behave as if they were absent.
#[async_trait]
pub trait SessionStore: Debug {
    /// Store a new authorization request session.
    async fn initiate(&self, session: Session) -> Result<(), SessionStoreError>;

    /// Get a session from the store.
    async fn get_session(&self, session_id: &SessionId) -> Result<Session, SessionStoreError>;

    /// Update the status of a session that is not complete yet.
    async fn update_status(
        &self,
        session_id: &SessionId,
        status: Status,
    ) -> Result<(), SessionStoreError>;

    /// Record the outcome of a session, unless another caller already did.
    async fn complete(
        &self,
        session_id: &SessionId,
        outcome: Outcome,
    ) -> Result<(), SessionStoreError>;

    /// Remove a session from the store.
    async fn remove_session(&self, session_id: &SessionId) -> Result<(), SessionStoreError>;

    /// Remove every expired session, returning how many were removed.
    async fn remove_expired(&self) -> Result<usize, SessionStoreError>;
}

/// A local in-memory store.
///
/// # Warning
/// Sessions live in process memory: they are lost on restart and are not shared between
/// replicas of a distributed deployment.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    store: Arc<Mutex<BTreeMap<SessionId, Session>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn initiate(&self, session: Session) -> Result<(), SessionStoreError> {
        let mut store = self.store.lock().await;
        if let Some(existing) = store.get(&session.session_id) {
            if !existing.is_expired(Instant::now()) {
                return Err(SessionStoreError::AlreadyExists);
            }
        }
        store.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Session, SessionStoreError> {
        let store = self.store.lock().await;
        match store.get(session_id) {
            Some(session) if !session.is_expired(Instant::now()) => Ok(session.clone()),
            _ => Err(SessionStoreError::NotFound),
        }
    }

    async fn update_status(
        &self,
        session_id: &SessionId,
        status: Status,
    ) -> Result<(), SessionStoreError> {
        let mut store = self.store.lock().await;
        let session = live_session(&mut store, session_id)?;
        if session.status.is_complete() {
            return Err(SessionStoreError::AlreadyComplete);
        }
        session.status = status;
        Ok(())
    }

    async fn complete(
        &self,
        session_id: &SessionId,
        outcome: Outcome,
    ) -> Result<(), SessionStoreError> {
        let mut store = self.store.lock().await;
        let session = live_session(&mut store, session_id)?;
        if session.status.is_complete() {
            return Err(SessionStoreError::AlreadyComplete);
        }
        session.status = Status::Complete(outcome);
        Ok(())
    }

    async fn remove_session(&self, session_id: &SessionId) -> Result<(), SessionStoreError> {
        if self.store.lock().await.remove(session_id).is_some() {
            return Ok(());
        }
        Err(SessionStoreError::NotFound)
    }

    async fn remove_expired(&self) -> Result<usize, SessionStoreError> {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        let before = store.len();
        store.retain(|_, session| !session.is_expired(now));
        Ok(before - store.len())
    }
}

fn live_session<'a>(
    store: &'a mut BTreeMap<SessionId, Session>,
    session_id: &SessionId,
) -> Result<&'a mut Session, SessionStoreError> {
    match store.get_mut(session_id) {
        Some(session) if !session.is_expired(Instant::now()) => Ok(session),
        _ => Err(SessionStoreError::NotFound),
    }
}

/// Periodically remove expired sessions from `store`.
pub fn spawn_expiry_sweep(
    store: Arc<dyn SessionStore + Send + Sync>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match store.remove_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "removed expired sessions"),
                Err(e) => warn!("failed to remove expired sessions: {e}"),
            }
        }
    })
}
