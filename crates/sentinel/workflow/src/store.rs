//! Session storage with optimistic concurrency
//!
//! Every mutation goes through [`SessionStore::compare_and_update`], keyed
//! on the session's strictly monotonic `updated_at`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sentinel_types::{SentinelError, SentinelResult, Session, SessionId, WorkflowDefinition};

/// Keyed, versioned session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a `pending` session for the definition
    async fn create(
        &self,
        definition: &WorkflowDefinition,
        input: serde_json::Value,
    ) -> SentinelResult<Session>;

    /// Fetch a session by id
    async fn get(&self, id: &SessionId) -> SentinelResult<Session>;

    /// Replace the stored session only if its `updated_at` still equals
    /// `expected`. Returns `false` and leaves the store untouched otherwise.
    async fn compare_and_update(
        &self,
        id: &SessionId,
        expected: DateTime<Utc>,
        new_session: Session,
    ) -> SentinelResult<bool>;

    /// Delete a session, returning whether it existed
    async fn delete(&self, id: &SessionId) -> SentinelResult<bool>;

    async fn list(&self) -> SentinelResult<Vec<Session>>;
}

/// In-memory session store for development and testing
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(
        &self,
        definition: &WorkflowDefinition,
        input: serde_json::Value,
    ) -> SentinelResult<Session> {
        let session = Session::new(definition, input);
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Err(SentinelError::Internal(format!(
                "session id collision: {}",
                session.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(session)
            }
        }
    }

    async fn get(&self, id: &SessionId) -> SentinelResult<Session> {
        self.sessions
            .get(id)
            .map(|s| s.value().clone())
            .ok_or_else(|| SentinelError::SessionNotFound(id.clone()))
    }

    async fn compare_and_update(
        &self,
        id: &SessionId,
        expected: DateTime<Utc>,
        new_session: Session,
    ) -> SentinelResult<bool> {
        // The shard lock is held for the whole check-and-swap
        let mut current = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SentinelError::SessionNotFound(id.clone()))?;

        if current.updated_at != expected {
            tracing::debug!(
                session_id = %id,
                expected = %expected,
                actual = %current.updated_at,
                "Stale session write rejected"
            );
            return Ok(false);
        }

        *current = new_session;
        Ok(true)
    }

    async fn delete(&self, id: &SessionId) -> SentinelResult<bool> {
        Ok(self.sessions.remove(id).is_some())
    }

    async fn list(&self) -> SentinelResult<Vec<Session>> {
        Ok(self.sessions.iter().map(|s| s.value().clone()).collect())
    }
}
