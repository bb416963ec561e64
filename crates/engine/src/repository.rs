//! Persistence boundary.
//!
//! The relational store lives behind [`VectorRepository`]; the engine treats
//! it as a write-behind copy of the in-memory truth. Every call may fail
//! transiently — the engine, not the repository, decides how much failure it
//! tolerates.
//!
//! [`InMemoryRepository`] is the reference implementation used by tests and
//! by deployments that run without a database at all.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::schema::{Phase, VectorKind, VectorRecord};

#[async_trait]
pub trait VectorRepository: Send + Sync {
    /// Persist a record; returns the assigned record id.
    ///
    /// May fail with [`RepositoryError::ForeignKeyMissing`] when the owning
    /// user row does not exist yet.
    async fn put_vector(&self, record: &VectorRecord) -> Result<String, RepositoryError>;

    /// Most recent record of `kind` for a user.
    async fn latest(
        &self,
        user_id: Uuid,
        kind: VectorKind,
    ) -> Result<Option<VectorRecord>, RepositoryError>;

    /// Most recent record of `kind` for a session.
    async fn by_session(
        &self,
        session_id: &str,
        kind: VectorKind,
    ) -> Result<Option<VectorRecord>, RepositoryError>;

    /// Every stored record of `kind`, oldest first. Used to warm the
    /// similarity indices at startup.
    async fn all_of_kind(&self, kind: VectorKind) -> Result<Vec<VectorRecord>, RepositoryError>;

    async fn get_user_phase(&self, user_id: Uuid) -> Result<Option<Phase>, RepositoryError>;

    async fn set_user_phase(&self, user_id: Uuid, phase: Phase) -> Result<(), RepositoryError>;

    /// Create the user row if absent; idempotent.
    async fn ensure_user(
        &self,
        user_id: Uuid,
        external_id: &str,
        metadata: &Map<String, Value>,
    ) -> Result<(), RepositoryError>;
}

// ── In-memory reference implementation ────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryRepository {
    records: RwLock<Vec<VectorRecord>>,
    phases: RwLock<HashMap<Uuid, Phase>>,
    users: RwLock<HashSet<Uuid>>,
    /// Mimic the relational store's user foreign key. Off by default so unit
    /// tests don't have to seed users first.
    enforce_user_fk: bool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `put_vector` for unknown users the way the SQL store does.
    pub fn with_user_fk() -> Self {
        Self {
            enforce_user_fk: true,
            ..Self::default()
        }
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl VectorRepository for InMemoryRepository {
    async fn put_vector(&self, record: &VectorRecord) -> Result<String, RepositoryError> {
        if self.enforce_user_fk && !self.users.read().await.contains(&record.user_id) {
            return Err(RepositoryError::ForeignKeyMissing);
        }
        let id = Uuid::new_v4().to_string();
        let mut stored = record.clone();
        stored.id = id.clone();
        self.records.write().await.push(stored);
        Ok(id)
    }

    async fn latest(
        &self,
        user_id: Uuid,
        kind: VectorKind,
    ) -> Result<Option<VectorRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .find(|r| r.user_id == user_id && r.vector_type == kind)
            .cloned())
    }

    async fn by_session(
        &self,
        session_id: &str,
        kind: VectorKind,
    ) -> Result<Option<VectorRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .find(|r| r.session_id == session_id && r.vector_type == kind)
            .cloned())
    }

    async fn all_of_kind(&self, kind: VectorKind) -> Result<Vec<VectorRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.vector_type == kind)
            .cloned()
            .collect())
    }

    async fn get_user_phase(&self, user_id: Uuid) -> Result<Option<Phase>, RepositoryError> {
        Ok(self.phases.read().await.get(&user_id).copied())
    }

    async fn set_user_phase(&self, user_id: Uuid, phase: Phase) -> Result<(), RepositoryError> {
        self.phases.write().await.insert(user_id, phase);
        Ok(())
    }

    async fn ensure_user(
        &self,
        user_id: Uuid,
        _external_id: &str,
        _metadata: &Map<String, Value>,
    ) -> Result<(), RepositoryError> {
        self.users.write().await.insert(user_id);
        Ok(())
    }
}
