//! Load-through, write-through cache of user profiles.
//!
//! Misses are filled from the repository (latest cumulative + baseline
//! records and the stored phase). A failed load degrades to a fresh
//! zero-initialized profile in the learning phase — profile reads never fail
//! a request. Residence is bounded by an LRU sized to the expected
//! concurrent-session count.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lru::LruCache;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::ident;
use crate::repository::VectorRepository;
use crate::schema::{Phase, UserProfile, VectorKind};

pub struct ProfileCache {
    repository: Arc<dyn VectorRepository>,
    dimension: usize,
    timeout: Duration,
    profiles: Mutex<LruCache<String, UserProfile>>,
}

impl ProfileCache {
    pub fn new(
        repository: Arc<dyn VectorRepository>,
        dimension: usize,
        capacity: usize,
        timeout: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        Self {
            repository,
            dimension,
            timeout,
            profiles: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Resident profile, or one loaded from the repository. Falls back to a
    /// zero-initialized learning-phase profile when the load fails.
    pub async fn get(&self, external_id: &str) -> UserProfile {
        if let Some(profile) = self.lock().get(external_id).cloned() {
            return profile;
        }

        let internal_id = ident::internal_id(external_id);
        let profile = match tokio::time::timeout(self.timeout, self.load(external_id, internal_id))
            .await
            .unwrap_or(Err(RepositoryError::Timeout))
        {
            Ok(profile) => profile,
            Err(err) => {
                warn!(user = external_id, %err, "profile load failed, starting fresh");
                UserProfile::new(external_id, internal_id, self.dimension)
            }
        };

        self.lock().put(external_id.to_string(), profile.clone());
        profile
    }

    /// Atomically replace the cached profile after a cumulative update or
    /// phase transition.
    pub fn update(&self, profile: UserProfile) {
        self.lock().put(profile.external_id.clone(), profile);
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.lock().contains(external_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, UserProfile>> {
        self.profiles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn load(
        &self,
        external_id: &str,
        internal_id: Uuid,
    ) -> Result<UserProfile, RepositoryError> {
        let mut profile = UserProfile::new(external_id, internal_id, self.dimension);

        if let Some(record) = self
            .repository
            .latest(internal_id, VectorKind::Cumulative)
            .await?
        {
            profile.cumulative_count = record
                .metadata
                .get("vector_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(1);
            profile.last_updated = record.created_at;
            profile.cumulative = record.vector_data;
            debug!(
                user = external_id,
                count = profile.cumulative_count,
                "loaded cumulative vector"
            );
        }

        if let Some(record) = self
            .repository
            .latest(internal_id, VectorKind::Baseline)
            .await?
        {
            profile.baseline = Some(record.vector_data);
        }

        profile.phase = self
            .repository
            .get_user_phase(internal_id)
            .await?
            .unwrap_or(Phase::Learning);

        Ok(profile)
    }
}
