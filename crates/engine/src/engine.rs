//! `AuthEngine` — end-to-end orchestration of one behavioral session.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  AuthEngine                                                 │
//! │                                                             │
//! │  FeatureExtractor (injected)  →  session vector             │
//! │  SimilarityIndex              →  session / cumulative /     │
//! │                                  baseline k-NN              │
//! │  ProfileCache                 →  per-user evolving profile  │
//! │  DecisionEngine               →  allow/challenge/block/learn│
//! │  PhaseStateMachine            →  learning → gradual →       │
//! │                                  full-auth promotion        │
//! │  VectorRepository (injected)  →  best-effort durability     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The in-memory state (profiles + indices) is authoritative for the process
//! lifetime; the repository is a write-behind copy. Repository failures are
//! retried once with jitter, then logged and absorbed — a decision is always
//! returned, and errors never escalate a session to `allow`.
//!
//! Requests for the same user serialize on a per-user mutex from profile
//! load through phase evaluation, so concurrent sessions cannot lose
//! cumulative updates. Requests for different users do not contend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contauth_config::{EngineConfig, ThresholdConfig};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::ProfileCache;
use crate::decision::DecisionEngine;
use crate::error::{EngineError, RepositoryError};
use crate::extract::{EventLog, FeatureExtractor};
use crate::ident;
use crate::index::SimilarityIndex;
use crate::phase::PhaseStateMachine;
use crate::repository::VectorRepository;
use crate::schema::{
    AnalysisResult, Decision, Phase, RiskLevel, UserProfile, VectorKind, VectorRecord,
};
use crate::vector;

// ── Public statistics types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct UserStats {
    pub user_id: String,
    pub vector_count: u64,
    pub has_baseline: bool,
    pub last_updated: DateTime<Utc>,
    pub phase: Phase,
    pub cumulative_norm: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub session_count: usize,
    pub cumulative_count: usize,
    pub baseline_count: usize,
    pub cached_profiles: usize,
    pub dimension: usize,
    pub thresholds: ThresholdConfig,
}

/// How far a user is from their next phase promotion.
#[derive(Debug, Clone, Serialize)]
pub struct LearningStatus {
    pub phase: Phase,
    pub vector_count: u64,
    pub sessions_to_next_phase: u64,
    pub baseline_created: bool,
    pub last_updated: DateTime<Utc>,
}

/// Vectors restored into the indices by [`AuthEngine::warm_start`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmStartSummary {
    pub session: usize,
    pub cumulative: usize,
    pub baseline: usize,
}

// ── AuthEngine ────────────────────────────────────────────────────────────────

pub struct AuthEngine {
    config: EngineConfig,
    dimension: usize,
    extractor: Arc<dyn FeatureExtractor>,
    repository: Arc<dyn VectorRepository>,
    index: SimilarityIndex,
    profiles: ProfileCache,
    decisions: DecisionEngine,
    phases: PhaseStateMachine,
    repo_timeout: Duration,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AuthEngine {
    pub fn new(
        config: EngineConfig,
        extractor: Arc<dyn FeatureExtractor>,
        repository: Arc<dyn VectorRepository>,
    ) -> Self {
        let dimension = extractor.dimension();
        let repo_timeout = Duration::from_secs(config.repository.timeout_secs);
        info!(dimension, "behavioral authentication engine initialized");
        Self {
            dimension,
            index: SimilarityIndex::new(dimension),
            profiles: ProfileCache::new(
                repository.clone(),
                dimension,
                config.cache.profile_capacity,
                repo_timeout,
            ),
            decisions: DecisionEngine::new(&config),
            phases: PhaseStateMachine::new(&config.learning),
            repo_timeout,
            extractor,
            repository,
            config,
            user_locks: DashMap::new(),
        }
    }

    // ── Public API ────────────────────────────────────────────────────────────

    /// Analyse one behavioral event batch and fold it into the user's
    /// profile.
    pub async fn process_session(
        &self,
        external_user_id: &str,
        session_id: &str,
        logs: &[EventLog],
        phase_override: Option<Phase>,
    ) -> Result<AnalysisResult, EngineError> {
        info!(
            user = external_user_id,
            session = session_id,
            events = logs.len(),
            "processing session"
        );

        if logs.is_empty() {
            warn!(user = external_user_id, "empty event batch");
            return Ok(AnalysisResult::learn(
                0.5,
                RiskLevel::Medium,
                "No behavioral data provided",
            ));
        }

        let raw = self.extractor.extract(logs).await;
        if raw.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                got: raw.len(),
            });
        }
        let session_vector = vector::normalize(&raw);
        let stats = vector::stats(&session_vector);
        let internal_id = ident::internal_id(external_user_id);

        let record =
            self.session_record(external_user_id, internal_id, session_id, &session_vector, logs);

        // A zero vector means extraction found nothing usable. Keep the
        // record for diagnostics but skip profile learning entirely.
        if stats.non_zero_count == 0 {
            warn!(user = external_user_id, session = session_id, "extracted vector is all zeros");
            self.index.add(VectorKind::Session, session_vector.clone())?;
            let vector_id = self.persist_or_local(&record).await;
            let mut result = AnalysisResult::learn(
                0.3,
                RiskLevel::Medium,
                "Invalid behavioral vector generated",
            );
            result.vector_id = Some(vector_id);
            result.session_vector = Some(session_vector);
            result.vector_stats = Some(stats);
            return Ok(result);
        }

        self.index.add(VectorKind::Session, session_vector.clone())?;
        let vector_id = self.persist_or_local(&record).await;

        // Profile load through phase evaluation serialize per user.
        let lock = self.user_lock(external_user_id);
        let _guard = lock.lock().await;

        let mut profile = self.profiles.get(external_user_id).await;
        let phase = phase_override.unwrap_or(profile.phase);

        // Strict comparison needs a stable reference; snapshot the baseline
        // before the first full-auth evaluation. A profile with too little
        // history keeps comparing against the cumulative vector instead.
        if phase == Phase::FullAuth
            && profile.baseline.is_none()
            && profile.cumulative_count >= self.config.learning.full_auth_after
        {
            if let Err(err) = self.create_baseline(&mut profile).await {
                warn!(
                    user = external_user_id,
                    %err,
                    "baseline snapshot failed, comparing against cumulative only"
                );
            }
        }

        let mut result = self.decisions.evaluate(phase, &session_vector, &profile, &self.index);

        self.fold_session(&mut profile, &session_vector, result.decision).await?;
        self.evaluate_promotion(&mut profile).await;

        info!(
            user = external_user_id,
            decision = result.decision.slug(),
            similarity = result.similarity,
            confidence = result.confidence,
            "session analyzed"
        );

        result.vector_id = Some(vector_id);
        result.session_vector = Some(session_vector);
        result.vector_stats = Some(stats);
        Ok(result)
    }

    /// Fold the stored vector of a finished session into the cumulative
    /// profile (the session was implicitly accepted by running to
    /// completion) and re-check promotions.
    pub async fn end_session(
        &self,
        external_user_id: &str,
        session_id: &str,
    ) -> Result<(), EngineError> {
        let record = match self
            .repo_call("by_session", || {
                self.repository.by_session(session_id, VectorKind::Session)
            })
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(session = session_id, "no session vector found, skipping end-of-session fold");
                return Ok(());
            }
            Err(err) => {
                warn!(session = session_id, %err, "session lookup failed, skipping end-of-session fold");
                return Ok(());
            }
        };

        if record.vector_data.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                got: record.vector_data.len(),
            });
        }
        let session_vector = vector::normalize(&record.vector_data);

        let lock = self.user_lock(external_user_id);
        let _guard = lock.lock().await;

        let mut profile = self.profiles.get(external_user_id).await;
        self.fold_session(&mut profile, &session_vector, Decision::Allow).await?;
        self.evaluate_promotion(&mut profile).await;
        debug!(user = external_user_id, session = session_id, "end-of-session fold complete");
        Ok(())
    }

    pub async fn user_stats(&self, external_user_id: &str) -> UserStats {
        let profile = self.profiles.get(external_user_id).await;
        UserStats {
            user_id: external_user_id.to_string(),
            vector_count: profile.cumulative_count,
            has_baseline: profile.baseline.is_some(),
            last_updated: profile.last_updated,
            phase: profile.phase,
            cumulative_norm: vector::l2_norm(&profile.cumulative),
        }
    }

    pub async fn learning_status(&self, external_user_id: &str) -> LearningStatus {
        let profile = self.profiles.get(external_user_id).await;
        let sessions_to_next_phase = match profile.phase {
            Phase::Learning => self
                .config
                .learning
                .gradual_after
                .saturating_sub(profile.cumulative_count),
            Phase::Gradual => self
                .config
                .learning
                .full_auth_after
                .saturating_sub(profile.cumulative_count),
            Phase::FullAuth => 0,
        };
        LearningStatus {
            phase: profile.phase,
            vector_count: profile.cumulative_count,
            sessions_to_next_phase,
            baseline_created: profile.baseline.is_some(),
            last_updated: profile.last_updated,
        }
    }

    pub fn engine_stats(&self) -> EngineStats {
        EngineStats {
            session_count: self.index.len(VectorKind::Session),
            cumulative_count: self.index.len(VectorKind::Cumulative),
            baseline_count: self.index.len(VectorKind::Baseline),
            cached_profiles: self.profiles.len(),
            dimension: self.dimension,
            thresholds: self.config.thresholds.clone(),
        }
    }

    /// Restore previously persisted vectors into the similarity indices.
    /// Call once at startup; kinds that fail to load are skipped with a
    /// warning.
    pub async fn warm_start(&self) -> Result<WarmStartSummary, EngineError> {
        let mut summary = WarmStartSummary::default();
        for kind in [VectorKind::Session, VectorKind::Cumulative, VectorKind::Baseline] {
            let records = match self
                .repo_call("all_of_kind", || self.repository.all_of_kind(kind))
                .await
            {
                Ok(records) => records,
                Err(err) => {
                    warn!(kind = kind.slug(), %err, "index warm-up skipped");
                    continue;
                }
            };

            let mut loaded = 0usize;
            for record in records {
                if record.vector_data.len() != self.dimension {
                    warn!(id = record.id, kind = kind.slug(), "skipping mis-sized stored vector");
                    continue;
                }
                self.index.add(kind, vector::normalize(&record.vector_data))?;
                loaded += 1;
            }
            match kind {
                VectorKind::Session => summary.session = loaded,
                VectorKind::Cumulative => summary.cumulative = loaded,
                VectorKind::Baseline => summary.baseline = loaded,
            }
            info!(kind = kind.slug(), loaded, "index warmed from repository");
        }
        Ok(summary)
    }

    // ── Cumulative learning ───────────────────────────────────────────────────

    /// EMA-fold an accepted session vector into the profile. Blocked
    /// sessions never touch the cumulative state.
    async fn fold_session(
        &self,
        profile: &mut UserProfile,
        session_vector: &[f32],
        decision: Decision,
    ) -> Result<(), EngineError> {
        if decision == Decision::Block {
            return Ok(());
        }

        let alpha = self.config.learning.ema_alpha;
        let updated: Vec<f32> = if profile.cumulative_count == 0 {
            session_vector.to_vec()
        } else {
            profile
                .cumulative
                .iter()
                .zip(session_vector)
                .map(|(c, s)| (1.0 - alpha) * c + alpha * s)
                .collect()
        };

        // Everything downstream (indices, repository, decision math) assumes
        // unit-or-zero norm. A fold that breaks it (NaN/Inf input) must fail
        // the request before the profile mutates.
        let folded = vector::normalize(&updated);
        let norm = vector::l2_norm(&folded);
        if !(norm == 0.0 || (norm - 1.0).abs() < 1e-6) {
            return Err(EngineError::InvariantViolated(format!(
                "cumulative vector norm {norm} after fold for user {}",
                profile.external_id
            )));
        }

        profile.cumulative = folded;
        profile.cumulative_count += 1;
        profile.last_updated = Utc::now();

        // In-memory profile first, then the index, then durability.
        self.profiles.update(profile.clone());
        self.index.add(VectorKind::Cumulative, profile.cumulative.clone())?;
        let record = self.cumulative_record(profile, decision);
        self.persist_or_local(&record).await;

        debug!(
            user = %profile.external_id,
            count = profile.cumulative_count,
            "cumulative vector updated"
        );
        Ok(())
    }

    /// Snapshot the cumulative vector as the user's stable baseline. The
    /// repository write must land; a profile is never treated as baselined
    /// on the strength of in-memory state alone.
    async fn create_baseline(&self, profile: &mut UserProfile) -> Result<(), EngineError> {
        let record = self.baseline_record(profile);
        let record_id = self.persist_record(&record).await?;

        profile.baseline = Some(profile.cumulative.clone());
        self.index.add(VectorKind::Baseline, profile.cumulative.clone())?;
        self.profiles.update(profile.clone());
        info!(user = %profile.external_id, record = record_id, "baseline vector created");
        Ok(())
    }

    /// Advance the phase when the promotion predicate holds. Full-auth
    /// promotion requires both the baseline and the phase write to land
    /// before the in-memory phase moves; on failure the promotion is
    /// retried after the next cumulative update.
    async fn evaluate_promotion(&self, profile: &mut UserProfile) {
        let Some(next) = self.phases.evaluate(profile) else {
            return;
        };

        if next == Phase::FullAuth && profile.baseline.is_none() {
            if let Err(err) = self.create_baseline(profile).await {
                warn!(user = %profile.external_id, %err, "baseline creation failed, promotion deferred");
                return;
            }
        }

        if let Err(err) = self
            .repo_call("set_user_phase", || {
                self.repository.set_user_phase(profile.internal_id, next)
            })
            .await
        {
            if next == Phase::FullAuth {
                warn!(user = %profile.external_id, %err, "phase write failed, promotion deferred");
                return;
            }
            warn!(user = %profile.external_id, %err, "phase write failed, keeping in-memory promotion");
        }

        profile.phase = next;
        self.profiles.update(profile.clone());
        info!(
            user = %profile.external_id,
            phase = next.slug(),
            count = profile.cumulative_count,
            "phase transition"
        );
    }

    // ── Persistence plumbing ──────────────────────────────────────────────────

    /// One repository call under the configured timeout, retried once with
    /// jitter on transient failure.
    async fn repo_call<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T, RepositoryError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        match tokio::time::timeout(self.repo_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if err.is_transient() => {
                warn!(op, %err, "transient repository failure, retrying once");
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                warn!(op, "repository call timed out, retrying once");
            }
        }

        let jitter_ms = self.config.repository.retry_jitter_ms;
        if jitter_ms > 0 {
            let delay = rand::rng().random_range(0..=jitter_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        match tokio::time::timeout(self.repo_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(RepositoryError::Timeout),
        }
    }

    /// Persist a record, healing a missing user row once via `ensure_user`.
    async fn persist_record(&self, record: &VectorRecord) -> Result<String, RepositoryError> {
        match self
            .repo_call("put_vector", || self.repository.put_vector(record))
            .await
        {
            Err(RepositoryError::ForeignKeyMissing) => {
                let external_id = record
                    .metadata
                    .get("original_user_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                info!(user = external_id, "user row missing, creating it");

                let mut metadata = Map::new();
                metadata.insert("auto_created".to_string(), Value::Bool(true));
                metadata
                    .insert("purpose".to_string(), json!("behavioral_vector_storage"));
                self.repo_call("ensure_user", || {
                    self.repository.ensure_user(record.user_id, &external_id, &metadata)
                })
                .await?;

                self.repo_call("put_vector", || self.repository.put_vector(record))
                    .await
            }
            other => other,
        }
    }

    /// Persist, or fall back to a synthetic `local_` id when durability
    /// cannot be achieved. The in-memory indices already hold the vector,
    /// so analysis quality is unaffected.
    async fn persist_or_local(&self, record: &VectorRecord) -> String {
        match self.persist_record(record).await {
            Ok(id) => id,
            Err(err) => {
                let id = local_record_id(record);
                warn!(
                    user = %record.user_id,
                    kind = record.vector_type.slug(),
                    %err,
                    id,
                    "persistence failed, record kept in memory only"
                );
                id
            }
        }
    }

    // ── Record construction ───────────────────────────────────────────────────

    fn session_record(
        &self,
        external_id: &str,
        internal_id: Uuid,
        session_id: &str,
        session_vector: &[f32],
        logs: &[EventLog],
    ) -> VectorRecord {
        let mut event_types: Vec<&str> =
            logs.iter().map(|log| log.event_type.as_str()).collect();
        event_types.sort();
        event_types.dedup();

        let mut metadata = Map::new();
        metadata.insert("original_user_id".to_string(), json!(external_id));
        metadata.insert("event_count".to_string(), json!(logs.len()));
        metadata.insert("event_types".to_string(), json!(event_types));
        metadata.insert(
            "vector_quality".to_string(),
            json!(session_vector.iter().map(|x| x.abs()).sum::<f32>()),
        );
        if let Some(duration) = session_duration_secs(logs) {
            metadata.insert("session_duration".to_string(), json!(duration));
        }

        VectorRecord {
            id: String::new(),
            user_id: internal_id,
            session_id: session_id.to_string(),
            vector_data: session_vector.to_vec(),
            vector_type: VectorKind::Session,
            confidence_score: 0.8,
            feature_source: "mobile_behavioral_data".to_string(),
            metadata,
            created_at: Utc::now(),
        }
    }

    fn cumulative_record(&self, profile: &UserProfile, decision: Decision) -> VectorRecord {
        let mut metadata = Map::new();
        metadata.insert("original_user_id".to_string(), json!(profile.external_id));
        metadata.insert("vector_count".to_string(), json!(profile.cumulative_count));
        metadata.insert(
            "learning_rate".to_string(),
            json!(self.config.learning.ema_alpha),
        );
        metadata.insert("decision_context".to_string(), json!(decision.slug()));

        VectorRecord {
            id: String::new(),
            user_id: profile.internal_id,
            session_id: format!("cumulative_{}", profile.cumulative_count),
            vector_data: profile.cumulative.clone(),
            vector_type: VectorKind::Cumulative,
            confidence_score: 0.9,
            feature_source: "cumulative_learning".to_string(),
            metadata,
            created_at: profile.last_updated,
        }
    }

    fn baseline_record(&self, profile: &UserProfile) -> VectorRecord {
        let now = Utc::now();
        let mut metadata = Map::new();
        metadata.insert("original_user_id".to_string(), json!(profile.external_id));
        metadata.insert(
            "created_from_vector_count".to_string(),
            json!(profile.cumulative_count),
        );
        metadata.insert("creation_timestamp".to_string(), json!(now.to_rfc3339()));

        VectorRecord {
            id: String::new(),
            user_id: profile.internal_id,
            session_id: format!("baseline_{}", now.timestamp()),
            vector_data: profile.cumulative.clone(),
            vector_type: VectorKind::Baseline,
            confidence_score: 0.95,
            feature_source: "baseline_creation".to_string(),
            metadata,
            created_at: now,
        }
    }

    fn user_lock(&self, external_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(external_id.to_string())
            .or_default()
            .clone()
    }
}

fn local_record_id(record: &VectorRecord) -> String {
    let owner = record
        .metadata
        .get("original_user_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| record.user_id.to_string());
    format!("local_{}_{}_{}", owner, record.session_id, Utc::now().timestamp())
}

fn session_duration_secs(logs: &[EventLog]) -> Option<f64> {
    let stamps: Vec<DateTime<Utc>> = logs.iter().filter_map(|log| log.timestamp).collect();
    let first = stamps.iter().min()?;
    let last = stamps.iter().max()?;
    Some((*last - *first).num_milliseconds() as f64 / 1000.0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
