use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::vector::VectorStats;

/// Width of the behavioral feature vector produced by the shipped extractor.
pub const VECTOR_DIMENSION: usize = 90;

/// Kind of a stored vector. Each kind gets its own similarity index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorKind {
    /// One vector per processed session.
    Session,
    /// The user's evolving profile centroid (EMA of accepted sessions).
    Cumulative,
    /// Snapshot of the cumulative vector taken at full-auth promotion.
    Baseline,
}

impl VectorKind {
    pub fn slug(self) -> &'static str {
        match self {
            VectorKind::Session => "session",
            VectorKind::Cumulative => "cumulative",
            VectorKind::Baseline => "baseline",
        }
    }
}

/// Per-user authentication phase. Only forward transitions exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "learning")]
    Learning,
    #[serde(rename = "gradual_risk")]
    Gradual,
    #[serde(rename = "full_auth")]
    FullAuth,
}

impl Phase {
    pub fn slug(self) -> &'static str {
        match self {
            Phase::Learning => "learning",
            Phase::Gradual => "gradual_risk",
            Phase::FullAuth => "full_auth",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Challenge,
    Block,
    Learn,
}

impl Decision {
    pub fn slug(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Challenge => "challenge",
            Decision::Block => "block",
            Decision::Learn => "learn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// A persisted vector row. `id` is assigned by the repository, or carries a
/// `local_` prefix when durability could not be achieved and the record lives
/// only in process memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    /// Internal (deterministic) user id.
    pub user_id: Uuid,
    /// Real session id for session vectors; a synthetic marker such as
    /// `cumulative_7` for derived kinds.
    pub session_id: String,
    pub vector_data: Vec<f32>,
    pub vector_type: VectorKind,
    pub confidence_score: f32,
    pub feature_source: String,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// In-memory per-user profile state.
#[derive(Debug, Clone)]
pub struct UserProfile {
    /// Opaque id as supplied by the caller.
    pub external_id: String,
    /// Deterministic function of `external_id`; the repository key.
    pub internal_id: Uuid,
    /// Zero vector until the first accepted session.
    pub cumulative: Vec<f32>,
    /// Present iff the user has reached full authentication at least once.
    pub baseline: Option<Vec<f32>>,
    /// Number of non-blocked sessions folded into `cumulative`.
    pub cumulative_count: u64,
    pub last_updated: DateTime<Utc>,
    pub phase: Phase,
}

impl UserProfile {
    pub fn new(external_id: impl Into<String>, internal_id: Uuid, dimension: usize) -> Self {
        Self {
            external_id: external_id.into(),
            internal_id,
            cumulative: vec![0.0; dimension],
            baseline: None,
            cumulative_count: 0,
            last_updated: Utc::now(),
            phase: Phase::Learning,
        }
    }
}

/// A nearest-neighbor hit from one of the similarity indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarMatch {
    pub similarity: f32,
    /// Insertion position within the index the hit came from.
    pub index: usize,
    pub kind: VectorKind,
}

/// Outcome of analysing one behavioral event batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub similarity: f32,
    pub confidence: f32,
    pub decision: Decision,
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<String>,
    pub similar_vectors: Vec<SimilarMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_stats: Option<VectorStats>,
}

impl AnalysisResult {
    /// A bare `learn` result used by short-circuit paths.
    pub fn learn(confidence: f32, risk_level: RiskLevel, risk_factor: impl Into<String>) -> Self {
        Self {
            similarity: 0.0,
            confidence,
            decision: Decision::Learn,
            risk_level,
            risk_factors: vec![risk_factor.into()],
            similar_vectors: Vec::new(),
            vector_id: None,
            session_vector: None,
            vector_stats: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Decision, Phase, VectorKind};

    #[test]
    fn phase_ordering_is_forward() {
        assert!(Phase::Learning < Phase::Gradual);
        assert!(Phase::Gradual < Phase::FullAuth);
    }

    #[test]
    fn slugs_match_wire_names() {
        assert_eq!(Phase::Gradual.slug(), "gradual_risk");
        assert_eq!(VectorKind::Cumulative.slug(), "cumulative");
        assert_eq!(Decision::Challenge.slug(), "challenge");
    }

    #[test]
    fn phase_serde_uses_wire_names() {
        let rendered = serde_json::to_string(&Phase::FullAuth).unwrap();
        assert_eq!(rendered, "\"full_auth\"");
        let parsed: Phase = serde_json::from_str("\"gradual_risk\"").unwrap();
        assert_eq!(parsed, Phase::Gradual);
    }
}
