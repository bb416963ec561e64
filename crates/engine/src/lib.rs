pub mod cache;
pub mod decision;
pub mod engine;
pub mod error;
pub mod extract;
pub mod ident;
pub mod index;
pub mod phase;
pub mod repository;
pub mod schema;
pub mod vector;

pub use cache::ProfileCache;
pub use decision::DecisionEngine;
pub use engine::{AuthEngine, EngineStats, LearningStatus, UserStats, WarmStartSummary};
pub use error::{EngineError, RepositoryError};
pub use extract::{EventLog, FeatureExtractor, StatisticalExtractor};
pub use index::SimilarityIndex;
pub use phase::PhaseStateMachine;
pub use repository::{InMemoryRepository, VectorRepository};
pub use schema::{
    AnalysisResult, Decision, Phase, RiskLevel, SimilarMatch, UserProfile, VECTOR_DIMENSION,
    VectorKind, VectorRecord,
};
pub use vector::VectorStats;
