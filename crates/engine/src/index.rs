//! In-memory nearest-neighbor search over normalized vectors.
//!
//! One flat inner-product structure per [`VectorKind`]. Exhaustive
//! dot-product scan is exact and fast enough at this design's scale (≤10⁶
//! vectors per kind); entries are append-only and never re-ordered, so an
//! entry's insertion position is a stable handle.
//!
//! Readers run concurrently; writers serialize per kind. A reader observes
//! either the pre-append or post-append state, never a torn view.

use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::error::EngineError;
use crate::schema::{SimilarMatch, VectorKind};
use crate::vector::dot;

pub struct SimilarityIndex {
    dimension: usize,
    session: RwLock<Vec<Vec<f32>>>,
    cumulative: RwLock<Vec<Vec<f32>>>,
    baseline: RwLock<Vec<Vec<f32>>>,
}

impl SimilarityIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            session: RwLock::new(Vec::new()),
            cumulative: RwLock::new(Vec::new()),
            baseline: RwLock::new(Vec::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn shard(&self, kind: VectorKind) -> &RwLock<Vec<Vec<f32>>> {
        match kind {
            VectorKind::Session => &self.session,
            VectorKind::Cumulative => &self.cumulative,
            VectorKind::Baseline => &self.baseline,
        }
    }

    /// Append a normalized vector; returns its insertion position.
    pub fn add(&self, kind: VectorKind, vector: Vec<f32>) -> Result<usize, EngineError> {
        if vector.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        let mut entries = self
            .shard(kind)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let position = entries.len();
        entries.push(vector);
        debug!(kind = kind.slug(), position, "vector indexed");
        Ok(position)
    }

    /// Up to `k` entries with the highest inner product against `query`,
    /// descending; ties keep insertion order (older first). An empty index
    /// yields an empty result, never an error.
    pub fn search(&self, kind: VectorKind, query: &[f32], k: usize) -> Vec<SimilarMatch> {
        if k == 0 {
            return Vec::new();
        }
        let entries = self
            .shard(kind)
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut scored: Vec<SimilarMatch> = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| SimilarMatch {
                similarity: dot(entry, query),
                index,
                kind,
            })
            .collect();
        // Stable sort: equal similarities retain ascending insertion order.
        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(k);
        scored
    }

    pub fn len(&self, kind: VectorKind) -> usize {
        self.shard(kind)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self, kind: VectorKind) -> bool {
        self.len(kind) == 0
    }
}
