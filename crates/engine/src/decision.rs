//! Phase-specific authentication policy.
//!
//! Given a normalized session vector and the user's profile, produce the
//! [`AnalysisResult`] for the active phase. All constants come from
//! configuration; the defaults are the reference policy.
//!
//! ```text
//! Learning  → always `learn`; similarity reported for observability only
//! Gradual   → T = 0.6:  allow ≥ T,  challenge ≥ 0.7·T,  block below
//! FullAuth  → T = 0.8:  allow ≥ T,  challenge ≥ 0.8·T,  block below
//!             (similarity = best of baseline and cumulative match)
//! ```

use contauth_config::EngineConfig;

use crate::index::SimilarityIndex;
use crate::schema::{AnalysisResult, Decision, Phase, RiskLevel, UserProfile, VectorKind};
use crate::vector::cosine;

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    gradual_threshold: f32,
    full_auth_threshold: f32,
    gradual_challenge_ratio: f32,
    full_auth_challenge_ratio: f32,
    gradual_min_sessions: u64,
    learning_confidence_window: u64,
    gradual_confidence_window: u64,
    full_auth_confidence: f32,
    learning_top_k: usize,
    full_auth_top_k: usize,
}

impl DecisionEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            gradual_threshold: config.thresholds.gradual,
            full_auth_threshold: config.thresholds.full_auth,
            gradual_challenge_ratio: config.thresholds.gradual_challenge_ratio,
            full_auth_challenge_ratio: config.thresholds.full_auth_challenge_ratio,
            gradual_min_sessions: config.learning.gradual_min_sessions,
            learning_confidence_window: config.learning.learning_confidence_window,
            gradual_confidence_window: config.learning.gradual_confidence_window,
            full_auth_confidence: config.learning.full_auth_confidence,
            learning_top_k: config.retrieval.learning_top_k,
            full_auth_top_k: config.retrieval.full_auth_top_k,
        }
    }

    pub fn evaluate(
        &self,
        phase: Phase,
        session: &[f32],
        profile: &UserProfile,
        index: &SimilarityIndex,
    ) -> AnalysisResult {
        match phase {
            Phase::Learning => self.learning(session, profile, index),
            Phase::Gradual => self.gradual(session, profile),
            Phase::FullAuth => self.full_auth(session, profile, index),
        }
    }

    fn learning(
        &self,
        session: &[f32],
        profile: &UserProfile,
        index: &SimilarityIndex,
    ) -> AnalysisResult {
        if profile.cumulative_count == 0 {
            return AnalysisResult::learn(
                0.2,
                RiskLevel::Low,
                "First session - no baseline for comparison",
            );
        }

        let similarity = cosine(session, &profile.cumulative);
        let confidence = ramp(profile.cumulative_count, self.learning_confidence_window);

        AnalysisResult {
            similarity,
            confidence,
            decision: Decision::Learn,
            risk_level: RiskLevel::Low,
            risk_factors: vec![
                "Learning phase - collecting behavioral data".to_string(),
                format!(
                    "Compared with {} previous sessions",
                    profile.cumulative_count
                ),
            ],
            similar_vectors: index.search(VectorKind::Cumulative, session, self.learning_top_k),
            vector_id: None,
            session_vector: None,
            vector_stats: None,
        }
    }

    fn gradual(&self, session: &[f32], profile: &UserProfile) -> AnalysisResult {
        if profile.cumulative_count < self.gradual_min_sessions {
            let mut result = AnalysisResult::learn(
                0.6,
                RiskLevel::Low,
                "Insufficient data - continue learning",
            );
            result.similarity = 0.8;
            return result;
        }

        let similarity = cosine(session, &profile.cumulative);
        let threshold = self.gradual_threshold;
        let (decision, risk_level, factor) = if similarity >= threshold {
            (Decision::Allow, RiskLevel::Low, "Vector matches user profile")
        } else if similarity >= threshold * self.gradual_challenge_ratio {
            (
                Decision::Challenge,
                RiskLevel::Medium,
                "Moderate deviation from profile",
            )
        } else {
            (
                Decision::Block,
                RiskLevel::High,
                "Significant deviation from profile",
            )
        };

        AnalysisResult {
            similarity,
            confidence: ramp(profile.cumulative_count, self.gradual_confidence_window),
            decision,
            risk_level,
            risk_factors: vec![factor.to_string()],
            similar_vectors: Vec::new(),
            vector_id: None,
            session_vector: None,
            vector_stats: None,
        }
    }

    fn full_auth(
        &self,
        session: &[f32],
        profile: &UserProfile,
        index: &SimilarityIndex,
    ) -> AnalysisResult {
        // The engine snapshots a baseline before a user ever reaches this
        // phase; until that write lands, the cumulative vector stands in.
        let baseline = profile.baseline.as_deref().unwrap_or(&profile.cumulative);
        let similarity = cosine(session, baseline).max(cosine(session, &profile.cumulative));

        let threshold = self.full_auth_threshold;
        let (decision, risk_level, factor) = if similarity >= threshold {
            (Decision::Allow, RiskLevel::Low, "Strong match with user profile")
        } else if similarity >= threshold * self.full_auth_challenge_ratio {
            (
                Decision::Challenge,
                RiskLevel::Medium,
                "Moderate similarity to profile",
            )
        } else {
            (
                Decision::Block,
                RiskLevel::High,
                "Low similarity to established profile",
            )
        };

        AnalysisResult {
            similarity,
            confidence: self.full_auth_confidence,
            decision,
            risk_level,
            risk_factors: vec![factor.to_string()],
            similar_vectors: index.search(VectorKind::Cumulative, session, self.full_auth_top_k),
            vector_id: None,
            session_vector: None,
            vector_stats: None,
        }
    }
}

fn ramp(count: u64, window: u64) -> f32 {
    if window == 0 {
        return 0.8;
    }
    (count as f32 / window as f32).min(0.8)
}

#[cfg(test)]
mod tests {
    use contauth_config::EngineConfig;
    use uuid::Uuid;

    use super::DecisionEngine;
    use crate::index::SimilarityIndex;
    use crate::schema::{Decision, Phase, RiskLevel, UserProfile};

    fn engine() -> DecisionEngine {
        DecisionEngine::new(&EngineConfig::default())
    }

    fn profile(phase: Phase, count: u64, cumulative: Vec<f32>) -> UserProfile {
        let mut p = UserProfile::new("u", Uuid::nil(), cumulative.len());
        p.phase = phase;
        p.cumulative_count = count;
        p.cumulative = cumulative;
        p
    }

    #[test]
    fn first_learning_session_has_no_comparison() {
        let index = SimilarityIndex::new(4);
        let p = profile(Phase::Learning, 0, vec![0.0; 4]);
        let result = engine().evaluate(Phase::Learning, &[1.0, 0.0, 0.0, 0.0], &p, &index);

        assert_eq!(result.decision, Decision::Learn);
        assert_eq!(result.similarity, 0.0);
        assert_eq!(result.confidence, 0.2);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert_eq!(
            result.risk_factors,
            vec!["First session - no baseline for comparison"]
        );
    }

    #[test]
    fn learning_confidence_ramps_with_session_count() {
        let index = SimilarityIndex::new(4);
        let p = profile(Phase::Learning, 2, vec![1.0, 0.0, 0.0, 0.0]);
        let result = engine().evaluate(Phase::Learning, &[1.0, 0.0, 0.0, 0.0], &p, &index);

        assert_eq!(result.decision, Decision::Learn);
        assert!((result.confidence - 0.4).abs() < 1e-6);
        assert!((result.similarity - 1.0).abs() < 1e-6);

        let p = profile(Phase::Learning, 40, vec![1.0, 0.0, 0.0, 0.0]);
        let result = engine().evaluate(Phase::Learning, &[1.0, 0.0, 0.0, 0.0], &p, &index);
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn gradual_with_thin_history_keeps_learning() {
        let index = SimilarityIndex::new(4);
        let p = profile(Phase::Gradual, 2, vec![1.0, 0.0, 0.0, 0.0]);
        let result = engine().evaluate(Phase::Gradual, &[0.0, 1.0, 0.0, 0.0], &p, &index);

        assert_eq!(result.decision, Decision::Learn);
        assert_eq!(result.similarity, 0.8);
        assert_eq!(result.confidence, 0.6);
    }

    #[test]
    fn gradual_bands_allow_challenge_block() {
        let index = SimilarityIndex::new(2);
        let e = engine();
        let p = profile(Phase::Gradual, 5, vec![1.0, 0.0]);

        // cos = 1.0 ≥ 0.6 → allow
        let allow = e.evaluate(Phase::Gradual, &[1.0, 0.0], &p, &index);
        assert_eq!(allow.decision, Decision::Allow);
        assert_eq!(allow.risk_level, RiskLevel::Low);

        // cos = 0.5: between 0.42 and 0.6 → challenge
        let challenge = e.evaluate(Phase::Gradual, &[0.5, 0.866], &p, &index);
        assert_eq!(challenge.decision, Decision::Challenge);
        assert_eq!(challenge.risk_level, RiskLevel::Medium);

        // cos = 0.0 < 0.42 → block
        let block = e.evaluate(Phase::Gradual, &[0.0, 1.0], &p, &index);
        assert_eq!(block.decision, Decision::Block);
        assert_eq!(block.risk_level, RiskLevel::High);
    }

    #[test]
    fn full_auth_uses_best_of_baseline_and_cumulative() {
        let index = SimilarityIndex::new(2);
        let mut p = profile(Phase::FullAuth, 12, vec![0.0, 1.0]);
        p.baseline = Some(vec![1.0, 0.0]);

        // Session matches the baseline, not the drifted cumulative.
        let result = engine().evaluate(Phase::FullAuth, &[1.0, 0.0], &p, &index);
        assert_eq!(result.decision, Decision::Allow);
        assert!((result.similarity - 1.0).abs() < 1e-6);
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn full_auth_without_baseline_falls_back_to_cumulative() {
        let index = SimilarityIndex::new(2);
        let p = profile(Phase::FullAuth, 12, vec![1.0, 0.0]);
        let result = engine().evaluate(Phase::FullAuth, &[1.0, 0.0], &p, &index);
        assert_eq!(result.decision, Decision::Allow);
    }

    #[test]
    fn full_auth_challenge_band_is_stricter() {
        let index = SimilarityIndex::new(2);
        let mut p = profile(Phase::FullAuth, 12, vec![1.0, 0.0]);
        p.baseline = Some(vec![1.0, 0.0]);
        let e = engine();

        // cos = 0.7: between 0.64 and 0.8 → challenge
        let challenge = e.evaluate(Phase::FullAuth, &[0.7, 0.714], &p, &index);
        assert_eq!(challenge.decision, Decision::Challenge);

        // cos = 0.5 < 0.64 → block
        let block = e.evaluate(Phase::FullAuth, &[0.5, 0.866], &p, &index);
        assert_eq!(block.decision, Decision::Block);
    }
}
