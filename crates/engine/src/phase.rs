//! Per-user phase progression.
//!
//! Phases only move forward: Learning → Gradual → FullAuth. Promotion is
//! gated on the number of sessions folded into the cumulative vector. The
//! engine drives the FullAuth promotion protocol (baseline write, then phase
//! write, then the in-memory flip); this module only answers "is a promotion
//! due".

use contauth_config::LearningConfig;

use crate::schema::{Phase, UserProfile};

#[derive(Debug, Clone)]
pub struct PhaseStateMachine {
    gradual_after: u64,
    full_auth_after: u64,
}

impl PhaseStateMachine {
    pub fn new(config: &LearningConfig) -> Self {
        Self {
            gradual_after: config.gradual_after,
            full_auth_after: config.full_auth_after,
        }
    }

    /// The next phase the profile qualifies for, if any. One step at a time;
    /// idempotent on already-promoted profiles.
    pub fn evaluate(&self, profile: &UserProfile) -> Option<Phase> {
        match profile.phase {
            Phase::Learning if profile.cumulative_count >= self.gradual_after => {
                Some(Phase::Gradual)
            }
            Phase::Gradual if profile.cumulative_count >= self.full_auth_after => {
                Some(Phase::FullAuth)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use contauth_config::LearningConfig;
    use uuid::Uuid;

    use super::PhaseStateMachine;
    use crate::schema::{Phase, UserProfile};

    fn profile(phase: Phase, count: u64) -> UserProfile {
        let mut p = UserProfile::new("u", Uuid::nil(), 4);
        p.phase = phase;
        p.cumulative_count = count;
        p
    }

    fn machine() -> PhaseStateMachine {
        PhaseStateMachine::new(&LearningConfig::default())
    }

    #[test]
    fn learning_promotes_at_five_sessions() {
        let m = machine();
        assert_eq!(m.evaluate(&profile(Phase::Learning, 4)), None);
        assert_eq!(m.evaluate(&profile(Phase::Learning, 5)), Some(Phase::Gradual));
        assert_eq!(m.evaluate(&profile(Phase::Learning, 50)), Some(Phase::Gradual));
    }

    #[test]
    fn gradual_promotes_at_ten_sessions() {
        let m = machine();
        assert_eq!(m.evaluate(&profile(Phase::Gradual, 9)), None);
        assert_eq!(m.evaluate(&profile(Phase::Gradual, 10)), Some(Phase::FullAuth));
    }

    #[test]
    fn full_auth_is_terminal() {
        let m = machine();
        assert_eq!(m.evaluate(&profile(Phase::FullAuth, 100)), None);
    }

    #[test]
    fn no_backward_transitions() {
        let m = machine();
        // A gradual profile below the gradual gate stays where it is.
        assert_eq!(m.evaluate(&profile(Phase::Gradual, 2)), None);
    }
}
