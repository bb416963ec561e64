use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Similarity thresholds per learning phase.
///
/// `learning` is carried for completeness but no decision path reads it —
/// during the learning phase every session resolves to `learn` regardless of
/// similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub learning: f32,
    pub gradual: f32,
    pub full_auth: f32,
    /// A gradual-phase similarity in `[gradual * ratio, gradual)` yields a
    /// challenge instead of a block.
    pub gradual_challenge_ratio: f32,
    /// Same rule for the full-auth phase, applied to `full_auth`.
    pub full_auth_challenge_ratio: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            learning: 0.3,
            gradual: 0.6,
            full_auth: 0.8,
            gradual_challenge_ratio: 0.7,
            full_auth_challenge_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// EMA learning rate for cumulative-vector updates.
    pub ema_alpha: f32,
    /// Sessions folded in before a user leaves the learning phase.
    pub gradual_after: u64,
    /// Sessions folded in before a user is promoted to full authentication.
    pub full_auth_after: u64,
    /// Below this count the gradual phase keeps returning `learn`.
    pub gradual_min_sessions: u64,
    /// Confidence ramps as `count / learning_confidence_window`, capped at 0.8.
    pub learning_confidence_window: u64,
    pub gradual_confidence_window: u64,
    pub full_auth_confidence: f32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.1,
            gradual_after: 5,
            full_auth_after: 10,
            gradual_min_sessions: 3,
            learning_confidence_window: 5,
            gradual_confidence_window: 10,
            full_auth_confidence: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Similar vectors attached to learning-phase results.
    pub learning_top_k: usize,
    /// Similar vectors attached to full-auth results.
    pub full_auth_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            learning_top_k: 3,
            full_auth_top_k: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Upper bound on any single repository call.
    pub timeout_secs: u64,
    /// Maximum jitter before the single retry of a transient failure.
    pub retry_jitter_ms: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            retry_jitter_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// LRU bound on resident user profiles; size to the expected number of
    /// concurrent sessions.
    pub profile_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            profile_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub thresholds: ThresholdConfig,
    pub learning: LearningConfig,
    pub retrieval: RetrievalConfig,
    pub repository: RepositoryConfig,
    pub cache: CacheConfig,
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("CONTAUTH_LOG") {
            if !value.is_empty() {
                config.telemetry.log_level = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::EngineConfig;

    #[test]
    fn defaults_match_reference_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.thresholds.gradual, 0.6);
        assert_eq!(config.thresholds.full_auth, 0.8);
        assert_eq!(config.learning.ema_alpha, 0.1);
        assert_eq!(config.learning.gradual_after, 5);
        assert_eq!(config.learning.full_auth_after, 10);
        assert_eq!(config.repository.timeout_secs, 5);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = EngineConfig::load_from(dir.path().join("does-not-exist.toml"))?;
        assert_eq!(config.retrieval.full_auth_top_k, 5);
        Ok(())
    }

    #[test]
    fn save_and_reload_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("engine.toml");

        let mut config = EngineConfig::default();
        config.thresholds.gradual = 0.55;
        config.cache.profile_capacity = 64;
        config.save_to(&path)?;

        let reloaded = EngineConfig::load_from(&path)?;
        assert_eq!(reloaded.thresholds.gradual, 0.55);
        assert_eq!(reloaded.cache.profile_capacity, 64);
        Ok(())
    }

    #[test]
    fn partial_toml_keeps_other_sections_at_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[thresholds]\ngradual = 0.5\n")?;

        let config = EngineConfig::load_from(&path)?;
        assert_eq!(config.thresholds.gradual, 0.5);
        assert_eq!(config.thresholds.full_auth, 0.8);
        assert_eq!(config.learning.gradual_after, 5);
        Ok(())
    }
}
