//! Feature extraction boundary.
//!
//! The engine consumes extraction through [`FeatureExtractor`]; the shipped
//! [`StatisticalExtractor`] is a deterministic reference implementation that
//! buckets raw mobile event logs into per-family summary statistics. Real
//! deployments substitute their own extractor behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::VECTOR_DIMENSION;

/// One raw behavioral event as reported by the mobile client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    pub event_type: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Value,
}

impl EventLog {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: None,
            data,
        }
    }
}

/// Maps an event-log batch to a fixed-dimension feature vector.
///
/// Contract: pure and deterministic for a given input; never fails — unusable
/// input yields the zero vector instead.
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn extract(&self, logs: &[EventLog]) -> Vec<f32>;

    /// Output width. Fixed for the lifetime of the extractor.
    fn dimension(&self) -> usize;
}

// ── Reference extractor ───────────────────────────────────────────────────────

/// Event families, each owning a fixed slice of the output vector.
const FAMILIES: [&str; 6] = ["touch", "scroll", "accel", "gyro", "key", "timing"];

/// Slots reserved per family: up to five numeric fields × (mean, std, range).
const SLOTS_PER_FAMILY: usize = VECTOR_DIMENSION / FAMILIES.len();

/// Deterministic per-family statistics over the numeric fields of each event.
///
/// Fields are visited in lexicographic order so equal inputs always produce
/// equal vectors. The `timing` family summarizes inter-event gaps instead of
/// payload fields.
#[derive(Debug, Default, Clone)]
pub struct StatisticalExtractor;

#[async_trait]
impl FeatureExtractor for StatisticalExtractor {
    async fn extract(&self, logs: &[EventLog]) -> Vec<f32> {
        let mut out = vec![0.0_f32; VECTOR_DIMENSION];
        if logs.is_empty() {
            return out;
        }

        for (slot, family) in FAMILIES.iter().enumerate() {
            let base = slot * SLOTS_PER_FAMILY;
            if *family == "timing" {
                fill_block(&mut out[base..base + 3], &event_gaps_secs(logs));
                continue;
            }

            let members: Vec<&EventLog> = logs
                .iter()
                .filter(|log| family_of(&log.event_type) == Some(*family))
                .collect();
            if members.is_empty() {
                continue;
            }

            // Union of numeric field names across the family, sorted.
            let mut fields: Vec<String> = members
                .iter()
                .flat_map(|log| numeric_fields(&log.data))
                .collect();
            fields.sort();
            fields.dedup();

            for (i, field) in fields.iter().take(SLOTS_PER_FAMILY / 3).enumerate() {
                let values: Vec<f32> = members
                    .iter()
                    .filter_map(|log| numeric_field(&log.data, field))
                    .collect();
                fill_block(&mut out[base + i * 3..base + i * 3 + 3], &values);
            }
        }

        out
    }

    fn dimension(&self) -> usize {
        VECTOR_DIMENSION
    }
}

fn family_of(event_type: &str) -> Option<&'static str> {
    let lowered = event_type.to_ascii_lowercase();
    FAMILIES[..FAMILIES.len() - 1]
        .iter()
        .find(|family| lowered.contains(*family))
        .copied()
        .or(if lowered.contains("motion") {
            Some("accel")
        } else {
            None
        })
}

fn numeric_fields(data: &Value) -> Vec<String> {
    data.as_object()
        .map(|map| {
            map.iter()
                .filter(|(_, v)| v.is_number())
                .map(|(k, _)| k.clone())
                .collect()
        })
        .unwrap_or_default()
}

fn numeric_field(data: &Value, field: &str) -> Option<f32> {
    data.get(field)?.as_f64().map(|v| v as f32)
}

/// Write `(mean, std, range)` of `values` into a three-slot block.
fn fill_block(block: &mut [f32], values: &[f32]) {
    if values.is_empty() {
        return;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / values.len() as f32;
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    block[0] = mean;
    block[1] = variance.sqrt();
    block[2] = max - min;
}

/// Gaps between consecutive timestamped events, in seconds.
fn event_gaps_secs(logs: &[EventLog]) -> Vec<f32> {
    let mut stamps: Vec<DateTime<Utc>> = logs.iter().filter_map(|log| log.timestamp).collect();
    stamps.sort();
    stamps
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f32 / 1000.0)
        .collect()
}
