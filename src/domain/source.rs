//! Signal source capability.
//!
//! Every upstream producer (indicator scores, forecasts, sentiment, quant
//! models) is exposed through the same small trait so the normalizer can
//! iterate a configured, ordered set of them.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::error::SigtraderError;
use super::signal::SignalPoint;

pub trait SignalSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// Points for `asset_id` with `start <= timestamp <= end`.
    fn produce(
        &self,
        asset_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SignalPoint>, SigtraderError>;
}

/// A source backed by an already-materialized list of points.
#[derive(Debug, Clone)]
pub struct RecordedSource {
    source_id: String,
    points: Vec<SignalPoint>,
}

impl RecordedSource {
    pub fn new(source_id: impl Into<String>, points: Vec<SignalPoint>) -> Self {
        RecordedSource {
            source_id: source_id.into(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl SignalSource for RecordedSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn produce(
        &self,
        asset_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SignalPoint>, SigtraderError> {
        Ok(self
            .points
            .iter()
            .filter(|p| p.asset_id == asset_id && p.timestamp >= start && p.timestamp <= end)
            .cloned()
            .collect())
    }
}

/// Split a mixed feed into one recorded source per configured source id, in
/// the order given. Points from unconfigured sources are dropped.
pub fn partition_by_source(points: &[SignalPoint], source_ids: &[String]) -> Vec<RecordedSource> {
    let mut buckets: BTreeMap<&str, Vec<SignalPoint>> =
        source_ids.iter().map(|id| (id.as_str(), Vec::new())).collect();
    for p in points {
        if let Some(bucket) = buckets.get_mut(p.source_id.as_str()) {
            bucket.push(p.clone());
        }
    }
    source_ids
        .iter()
        .map(|id| RecordedSource::new(id.clone(), buckets.remove(id.as_str()).unwrap_or_default()))
        .collect()
}
