//! As-of alignment of heterogeneous signal streams onto a per-asset grid.
//!
//! Each source is swept forward in time alongside the grid: a point becomes
//! visible only once the grid reaches its timestamp, so a row can never see a
//! point from its future.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::error::SigtraderError;
use super::signal::SignalPoint;
use super::source::SignalSource;

/// Value fed to learned models for a source with no usable point.
pub const MISSING_SENTINEL: f64 = f64::NAN;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizerConfig {
    /// Maximum age of a carried-forward point.
    pub staleness_tolerance: TimeDelta,
    /// Minimum number of grid rows with at least one present source.
    /// Zero disables the check.
    pub min_history: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        NormalizerConfig {
            staleness_tolerance: TimeDelta::days(5),
            min_history: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceCell {
    Present(SignalPoint),
    Missing { source_id: String },
}

impl SourceCell {
    pub fn source_id(&self) -> &str {
        match self {
            SourceCell::Present(p) => &p.source_id,
            SourceCell::Missing { source_id } => source_id,
        }
    }

    pub fn point(&self) -> Option<&SignalPoint> {
        match self {
            SourceCell::Present(p) => Some(p),
            SourceCell::Missing { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameRow {
    pub asset_id: String,
    pub timestamp: DateTime<Utc>,
    /// One cell per configured source, in configured order.
    pub cells: Vec<SourceCell>,
}

impl FrameRow {
    pub fn has_data(&self) -> bool {
        self.cells.iter().any(|c| c.point().is_some())
    }

    /// Confidence-weighted strengths, with [`MISSING_SENTINEL`] for absent
    /// sources.
    pub fn features(&self) -> Vec<f64> {
        self.cells
            .iter()
            .map(|c| match c.point() {
                Some(p) => p.strength * p.confidence,
                None => MISSING_SENTINEL,
            })
            .collect()
    }
}

/// A source whose last value aged past the staleness tolerance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataGap {
    pub asset_id: String,
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFrame {
    pub asset_id: String,
    pub source_ids: Vec<String>,
    pub rows: Vec<FrameRow>,
    pub gaps: Vec<DataGap>,
}

impl NormalizedFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.rows.iter().map(|r| r.timestamp).collect()
    }

    pub fn populated_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.has_data()).count()
    }
}

/// Pull points from every source and align them onto `grid`.
pub fn normalize(
    asset_id: &str,
    sources: &[&dyn SignalSource],
    grid: &[DateTime<Utc>],
    config: &NormalizerConfig,
) -> Result<NormalizedFrame, SigtraderError> {
    validate_grid(asset_id, grid)?;

    let mut columns: Vec<(String, Vec<SignalPoint>)> = Vec::with_capacity(sources.len());
    if let (Some(&first), Some(&last)) = (grid.first(), grid.last()) {
        let start = first
            .checked_sub_signed(config.staleness_tolerance)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        for source in sources {
            let points = source.produce(asset_id, start, last)?;
            columns.push((source.source_id().to_string(), points));
        }
    } else {
        for source in sources {
            columns.push((source.source_id().to_string(), Vec::new()));
        }
    }

    build_frame(asset_id, columns, grid, config)
}

/// Align pre-fetched points, one list per source id, onto `grid`.
pub fn normalize_points(
    asset_id: &str,
    source_ids: &[String],
    points: &[SignalPoint],
    grid: &[DateTime<Utc>],
    config: &NormalizerConfig,
) -> Result<NormalizedFrame, SigtraderError> {
    validate_grid(asset_id, grid)?;
    let columns = source_ids
        .iter()
        .map(|id| {
            let own: Vec<SignalPoint> = points
                .iter()
                .filter(|p| &p.source_id == id && p.asset_id == asset_id)
                .cloned()
                .collect();
            (id.clone(), own)
        })
        .collect();
    build_frame(asset_id, columns, grid, config)
}

fn validate_grid(asset_id: &str, grid: &[DateTime<Utc>]) -> Result<(), SigtraderError> {
    if let Some(pair) = grid.windows(2).find(|w| w[0] >= w[1]) {
        return Err(SigtraderError::InvalidGrid {
            asset_id: asset_id.to_string(),
            reason: format!("{} is not after {}", pair[1], pair[0]),
        });
    }
    Ok(())
}

fn build_frame(
    asset_id: &str,
    columns: Vec<(String, Vec<SignalPoint>)>,
    grid: &[DateTime<Utc>],
    config: &NormalizerConfig,
) -> Result<NormalizedFrame, SigtraderError> {
    let mut rows: Vec<FrameRow> = grid
        .iter()
        .map(|&timestamp| FrameRow {
            asset_id: asset_id.to_string(),
            timestamp,
            cells: Vec::with_capacity(columns.len()),
        })
        .collect();
    let mut gaps = Vec::new();
    let mut source_ids = Vec::with_capacity(columns.len());

    for (source_id, mut points) in columns {
        // Stable, so the later of two same-timestamp points wins the sweep.
        points.sort_by_key(|p| p.timestamp);

        let mut next = 0usize;
        let mut latest: Option<usize> = None;
        let mut in_gap = false;

        for row in rows.iter_mut() {
            let t = row.timestamp;
            while next < points.len() && points[next].timestamp <= t {
                latest = Some(next);
                next += 1;
            }

            let cell = match latest {
                Some(i) if t - points[i].timestamp <= config.staleness_tolerance => {
                    in_gap = false;
                    SourceCell::Present(points[i].clone())
                }
                Some(i) => {
                    if !in_gap {
                        let last_seen = points[i].timestamp;
                        warn!(
                            asset = asset_id,
                            source = %source_id,
                            at = %t,
                            %last_seen,
                            "data gap: source value is stale, treating as absent"
                        );
                        gaps.push(DataGap {
                            asset_id: asset_id.to_string(),
                            source_id: source_id.clone(),
                            timestamp: t,
                            last_seen,
                        });
                        in_gap = true;
                    }
                    SourceCell::Missing {
                        source_id: source_id.clone(),
                    }
                }
                None => SourceCell::Missing {
                    source_id: source_id.clone(),
                },
            };
            row.cells.push(cell);
        }
        source_ids.push(source_id);
    }

    let frame = NormalizedFrame {
        asset_id: asset_id.to_string(),
        source_ids,
        rows,
        gaps,
    };

    let populated = frame.populated_rows();
    debug!(
        asset = asset_id,
        rows = frame.len(),
        populated,
        gaps = frame.gaps.len(),
        "normalized signal frame"
    );
    if populated < config.min_history {
        return Err(SigtraderError::InsufficientHistory {
            asset_id: asset_id.to_string(),
            available: populated,
            required: config.min_history,
        });
    }

    Ok(frame)
}
