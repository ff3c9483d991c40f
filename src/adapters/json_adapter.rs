//! JSON report writer and pre-trained model loader.

use crate::domain::backtest::BacktestResult;
use crate::domain::combiner::LinearCombiner;
use crate::domain::error::SigtraderError;
use crate::domain::signal::AggregatedSignal;
use crate::domain::walk_forward::WalkForwardReport;
use crate::ports::report_port::ReportPort;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Writes results as pretty JSON and decision streams as CSV.
#[derive(Debug, Default)]
pub struct JsonReportAdapter;

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self
    }

    fn sink(output: Option<&Path>) -> Result<Box<dyn Write>, SigtraderError> {
        Ok(match output {
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
            None => Box::new(io::stdout().lock()),
        })
    }

    fn write_json<T: Serialize + ?Sized>(value: &T, output: Option<&Path>) -> Result<(), SigtraderError> {
        let mut sink = Self::sink(output)?;
        serde_json::to_writer_pretty(&mut sink, value).map_err(|e| SigtraderError::Data {
            reason: format!("failed to serialize report: {e}"),
        })?;
        writeln!(sink)?;
        sink.flush()?;
        if let Some(path) = output {
            info!(path = %path.display(), "report written");
        }
        Ok(())
    }
}

impl ReportPort for JsonReportAdapter {
    fn write_backtests(
        &self,
        results: &[BacktestResult],
        output: Option<&Path>,
    ) -> Result<(), SigtraderError> {
        Self::write_json(results, output)
    }

    fn write_walk_forward(
        &self,
        reports: &[WalkForwardReport],
        output: Option<&Path>,
    ) -> Result<(), SigtraderError> {
        Self::write_json(reports, output)
    }

    fn write_decisions(
        &self,
        decisions: &[AggregatedSignal],
        output: Option<&Path>,
    ) -> Result<(), SigtraderError> {
        let mut writer = csv::Writer::from_writer(Self::sink(output)?);
        for decision in decisions {
            writer.serialize(decision).map_err(|e| SigtraderError::Data {
                reason: format!("failed to write decision row: {e}"),
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Read a linear model saved as `{"source_ids": [...], "weights": [...]}`.
pub fn load_linear_model(path: &Path) -> Result<LinearCombiner, SigtraderError> {
    let content = fs::read_to_string(path).map_err(|e| SigtraderError::Model {
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;
    let raw: LinearCombiner = serde_json::from_str(&content).map_err(|e| SigtraderError::Model {
        reason: format!("invalid model file {}: {}", path.display(), e),
    })?;
    LinearCombiner::new(raw.source_ids, raw.weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::Decision;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[test]
    fn decisions_written_as_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("decisions.csv");
        let decisions = vec![
            AggregatedSignal {
                asset_id: "AAPL".into(),
                timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
                decision: Decision::Buy,
                score: 0.75,
            },
            AggregatedSignal {
                asset_id: "AAPL".into(),
                timestamp: Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap(),
                decision: Decision::Hold,
                score: 0.5,
            },
        ];
        JsonReportAdapter::new()
            .write_decisions(&decisions, Some(&path))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "asset_id,timestamp,decision,score");
        assert!(lines[1].starts_with("AAPL,2024-01-15T00:00:00"));
        assert!(lines[1].ends_with(",BUY,0.75"));
        assert!(lines[2].contains(",HOLD,"));
    }

    #[test]
    fn backtests_written_as_json_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        JsonReportAdapter::new().write_backtests(&[], Some(&path)).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value.as_array().unwrap().is_empty());
    }

    #[test]
    fn load_linear_model_reads_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        fs::write(
            &path,
            r#"{"source_ids": ["technical", "sentiment"], "weights": [0.7, -0.2]}"#,
        )
        .unwrap();
        let model = load_linear_model(&path).unwrap();
        assert_eq!(model.source_ids, vec!["technical", "sentiment"]);
        assert_eq!(model.weights, vec![0.7, -0.2]);
    }

    #[test]
    fn load_linear_model_rejects_mismatched_lengths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, r#"{"source_ids": ["technical"], "weights": [0.7, 0.1]}"#).unwrap();
        assert!(matches!(
            load_linear_model(&path),
            Err(SigtraderError::Model { .. })
        ));
    }

    #[test]
    fn load_linear_model_missing_file() {
        assert!(matches!(
            load_linear_model(Path::new("/nonexistent/model.json")),
            Err(SigtraderError::Model { .. })
        ));
    }
}
