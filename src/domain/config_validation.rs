//! Configuration validation.
//!
//! Validates every section before a run. Absent optional keys fall back to
//! defaults; present keys must parse and be in range.

use crate::domain::aggregator::AggregationStrategy;
use crate::domain::error::SigtraderError;
use crate::ports::config_port::ConfigPort;

pub fn validate_engine_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    validate_data_config(config)?;
    validate_normalizer_config(config)?;
    validate_aggregator_config(config)?;
    validate_weights(config)?;
    validate_backtest_config(config)?;
    validate_walk_forward_config(config)?;
    Ok(())
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    require_string(config, "data", "signals")?;
    require_string(config, "data", "prices")?;
    Ok(())
}

pub fn validate_normalizer_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    if let Some(secs) = optional_int(config, "normalizer", "staleness_secs")? {
        if secs <= 0 {
            return Err(SigtraderError::config_invalid(
                "normalizer",
                "staleness_secs",
                "staleness_secs must be positive",
            ));
        }
    }
    if let Some(n) = optional_int(config, "normalizer", "min_history")? {
        if n < 0 {
            return Err(SigtraderError::config_invalid(
                "normalizer",
                "min_history",
                "min_history must be non-negative",
            ));
        }
    }
    Ok(())
}

pub fn validate_aggregator_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    if let Some(name) = config.get_string("aggregator", "strategy") {
        name.parse::<AggregationStrategy>()
            .map_err(|reason| SigtraderError::config_invalid("aggregator", "strategy", reason))?;
    }
    for key in ["buy_threshold", "sell_threshold"] {
        if let Some(value) = optional_double(config, "aggregator", key)? {
            if value <= 0.0 || value > 1.0 {
                return Err(SigtraderError::config_invalid(
                    "aggregator",
                    key,
                    format!("{key} must be in (0, 1]"),
                ));
            }
        }
    }
    if let Some(band) = optional_double(config, "aggregator", "hysteresis_band")? {
        if band < 0.0 {
            return Err(SigtraderError::config_invalid(
                "aggregator",
                "hysteresis_band",
                "hysteresis_band must be non-negative",
            ));
        }
    }
    Ok(())
}

pub fn validate_weights(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    let keys = config.get_keys("weights");
    if keys.is_empty() {
        return Err(SigtraderError::ConfigMissing {
            section: "weights".to_string(),
            key: "<source_id>".to_string(),
        });
    }
    for key in &keys {
        let weight = optional_double(config, "weights", key)?.unwrap_or(f64::NAN);
        if !weight.is_finite() || weight < 0.0 {
            return Err(SigtraderError::config_invalid(
                "weights",
                key,
                "weight must be a non-negative number",
            ));
        }
    }
    Ok(())
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    if let Some(cash) = optional_double(config, "backtest", "starting_cash")? {
        if cash <= 0.0 {
            return Err(SigtraderError::config_invalid(
                "backtest",
                "starting_cash",
                "starting_cash must be positive",
            ));
        }
    }
    if let Some(fraction) = optional_double(config, "backtest", "position_fraction")? {
        if fraction <= 0.0 || fraction > 1.0 {
            return Err(SigtraderError::config_invalid(
                "backtest",
                "position_fraction",
                "position_fraction must be in (0, 1]",
            ));
        }
    }
    for key in ["slippage_bps", "fixed_fee", "variable_fee_rate"] {
        if let Some(value) = optional_double(config, "backtest", key)? {
            if value < 0.0 {
                return Err(SigtraderError::config_invalid(
                    "backtest",
                    key,
                    format!("{key} must be non-negative"),
                ));
            }
        }
    }
    if let Some(periods) = optional_double(config, "backtest", "periods_per_year")? {
        if periods <= 0.0 {
            return Err(SigtraderError::config_invalid(
                "backtest",
                "periods_per_year",
                "periods_per_year must be positive",
            ));
        }
    }
    optional_double(config, "backtest", "risk_free_rate")?;
    for key in ["allow_short", "allow_reversal", "liquidate_at_end"] {
        if let Some(value) = config.get_string("backtest", key) {
            if !matches!(
                value.to_lowercase().as_str(),
                "true" | "yes" | "1" | "false" | "no" | "0"
            ) {
                return Err(SigtraderError::config_invalid(
                    "backtest",
                    key,
                    format!("'{value}' is not a boolean"),
                ));
            }
        }
    }
    Ok(())
}

/// The section is optional; when any length is given all three must be.
pub fn validate_walk_forward_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    if config.get_keys("walk_forward").is_empty() {
        return Ok(());
    }
    let mut lengths = [0i64; 3];
    for (slot, key) in lengths.iter_mut().zip(["train_length", "test_length", "step"]) {
        let value = optional_int(config, "walk_forward", key)?.ok_or_else(|| {
            SigtraderError::ConfigMissing {
                section: "walk_forward".to_string(),
                key: key.to_string(),
            }
        })?;
        if value <= 0 {
            return Err(SigtraderError::config_invalid(
                "walk_forward",
                key,
                format!("{key} must be positive"),
            ));
        }
        *slot = value;
    }
    let [_, test_length, step] = lengths;
    if step < test_length {
        return Err(SigtraderError::config_invalid(
            "walk_forward",
            "step",
            "step must be at least test_length so test windows do not overlap",
        ));
    }
    Ok(())
}

fn require_string(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, SigtraderError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(SigtraderError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

fn optional_double(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<f64>, SigtraderError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(SigtraderError::config_invalid(
                section,
                key,
                format!("'{raw}' is not a number"),
            )),
        },
    }
}

fn optional_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<i64>, SigtraderError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<i64>().map(Some).map_err(|_| {
            SigtraderError::config_invalid(section, key, format!("'{raw}' is not an integer"))
        }),
    }
}
