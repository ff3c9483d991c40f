//! Core domain types and logic.

pub mod error;
pub mod signal;
pub mod price;
pub mod source;
pub mod normalizer;
pub mod combiner;
pub mod aggregator;
pub mod cost_model;
pub mod position;
pub mod portfolio;
pub mod metrics;
pub mod backtest;
pub mod walk_forward;
pub mod pipeline;
pub mod config_validation;
