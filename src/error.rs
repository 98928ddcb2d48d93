use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors raised while fitting or evaluating a forest
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Training set is empty")]
    EmptyTrainingSet,

    #[error("Feature matrix has no columns")]
    NoFeatures,

    #[error("Row {row} has {actual} features, expected {expected}")]
    RaggedFeatures {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Label count mismatch: {labels} labels for {rows} rows")]
    LabelMismatch { rows: usize, labels: usize },

    #[error("Non-finite value in training data at row {0}")]
    NonFinite(usize),

    #[error("Invalid hyperparameter: {0}")]
    InvalidParameter(String),
}

/// Pipeline error types
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input file lacks columns the pipeline cannot run without
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Data error: {0}")]
    Data(#[from] PolarsError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
