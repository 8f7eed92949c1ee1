use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Stage;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error type covering the different failure cases that can occur while the
/// pipeline loads, reshapes, enriches, aggregates, or caches price data.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Raised when a workbook has no usable sheet.
    #[error("invalid workbook structure: {0}")]
    InvalidWorkbook(String),

    /// Required columns or year pairs are missing from a source table.
    #[error("schema error in table '{table}': {message}")]
    Schema { table: String, message: String },

    /// A table that requires unique keys contains duplicates.
    #[error("data integrity error in table '{table}': {message}")]
    DataIntegrity { table: String, message: String },

    /// Per-row numeric failure. The pipeline drops the row and continues.
    #[error("cannot compute prices for {key}: {message}")]
    Computation { key: String, message: String },

    /// A cached artifact could not be read or decoded.
    #[error("cache artifact '{key}' unusable: {message}")]
    Cache { key: String, message: String },

    /// A fatal error annotated with the pipeline stage it originated in.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when the configuration cannot drive a pipeline run.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl PipelineError {
    pub(crate) fn schema(table: &str, message: impl Into<String>) -> Self {
        Self::Schema {
            table: table.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn integrity(table: &str, message: impl Into<String>) -> Self {
        Self::DataIntegrity {
            table: table.to_string(),
            message: message.into(),
        }
    }

    /// Attaches the failing stage. Errors that already carry a stage keep
    /// the innermost one.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            already @ Self::Stage { .. } => already,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage the error was raised in, when known.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The error with any stage annotation removed.
    pub fn root(&self) -> &PipelineError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}
