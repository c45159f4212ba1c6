use std::path::PathBuf;

use thiserror::Error;

/// A requested period string that is neither `YYYY-MM` nor `YYYY-MM-DD`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid period `{input}`: expected YYYY-MM or YYYY-MM-DD")]
pub struct WindowParseError {
    pub input: String,
}

/// Why a single metric could not contribute a series to a build.
///
/// These never fail a build on their own; the dataset records them as
/// unavailable metrics.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("file {} not found", path.display())]
    Missing { path: PathBuf },
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed csv in {}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{} has no `{column}` column", path.display())]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("unparsable timestamp `{value}` at row {row} of {}", path.display())]
    Timestamp {
        path: PathBuf,
        row: usize,
        value: String,
    },
    #[error("no samples inside the requested window")]
    EmptyWindow,
}

impl LoadError {
    /// Short label used for the failure counter.
    pub fn reason(&self) -> &'static str {
        match self {
            LoadError::Missing { .. } => "missing",
            LoadError::Io { .. } => "io",
            LoadError::Csv { .. } => "csv",
            LoadError::MissingColumn { .. } => "missing_column",
            LoadError::Timestamp { .. } => "timestamp",
            LoadError::EmptyWindow => "empty_window",
        }
    }
}

/// Failures that are visible to callers of a dataset build.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DatasetError {
    #[error("Device {0} not found")]
    DeviceNotFound(String),
    #[error("no core metrics available for time period analysis")]
    NoUsableWindow,
    #[error("no data available for the selected time period")]
    NoDataAvailable,
    #[error("{0}")]
    Internal(String),
}

impl DatasetError {
    /// True when the error means "nothing to serve" rather than a fault.
    pub fn is_not_found(&self) -> bool {
        !matches!(self, DatasetError::Internal(_))
    }
}
