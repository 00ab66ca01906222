//! # Error taxonomy
//!
//! Every fallible operation of the crate returns [`VirtObsError`]. The variants follow the
//! way failures are handled by the pipeline:
//!
//! - **Configuration**: missing required parameter, unknown name on a locked schema,
//!   wrong value type. Always surfaced, never retried.
//! - **Consistency**: a raw-data record exists but its backing file does not. Fatal.
//! - **Stale data**: [`VirtObsError::StaleData`], a persisted record whose key is gone from an
//!   existing container (the store itself reports [`VirtObsError::KeyNotFound`]). The fetcher
//!   recovers locally by discarding the record and fetching again.
//! - **Reduction**: [`VirtObsError::InvalidInputType`] and [`VirtObsError::InvalidInputValue`]
//!   abort one reduction call.
//! - **Persistence**: disk write or database commit failures. The fetcher rolls back and
//!   removes freshly written files before re-raising.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VirtObsError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Inconsistent data: {0}")]
    Consistency(String),

    #[error("Stale data: {0}")]
    StaleData(String),

    #[error("No object named '{key}' in container {container}")]
    KeyNotFound { container: String, key: String },

    #[error("Invalid input type: {0}")]
    InvalidInputType(String),

    #[error("{0}")]
    InvalidInputValue(String),

    #[error("Value {value} for axis '{axis}' is outside the range [{start}, {stop}]")]
    ValueOutOfRange {
        axis: String,
        value: f64,
        start: f64,
        stop: f64,
    },

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("File already exists and overwrite is disabled: {0}")]
    FileExists(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Catalog row not found: {0}")]
    RowNotFound(String),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow_schema::ArrowError),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Thread pool creation failed: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),

    #[error("Random number generation failed: {0}")]
    NoiseGenerationError(String),
}

impl From<rand_distr::NormalError> for VirtObsError {
    fn from(err: rand_distr::NormalError) -> Self {
        VirtObsError::NoiseGenerationError(err.to_string())
    }
}

impl From<rand_distr::PoissonError> for VirtObsError {
    fn from(err: rand_distr::PoissonError) -> Self {
        VirtObsError::NoiseGenerationError(err.to_string())
    }
}

impl PartialEq for VirtObsError {
    fn eq(&self, other: &Self) -> bool {
        use VirtObsError::*;
        match (self, other) {
            (Configuration(a), Configuration(b)) => a == b,
            (Consistency(a), Consistency(b)) => a == b,
            (StaleData(a), StaleData(b)) => a == b,
            (
                KeyNotFound {
                    container: c1,
                    key: k1,
                },
                KeyNotFound {
                    container: c2,
                    key: k2,
                },
            ) => c1 == c2 && k1 == k2,
            (InvalidInputType(a), InvalidInputType(b)) => a == b,
            (InvalidInputValue(a), InvalidInputValue(b)) => a == b,
            (
                ValueOutOfRange {
                    axis: a1,
                    value: v1,
                    start: s1,
                    stop: e1,
                },
                ValueOutOfRange {
                    axis: a2,
                    value: v2,
                    start: s2,
                    stop: e2,
                },
            ) => a1 == a2 && v1 == v2 && s1 == s2 && e1 == e2,
            (Persistence(a), Persistence(b)) => a == b,
            (FileExists(a), FileExists(b)) => a == b,
            (NotImplemented(a), NotImplemented(b)) => a == b,
            (RowNotFound(a), RowNotFound(b)) => a == b,
            (NoiseGenerationError(a), NoiseGenerationError(b)) => a == b,

            // Library errors are not comparable: equal when the variant matches
            (IoError(_), IoError(_)) => true,
            (ParquetError(_), ParquetError(_)) => true,
            (ArrowError(_), ArrowError(_)) => true,
            (YamlError(_), YamlError(_)) => true,
            (JsonError(_), JsonError(_)) => true,
            (CsvError(_), CsvError(_)) => true,
            (ThreadPoolError(_), ThreadPoolError(_)) => true,

            _ => false,
        }
    }
}
