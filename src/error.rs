//! Ошибки подготовки данных и конфигурации

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrepError {
    /// Отсутствующий файл, неподдерживаемый формат, нечисловые значения
    #[error("invalid input {}: {}", .path.display(), .reason)]
    Input { path: PathBuf, reason: String },

    #[error("unexpected shape for {what}: expected {expected}, got {actual:?}")]
    Shape {
        what: String,
        expected: String,
        actual: Vec<usize>,
    },

    /// max == min на обучающем срезе канала 0
    #[error("degenerate training statistics: min == max == {value}")]
    DegenerateStatistics { value: f64 },

    #[error("scaler is not fitted")]
    NotFitted,

    /// Значение вне допустимого диапазона (порядковые номера, NaN и т.п.)
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid split: {0}")]
    InvalidSplit(String),

    #[error("I/O error on {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pickle error on {}: {}", .path.display(), .source)]
    Pickle {
        path: PathBuf,
        #[source]
        source: serde_pickle::Error,
    },

    #[error("json error on {}: {}", .path.display(), .source)]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("npy error on {}: {}", .path.display(), .source)]
    Npy {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },

    #[error("npz error on {}: {}", .path.display(), .source)]
    Npz {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpzError,
    },
}

impl PrepError {
    pub fn input(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PrepError::Input {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn shape(what: impl Into<String>, expected: impl Into<String>, actual: &[usize]) -> Self {
        PrepError::Shape {
            what: what.into(),
            expected: expected.into(),
            actual: actual.to_vec(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PrepError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown metric function: {0}")]
    UnknownMetric(String),

    #[error("unknown loss function: {0}")]
    UnknownLoss(String),

    #[error("invalid config value {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;
