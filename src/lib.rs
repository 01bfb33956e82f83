//! STID prep - подготовка датасета скорости трафика и конфигурация эксперимента

pub mod error;
pub mod experiment;
pub mod pipeline;
pub mod preprocessing;
pub mod storage;
pub mod types;

pub use error::{ConfigError, PrepError};
pub use types::*;
pub use preprocessing::*;

// Re-export для удобства
pub use experiment::{DataLayout, ExperimentConfig, Registry};
pub use pipeline::{generate_data, PrepareOptions};
pub use storage::PreparedDataset;
