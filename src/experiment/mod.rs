/// Конфигурация эксперимента и реестр метрик

pub mod config;
pub mod metrics;

pub use config::{DataLayout, ExperimentConfig};
pub use metrics::{LossFunction, MetricFunction, Registry};
