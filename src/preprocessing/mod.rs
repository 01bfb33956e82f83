/// Модуль предобработки данных

pub mod feature_engineering;
pub mod normalization;
pub mod windowing;

pub use feature_engineering::{derive_calendar_features, CalendarOrdinals, FeatureEngineer};
pub use normalization::{fit_and_normalize, MinMaxScaler};
pub use windowing::build_sample_indices;
