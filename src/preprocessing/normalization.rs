//! Min-max нормализация по обучающему срезу

use ndarray::{s, Array3, ArrayView3};

use crate::error::{PrepError, Result};
use crate::types::{SampleIndex, ScalerRecord};

/// Масштабирование `(x - min) / (max - min)`.
///
/// Статистики берутся только из канала 0 на отрезке `[0, train_index[-1].target_end)`,
/// а применяются ко всему массиву, без обрезки.
pub struct MinMaxScaler {
    min: Option<f64>,
    max: Option<f64>,
    is_fitted: bool,
}

impl MinMaxScaler {
    pub fn new() -> Self {
        Self {
            min: None,
            max: None,
            is_fitted: false,
        }
    }

    pub fn from_record(record: &ScalerRecord) -> Self {
        Self {
            min: Some(record.args.min),
            max: Some(record.args.max),
            is_fitted: true,
        }
    }

    pub fn fit(&mut self, data: ArrayView3<f64>, train_index: &[SampleIndex]) -> Result<()> {
        if data.is_empty() {
            return Err(PrepError::shape("raw series", "non-empty (L, N, F)", data.shape()));
        }
        let last = train_index
            .last()
            .ok_or_else(|| PrepError::InvalidSplit("train index is empty".to_string()))?;

        let train_end = last.target_end;
        if train_end > data.len_of(ndarray::Axis(0)) {
            return Err(PrepError::shape(
                "raw series",
                format!("at least {} time steps", train_end),
                data.shape(),
            ));
        }

        let train_slice = data.slice(s![..train_end, .., 0]);

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in train_slice.iter() {
            if !v.is_finite() {
                return Err(PrepError::InvalidValue(format!(
                    "training slice of channel 0 contains non-finite value {}",
                    v
                )));
            }
            min = min.min(v);
            max = max.max(v);
        }

        // Константный обучающий срез: деление на ноль
        if max == min {
            return Err(PrepError::DegenerateStatistics { value: min });
        }

        tracing::info!(min, max, train_end, "Fitted min-max scaler on training slice");

        self.min = Some(min);
        self.max = Some(max);
        self.is_fitted = true;
        Ok(())
    }

    fn stats(&self) -> Result<(f64, f64)> {
        if !self.is_fitted {
            return Err(PrepError::NotFitted);
        }
        match (self.min, self.max) {
            (Some(min), Some(max)) => Ok((min, max)),
            _ => Err(PrepError::NotFitted),
        }
    }

    pub fn transform(&self, data: ArrayView3<f64>) -> Result<Array3<f64>> {
        let (min, max) = self.stats()?;
        let range = max - min;
        Ok(data.mapv(|x| (x - min) / range))
    }

    /// Обратное к `transform`: `x * (max - min) + min`.
    ///
    /// Старый помощник раннера сначала делал `(x + 1) / 2`, то есть ждал
    /// вход в `[-1, 1]`; с прямым преобразованием в `[0, 1]` он не сходится.
    pub fn inverse_transform(&self, data: ArrayView3<f64>) -> Result<Array3<f64>> {
        let (min, max) = self.stats()?;
        let range = max - min;
        Ok(data.mapv(|x| x * range + min))
    }

    pub fn fit_transform(
        &mut self,
        data: ArrayView3<f64>,
        train_index: &[SampleIndex],
    ) -> Result<Array3<f64>> {
        self.fit(data, train_index)?;
        self.transform(data)
    }

    pub fn record(&self) -> Result<ScalerRecord> {
        let (min, max) = self.stats()?;
        Ok(ScalerRecord::min_max(min, max))
    }
}

impl Default for MinMaxScaler {
    fn default() -> Self {
        Self::new()
    }
}

/// Обучает скейлер на train-части и нормализует весь массив
pub fn fit_and_normalize(
    data: ArrayView3<f64>,
    train_index: &[SampleIndex],
) -> Result<(Array3<f64>, ScalerRecord)> {
    let mut scaler = MinMaxScaler::new();
    let normalized = scaler.fit_transform(data, train_index)?;
    Ok((normalized, scaler.record()?))
}
