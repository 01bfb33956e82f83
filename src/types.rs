/// Типы данных для подготовки датасета

use serde::de::Deserializer;
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};

/// Имя функции обратного преобразования, по которому раннер находит денормализацию
pub const INVERSE_FUNC_NAME: &str = "re_max_min_normalization";

/// Окно одного примера: вход `[input_start, input_end)`, цель `[input_end, target_end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleIndex {
    pub input_start: usize,
    pub input_end: usize,
    pub target_end: usize,
}

impl SampleIndex {
    pub fn new(input_start: usize, input_end: usize, target_end: usize) -> Self {
        Self {
            input_start,
            input_end,
            target_end,
        }
    }

    pub fn as_tuple(&self) -> (usize, usize, usize) {
        (self.input_start, self.input_end, self.target_end)
    }
}

// В pickle окно хранится как кортеж (start, mid, end)
impl Serialize for SampleIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.input_start)?;
        tuple.serialize_element(&self.input_end)?;
        tuple.serialize_element(&self.target_end)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for SampleIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (input_start, input_end, target_end) =
            <(usize, usize, usize)>::deserialize(deserializer)?;
        Ok(Self::new(input_start, input_end, target_end))
    }
}

impl From<(usize, usize, usize)> for SampleIndex {
    fn from((input_start, input_end, target_end): (usize, usize, usize)) -> Self {
        Self::new(input_start, input_end, target_end)
    }
}

/// Разбиение окон на train/valid/test (содержимое `index.pkl`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndex {
    pub train: Vec<SampleIndex>,
    pub valid: Vec<SampleIndex>,
    pub test: Vec<SampleIndex>,
}

impl SplitIndex {
    pub fn total(&self) -> usize {
        self.train.len() + self.valid.len() + self.test.len()
    }

    /// Все окна в хронологическом порядке
    pub fn iter(&self) -> impl Iterator<Item = &SampleIndex> {
        self.train.iter().chain(self.valid.iter()).chain(self.test.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerArgs {
    pub min: f64,
    pub max: f64,
}

/// Содержимое `scaler.pkl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerRecord {
    pub func: String,
    pub args: ScalerArgs,
}

impl ScalerRecord {
    pub fn min_max(min: f64, max: f64) -> Self {
        Self {
            func: INVERSE_FUNC_NAME.to_string(),
            args: ScalerArgs { min, max },
        }
    }
}

/// Параметры разбиения и окон
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSettings {
    pub history_len: usize,
    pub future_len: usize,
    pub train_ratio: f64,
    pub valid_ratio: f64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            history_len: 12,
            future_len: 12,
            train_ratio: 0.7,
            valid_ratio: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_index_tuple_conversion() {
        let idx = SampleIndex::from((3, 15, 27));
        assert_eq!(idx.as_tuple(), (3, 15, 27));
        assert_eq!(idx.input_end, 15);
    }

    #[test]
    fn test_sample_index_serializes_as_tuple() {
        let json = serde_json::to_string(&SampleIndex::new(0, 12, 24)).unwrap();
        assert_eq!(json, "[0,12,24]");
        let back: SampleIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SampleIndex::new(0, 12, 24));
    }

    #[test]
    fn test_scaler_record_uses_runner_func_name() {
        let record = ScalerRecord::min_max(1.0, 5.0);
        assert_eq!(record.func, INVERSE_FUNC_NAME);
        assert_eq!(record.args.max, 5.0);
    }

    #[test]
    fn test_split_index_iter_is_chronological() {
        let split = SplitIndex {
            train: vec![SampleIndex::new(0, 1, 2)],
            valid: vec![SampleIndex::new(1, 2, 3)],
            test: vec![SampleIndex::new(2, 3, 4)],
        };
        let starts: Vec<usize> = split.iter().map(|i| i.input_start).collect();
        assert_eq!(starts, vec![0, 1, 2]);
        assert_eq!(split.total(), 3);
    }
}
