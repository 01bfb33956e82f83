//! Скользящие окна и разбиение на train/valid/test

use crate::error::{PrepError, Result};
use crate::types::{SampleIndex, SplitIndex, WindowSettings};

fn check_ratio(name: &str, ratio: f64) -> Result<()> {
    if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
        return Err(PrepError::InvalidSplit(format!(
            "{} must be within [0, 1], got {}",
            name, ratio
        )));
    }
    Ok(())
}

/// Строит окна `(i, i + history_len, i + history_len + future_len)` и режет их
/// на три непрерывных отрезка. Доли округляются к четному при ровно .5,
/// тест забирает остаток.
pub fn build_sample_indices(
    len: usize,
    history_len: usize,
    future_len: usize,
    train_ratio: f64,
    valid_ratio: f64,
) -> Result<SplitIndex> {
    if history_len == 0 || future_len == 0 {
        return Err(PrepError::InvalidSplit(format!(
            "window lengths must be >= 1, got history={} future={}",
            history_len, future_len
        )));
    }
    check_ratio("train_ratio", train_ratio)?;
    check_ratio("valid_ratio", valid_ratio)?;

    let window = history_len + future_len;
    if len < window {
        return Err(PrepError::InvalidSplit(format!(
            "series of length {} is shorter than one window ({} + {})",
            len, history_len, future_len
        )));
    }
    let num_samples = len - window + 1;

    let train_count = (num_samples as f64 * train_ratio).round_ties_even() as usize;
    let valid_count = (num_samples as f64 * valid_ratio).round_ties_even() as usize;
    if train_count + valid_count > num_samples {
        return Err(PrepError::InvalidSplit(format!(
            "train ({}) + valid ({}) exceed {} samples; ratios {} + {} leave a negative test split",
            train_count, valid_count, num_samples, train_ratio, valid_ratio
        )));
    }
    if train_count == 0 {
        return Err(PrepError::InvalidSplit(format!(
            "train split is empty ({} samples, train_ratio {})",
            num_samples, train_ratio
        )));
    }

    let mut windows: Vec<SampleIndex> = (0..num_samples)
        .map(|i| SampleIndex::new(i, i + history_len, i + window))
        .collect();

    let test = windows.split_off(train_count + valid_count);
    let valid = windows.split_off(train_count);

    tracing::info!(
        num_samples,
        train = windows.len(),
        valid = valid.len(),
        test = test.len(),
        "Built sample indices"
    );

    Ok(SplitIndex {
        train: windows,
        valid,
        test,
    })
}

/// То же самое, параметры из `WindowSettings`
pub fn split_for(len: usize, settings: &WindowSettings) -> Result<SplitIndex> {
    build_sample_indices(
        len,
        settings.history_len,
        settings.future_len,
        settings.train_ratio,
        settings.valid_ratio,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reference_split_counts() {
        let split = build_sample_indices(100, 12, 12, 0.7, 0.1).unwrap();
        assert_eq!(split.total(), 77);
        assert_eq!(split.train.len(), 54);
        assert_eq!(split.valid.len(), 8);
        assert_eq!(split.test.len(), 15);
        assert_eq!(split.train[0].as_tuple(), (0, 12, 24));
        assert_eq!(split.test.last().unwrap().as_tuple(), (76, 88, 100));
    }

    #[test]
    fn test_half_counts_round_to_even() {
        // 15 окон: 15 * 0.7 = 10.5 -> 10, 15 * 0.1 = 1.5 -> 2
        let split = build_sample_indices(38, 12, 12, 0.7, 0.1).unwrap();
        assert_eq!(split.train.len(), 10);
        assert_eq!(split.valid.len(), 2);
        assert_eq!(split.test.len(), 3);

        // 5 окон: 5 * 0.1 = 0.5 -> 0
        let split = build_sample_indices(8, 2, 2, 0.7, 0.1).unwrap();
        assert_eq!(split.train.len(), 4);
        assert_eq!(split.valid.len(), 0);
        assert_eq!(split.test.len(), 1);
    }

    #[test]
    fn test_partitions_are_contiguous() {
        let split = build_sample_indices(100, 12, 12, 0.7, 0.1).unwrap();
        assert_eq!(split.valid[0].input_start, split.train.last().unwrap().input_start + 1);
        assert_eq!(split.test[0].input_start, split.valid.last().unwrap().input_start + 1);
    }

    #[test]
    fn test_exact_window_gives_single_sample() {
        let split = build_sample_indices(24, 12, 12, 1.0, 0.0).unwrap();
        assert_eq!(split.train, vec![SampleIndex::new(0, 12, 24)]);
        assert!(split.valid.is_empty());
        assert!(split.test.is_empty());
    }

    #[test]
    fn test_too_short_series_is_rejected() {
        let err = build_sample_indices(23, 12, 12, 0.7, 0.1).unwrap_err();
        assert!(matches!(err, PrepError::InvalidSplit(_)));
    }

    #[test]
    fn test_ratios_over_one_are_rejected() {
        assert!(build_sample_indices(100, 12, 12, 0.8, 0.3).is_err());
        assert!(build_sample_indices(100, 12, 12, 1.2, 0.0).is_err());
        assert!(build_sample_indices(100, 12, 12, f64::NAN, 0.1).is_err());
    }

    #[test]
    fn test_empty_train_split_is_rejected() {
        assert!(build_sample_indices(100, 12, 12, 0.0, 0.5).is_err());
    }

    #[test]
    fn test_zero_window_is_rejected() {
        assert!(build_sample_indices(100, 0, 12, 0.7, 0.1).is_err());
        assert!(build_sample_indices(100, 12, 0, 0.7, 0.1).is_err());
    }

    #[test]
    fn test_split_for_uses_settings() {
        let split = split_for(100, &WindowSettings::default()).unwrap();
        assert_eq!(split.train.len(), 54);
    }

    proptest! {
        #[test]
        fn prop_split_covers_all_windows(
            len in 2usize..400,
            history in 1usize..24,
            future in 1usize..24,
            train_ratio in 0.05f64..0.9,
            valid_frac in 0.0f64..1.0,
        ) {
            prop_assume!(len >= history + future);
            let valid_ratio = (1.0 - train_ratio) * valid_frac;
            let num_samples = len - history - future + 1;
            let train_count = (num_samples as f64 * train_ratio).round_ties_even();
            let valid_count = (num_samples as f64 * valid_ratio).round_ties_even();
            prop_assume!(train_count >= 1.0);
            prop_assume!(train_count + valid_count <= num_samples as f64);

            let split =
                build_sample_indices(len, history, future, train_ratio, valid_ratio).unwrap();
            prop_assert_eq!(split.total(), num_samples);

            let all: Vec<&SampleIndex> = split.iter().collect();
            for (i, idx) in all.iter().enumerate() {
                prop_assert_eq!(idx.input_start, i);
                prop_assert_eq!(idx.input_end, i + history);
                prop_assert_eq!(idx.target_end, i + history + future);
                prop_assert!(idx.target_end <= len);
            }
        }
    }
}
