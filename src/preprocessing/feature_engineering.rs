//! Календарные признаки и сборка итогового тензора

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use ndarray::{concatenate, Array1, Array3, ArrayView3, ArrayViewD, Axis};

use crate::error::{PrepError, Result};

pub const DAYS_PER_WEEK: usize = 7;
pub const DEFAULT_STEPS_PER_DAY: usize = 24;
const MINUTES_PER_DAY: usize = 24 * 60;

/// Порядковые номера дня недели и слота суток (с единицы) по каждому шагу времени
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarOrdinals {
    pub day_of_week: Array1<f64>,
    pub time_of_day: Array1<f64>,
}

impl CalendarOrdinals {
    /// Столбец 0 хранит день недели, столбец 1 слот суток.
    /// Форма `(L, >=2)` или `(L, M, >=2)`; во втором случае берется узел 0,
    /// метаданные одинаковы для всех узлов.
    pub fn from_metadata(metadata: ArrayViewD<f64>) -> Result<Self> {
        let shape = metadata.shape().to_vec();
        let table = match shape.as_slice() {
            [len, cols] if *len > 0 && *cols >= 2 => metadata
                .into_dimensionality::<ndarray::Ix2>()
                .map_err(|_| PrepError::shape("time metadata", "(L, 2)", &shape))?,
            [len, nodes, cols] if *len > 0 && *nodes > 0 && *cols >= 2 => metadata
                .into_dimensionality::<ndarray::Ix3>()
                .map_err(|_| PrepError::shape("time metadata", "(L, N, 2)", &shape))?
                .index_axis_move(Axis(1), 0),
            _ => {
                return Err(PrepError::shape(
                    "time metadata",
                    "(L, 2) or (L, N, 2) with L > 0",
                    &shape,
                ))
            }
        };

        Ok(Self {
            day_of_week: table.column(0).to_owned(),
            time_of_day: table.column(1).to_owned(),
        })
    }

    /// Номера из метки начала ряда и фиксированного шага.
    /// День недели: понедельник = 1; слот: `minute_of_day * steps_per_day / 1440 + 1`.
    pub fn from_timestamps(
        start: NaiveDateTime,
        step_minutes: u32,
        len: usize,
        steps_per_day: usize,
    ) -> Result<Self> {
        if step_minutes == 0 {
            return Err(PrepError::InvalidValue("step_minutes must be >= 1".to_string()));
        }
        check_steps_per_day(steps_per_day)?;

        let mut day_of_week = Array1::zeros(len);
        let mut time_of_day = Array1::zeros(len);
        for i in 0..len {
            let offset = Duration::minutes(i as i64 * step_minutes as i64);
            let ts = start.checked_add_signed(offset).ok_or_else(|| {
                PrepError::InvalidValue(format!("timestamp overflow at step {}", i))
            })?;
            let minute_of_day = (ts.hour() * 60 + ts.minute()) as usize;
            day_of_week[i] = ts.weekday().number_from_monday() as f64;
            time_of_day[i] = (minute_of_day * steps_per_day / MINUTES_PER_DAY + 1) as f64;
        }

        tracing::debug!(%start, step_minutes, len, "Derived calendar ordinals from timestamps");
        Ok(Self {
            day_of_week,
            time_of_day,
        })
    }

    pub fn len(&self) -> usize {
        self.time_of_day.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_of_day.is_empty()
    }
}

fn check_steps_per_day(steps_per_day: usize) -> Result<()> {
    if steps_per_day == 0 || steps_per_day > MINUTES_PER_DAY {
        return Err(PrepError::InvalidValue(format!(
            "steps_per_day must be within [1, {}], got {}",
            MINUTES_PER_DAY, steps_per_day
        )));
    }
    Ok(())
}

pub struct FeatureEngineer;

impl FeatureEngineer {
    /// `(ordinal - 1) / period`, один и тот же столбец для всех узлов: `(L, N, 1)`
    fn broadcast_ordinal(
        what: &str,
        ordinals: &Array1<f64>,
        period: usize,
        num_nodes: usize,
    ) -> Result<Array3<f64>> {
        if let Some(bad) = ordinals
            .iter()
            .find(|&&o| !o.is_finite() || o < 1.0 || o > period as f64)
        {
            return Err(PrepError::InvalidValue(format!(
                "{} ordinal {} is outside [1, {}]",
                what, bad, period
            )));
        }

        let len = ordinals.len();
        Ok(Array3::from_shape_fn((len, num_nodes, 1), |(t, _, _)| {
            (ordinals[t] - 1.0) / period as f64
        }))
    }

    /// Возвращает `(time_in_day, day_in_week)`, оба формы `(L, N, 1)` со значениями в `[0, 1)`
    pub fn calendar_features(
        ordinals: &CalendarOrdinals,
        num_nodes: usize,
        steps_per_day: usize,
    ) -> Result<(Array3<f64>, Array3<f64>)> {
        check_steps_per_day(steps_per_day)?;
        if ordinals.day_of_week.len() != ordinals.time_of_day.len() {
            return Err(PrepError::InvalidValue(format!(
                "calendar columns differ in length: {} vs {}",
                ordinals.day_of_week.len(),
                ordinals.time_of_day.len()
            )));
        }

        let time_in_day = Self::broadcast_ordinal(
            "time-of-day",
            &ordinals.time_of_day,
            steps_per_day,
            num_nodes,
        )?;
        let day_in_week = Self::broadcast_ordinal(
            "day-of-week",
            &ordinals.day_of_week,
            DAYS_PER_WEEK,
            num_nodes,
        )?;
        Ok((time_in_day, day_in_week))
    }

    /// Склейка по оси каналов: [нормализованные каналы, time_in_day, day_in_week]
    pub fn assemble<'a>(
        normalized: ArrayView3<'a, f64>,
        time_in_day: Option<ArrayView3<'a, f64>>,
        day_in_week: Option<ArrayView3<'a, f64>>,
    ) -> Result<Array3<f64>> {
        let (len, nodes, _) = normalized.dim();
        let mut parts = vec![normalized];
        for (what, part) in [("time_in_day", time_in_day), ("day_in_week", day_in_week)] {
            if let Some(part) = part {
                let (l, n, _) = part.dim();
                if l != len || n != nodes {
                    return Err(PrepError::shape(
                        what,
                        format!("({}, {}, 1)", len, nodes),
                        part.shape(),
                    ));
                }
                parts.push(part);
            }
        }

        concatenate(Axis(2), &parts)
            .map_err(|e| PrepError::shape("feature tensor", e.to_string(), normalized.shape()))
    }
}

/// Календарные признаки напрямую из массива метаданных
pub fn derive_calendar_features(
    time_metadata: ArrayViewD<f64>,
    num_nodes: usize,
    steps_per_day: usize,
) -> Result<(Array3<f64>, Array3<f64>)> {
    let ordinals = CalendarOrdinals::from_metadata(time_metadata)?;
    FeatureEngineer::calendar_features(&ordinals, num_nodes, steps_per_day)
}

/// Календарь должен покрывать ровно `len` шагов ряда
pub fn check_calendar_length(ordinals: &CalendarOrdinals, len: usize) -> Result<()> {
    if ordinals.len() != len {
        return Err(PrepError::InvalidValue(format!(
            "time metadata has {} steps, raw series has {}",
            ordinals.len(),
            len
        )));
    }
    Ok(())
}
