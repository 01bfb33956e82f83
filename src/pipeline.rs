//! Подготовка датасета целиком: чтение, окна, нормализация, признаки, запись

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use ndarray::{Array3, ArrayView3, Axis};

use crate::error::Result;
use crate::preprocessing::feature_engineering::{check_calendar_length, DEFAULT_STEPS_PER_DAY};
use crate::preprocessing::{fit_and_normalize, windowing, CalendarOrdinals, FeatureEngineer};
use crate::storage::{self, ArtifactPaths, DEFAULT_ARRAY_KEY};
use crate::types::{ScalerRecord, SplitIndex, WindowSettings};

/// Откуда берутся номера дня недели и слота суток
#[derive(Debug, Clone, PartialEq)]
pub enum CalendarSource {
    /// Массив метаданных (столбец 0 день недели, столбец 1 слот)
    Metadata { path: PathBuf, key: String },
    /// Метка первого шага и шаг ряда в минутах
    Timestamps {
        start: NaiveDateTime,
        step_minutes: u32,
    },
}

impl CalendarSource {
    fn ordinals(&self, len: usize, steps_per_day: usize) -> Result<CalendarOrdinals> {
        match self {
            CalendarSource::Metadata { path, key } => storage::load_time_metadata(path, key),
            CalendarSource::Timestamps {
                start,
                step_minutes,
            } => CalendarOrdinals::from_timestamps(*start, *step_minutes, len, steps_per_day),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrepareOptions {
    pub data_file_path: PathBuf,
    pub array_key: String,
    pub calendar: CalendarSource,
    /// Копировать граф смежности в выходной каталог
    pub graph_file_path: Option<PathBuf>,
    pub windows: WindowSettings,
    pub channels: Vec<usize>,
    pub add_day_in_week: bool,
    pub steps_per_day: usize,
}

impl PrepareOptions {
    pub fn new(data_file_path: impl Into<PathBuf>, time_file_path: impl Into<PathBuf>) -> Self {
        Self {
            data_file_path: data_file_path.into(),
            array_key: DEFAULT_ARRAY_KEY.to_string(),
            calendar: CalendarSource::Metadata {
                path: time_file_path.into(),
                key: DEFAULT_ARRAY_KEY.to_string(),
            },
            graph_file_path: None,
            windows: WindowSettings::default(),
            channels: vec![0, 1],
            add_day_in_week: true,
            steps_per_day: DEFAULT_STEPS_PER_DAY,
        }
    }
}

/// Результат подготовки до записи на диск
#[derive(Debug, Clone)]
pub struct PreparedOutput {
    pub scaler: ScalerRecord,
    pub index: SplitIndex,
    pub features: Array3<f64>,
}

/// Чистая часть: окна, нормализация по train, календарь, склейка каналов
pub fn prepare_in_memory(
    data: ArrayView3<f64>,
    ordinals: &CalendarOrdinals,
    windows: &WindowSettings,
    add_day_in_week: bool,
    steps_per_day: usize,
) -> Result<PreparedOutput> {
    let (len, nodes, channels) = data.dim();
    tracing::info!(len, nodes, channels, "Data shape");

    let index = windowing::split_for(len, windows)?;
    let (normalized, scaler) = fit_and_normalize(data, &index.train)?;

    check_calendar_length(ordinals, len)?;
    let (time_in_day, day_in_week) =
        FeatureEngineer::calendar_features(ordinals, nodes, steps_per_day)?;

    let features = FeatureEngineer::assemble(
        normalized.view(),
        Some(time_in_day.view()),
        add_day_in_week.then(|| day_in_week.view()),
    )?;
    tracing::info!(shape = ?features.shape(), "Assembled feature tensor");

    Ok(PreparedOutput {
        scaler,
        index,
        features,
    })
}

/// Читает входы и считает всё, ничего не записывая
pub fn compute(options: &PrepareOptions) -> Result<PreparedOutput> {
    let data = storage::load_raw_series(
        &options.data_file_path,
        &options.array_key,
        &options.channels,
    )?;
    let ordinals = options
        .calendar
        .ordinals(data.len_of(Axis(0)), options.steps_per_day)?;

    prepare_in_memory(
        data.view(),
        &ordinals,
        &options.windows,
        options.add_day_in_week,
        options.steps_per_day,
    )
}

/// Запись уже посчитанного результата; каталог должен существовать
pub fn persist(
    output: &PreparedOutput,
    options: &PrepareOptions,
    output_dir: &Path,
) -> Result<ArtifactPaths> {
    let paths = storage::persist_artifacts(
        output_dir,
        &output.scaler,
        &output.index,
        output.features.view(),
    )?;
    if let Some(graph) = &options.graph_file_path {
        storage::copy_graph(graph, output_dir)?;
    }
    Ok(paths)
}

/// Склейка каналов и запись всех трех артефактов за один вызов
pub fn assemble_and_persist<'a>(
    normalized: ArrayView3<'a, f64>,
    time_in_day: ArrayView3<'a, f64>,
    day_in_week: Option<ArrayView3<'a, f64>>,
    scaler: &ScalerRecord,
    index: &SplitIndex,
    output_dir: &Path,
) -> Result<ArtifactPaths> {
    let features = FeatureEngineer::assemble(normalized, Some(time_in_day), day_in_week)?;
    storage::persist_artifacts(output_dir, scaler, index, features.view())
}

/// `compute` + `persist`
pub fn generate_data(options: &PrepareOptions, output_dir: &Path) -> Result<ArtifactPaths> {
    let output = compute(options)?;
    persist(&output, options, output_dir)
}
