//! Чтение входных массивов (.npy/.npz) и запись артефактов (.pkl)

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayD, ArrayView3, Axis, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, ReadNpyError, ReadNpyExt, ReadNpzError};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};
use crate::preprocessing::CalendarOrdinals;
use crate::types::{ScalerRecord, SplitIndex};

pub const SCALER_FILE: &str = "scaler.pkl";
pub const INDEX_FILE: &str = "index.pkl";
pub const DATA_FILE: &str = "data.pkl";
pub const GRAPH_FILE: &str = "adj_mx.pkl";

/// Ключ массива внутри .npz по умолчанию
pub const DEFAULT_ARRAY_KEY: &str = "x";

const SUPPORTED_DTYPES: &str = "f64, f32, i64 or i32";

fn read_npy_f64(path: &Path) -> Result<ArrayD<f64>> {
    macro_rules! attempt {
        ($t:ty) => {
            let file = File::open(path).map_err(|e| PrepError::io(path, e))?;
            match ArrayD::<$t>::read_npy(BufReader::new(file)) {
                Ok(arr) => return Ok(arr.mapv(|v| v as f64)),
                Err(ReadNpyError::WrongDescriptor(_)) => {}
                Err(source) => {
                    return Err(PrepError::Npy {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        };
    }

    attempt!(f64);
    attempt!(f32);
    attempt!(i64);
    attempt!(i32);
    Err(PrepError::input(
        path,
        format!("unsupported dtype, expected {}", SUPPORTED_DTYPES),
    ))
}

fn read_npz_f64(path: &Path, key: &str) -> Result<ArrayD<f64>> {
    let file = File::open(path).map_err(|e| PrepError::io(path, e))?;
    let mut npz = NpzReader::new(file).map_err(|source| PrepError::Npz {
        path: path.to_path_buf(),
        source,
    })?;

    let names = npz.names().map_err(|source| PrepError::Npz {
        path: path.to_path_buf(),
        source,
    })?;
    let npy_name = format!("{}.npy", key);
    let entry = match names.iter().find(|n| *n == key || **n == npy_name) {
        Some(entry) => entry.clone(),
        None => {
            return Err(PrepError::input(
                path,
                format!("array '{}' not found, available: {:?}", key, names),
            ))
        }
    };

    macro_rules! attempt {
        ($t:ty) => {
            match npz.by_name::<OwnedRepr<$t>, IxDyn>(&entry) {
                Ok(arr) => return Ok(arr.mapv(|v| v as f64)),
                Err(ReadNpzError::Npy(ReadNpyError::WrongDescriptor(_))) => {}
                Err(source) => {
                    return Err(PrepError::Npz {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        };
    }

    attempt!(f64);
    attempt!(f32);
    attempt!(i64);
    attempt!(i32);
    Err(PrepError::input(
        path,
        format!("unsupported dtype for '{}', expected {}", key, SUPPORTED_DTYPES),
    ))
}

/// Загрузка произвольного числового массива как f64.
/// Для .npz берется массив с именем `key`, для .npy единственный массив файла.
pub fn load_array(path: &Path, key: &str) -> Result<ArrayD<f64>> {
    if !path.is_file() {
        return Err(PrepError::input(path, "file not found"));
    }

    let arr = match path.extension().and_then(|e| e.to_str()) {
        Some("npz") => read_npz_f64(path, key)?,
        Some("npy") => read_npy_f64(path)?,
        other => {
            return Err(PrepError::input(
                path,
                format!("unsupported extension {:?}, expected .npy or .npz", other),
            ))
        }
    };

    tracing::debug!(path = %path.display(), shape = ?arr.shape(), "Loaded array");
    Ok(arr)
}

/// Сырой ряд `(L, N, F)` с выбранными каналами в заданном порядке
pub fn load_raw_series(path: &Path, key: &str, channels: &[usize]) -> Result<Array3<f64>> {
    let arr = load_array(path, key)?;
    let shape = arr.shape().to_vec();
    if shape.len() != 3 || shape.iter().any(|&d| d == 0) {
        return Err(PrepError::shape(
            format!("raw series {}", path.display()),
            "non-empty rank 3 (L, N, F)",
            &shape,
        ));
    }
    let data = arr
        .into_dimensionality::<ndarray::Ix3>()
        .map_err(|_| PrepError::shape("raw series", "rank 3 (L, N, F)", &shape))?;

    select_channels(data, channels).map_err(|e| match e {
        PrepError::InvalidValue(reason) => PrepError::input(path, reason),
        other => other,
    })
}

pub fn select_channels(data: Array3<f64>, channels: &[usize]) -> Result<Array3<f64>> {
    let available = data.len_of(Axis(2));
    if channels.is_empty() {
        return Err(PrepError::InvalidValue("no channels selected".to_string()));
    }
    if let Some(&bad) = channels.iter().find(|&&c| c >= available) {
        return Err(PrepError::InvalidValue(format!(
            "channel {} out of range, series has {} channels",
            bad, available
        )));
    }
    Ok(data.select(Axis(2), channels))
}

pub fn load_time_metadata(path: &Path, key: &str) -> Result<CalendarOrdinals> {
    let arr = load_array(path, key)?;
    CalendarOrdinals::from_metadata(arr.view())
}

/// Сериализация `(L, N, C)` как вложенных списков без промежуточных Vec
struct TensorView<'a>(ArrayView3<'a, f64>);

struct Row<'a>(ndarray::ArrayView1<'a, f64>);

struct Plane<'a>(ndarray::ArrayView2<'a, f64>);

impl Serialize for Row<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for v in self.0.iter() {
            seq.serialize_element(v)?;
        }
        seq.end()
    }
}

impl Serialize for Plane<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.nrows()))?;
        for row in self.0.outer_iter() {
            seq.serialize_element(&Row(row))?;
        }
        seq.end()
    }
}

impl Serialize for TensorView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len_of(Axis(0))))?;
        for plane in self.0.outer_iter() {
            seq.serialize_element(&Plane(plane))?;
        }
        seq.end()
    }
}

#[derive(Serialize)]
struct DataArtifact<'a> {
    raw_data: TensorView<'a>,
}

#[derive(Deserialize)]
struct LoadedData {
    raw_data: Vec<Vec<Vec<f64>>>,
}

fn write_pickle<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| PrepError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_pickle::to_writer(&mut writer, value, serde_pickle::SerOptions::new()).map_err(
        |source| PrepError::Pickle {
            path: path.to_path_buf(),
            source,
        },
    )?;
    writer.flush().map_err(|e| PrepError::io(path, e))
}

fn read_pickle<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| PrepError::io(path, e))?;
    serde_pickle::from_reader(BufReader::new(file), serde_pickle::DeOptions::new()).map_err(
        |source| PrepError::Pickle {
            path: path.to_path_buf(),
            source,
        },
    )
}

/// Пути записанных артефактов
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub scaler: PathBuf,
    pub index: PathBuf,
    pub data: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            scaler: dir.join(SCALER_FILE),
            index: dir.join(INDEX_FILE),
            data: dir.join(DATA_FILE),
        }
    }
}

/// Пишет `scaler.pkl`, `index.pkl`, `data.pkl`; существующие файлы перезаписываются.
///
/// `raw_data` в `data.pkl` хранится вложенными списками `[L][N][C]`, не ndarray:
/// раннер должен обернуть его в `np.array(...)` перед срезом `[..., features]`.
pub fn persist_artifacts(
    dir: &Path,
    scaler: &ScalerRecord,
    index: &SplitIndex,
    features: ArrayView3<f64>,
) -> Result<ArtifactPaths> {
    let paths = ArtifactPaths::in_dir(dir);

    write_pickle(&paths.scaler, scaler)?;
    write_pickle(&paths.index, index)?;
    write_pickle(
        &paths.data,
        &DataArtifact {
            raw_data: TensorView(features),
        },
    )?;

    tracing::info!(
        dir = %dir.display(),
        shape = ?features.shape(),
        "Persisted scaler, index and data artifacts"
    );
    Ok(paths)
}

/// Копия файла графа смежности рядом с артефактами
pub fn copy_graph(graph_path: &Path, dir: &Path) -> Result<PathBuf> {
    if !graph_path.is_file() {
        return Err(PrepError::input(graph_path, "graph file not found"));
    }
    let target = dir.join(GRAPH_FILE);
    fs::copy(graph_path, &target).map_err(|e| PrepError::io(graph_path, e))?;
    tracing::info!(from = %graph_path.display(), to = %target.display(), "Copied adjacency matrix");
    Ok(target)
}

/// Подготовленный датасет, прочитанный обратно из каталога
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub scaler: ScalerRecord,
    pub index: SplitIndex,
    pub raw_data: Array3<f64>,
}

impl PreparedDataset {
    pub fn load(dir: &Path) -> Result<Self> {
        let paths = ArtifactPaths::in_dir(dir);
        let scaler: ScalerRecord = read_pickle(&paths.scaler)?;
        let index: SplitIndex = read_pickle(&paths.index)?;
        let loaded: LoadedData = read_pickle(&paths.data)?;

        let raw_data = nested_to_array(loaded.raw_data)
            .map_err(|reason| PrepError::input(&paths.data, reason))?;
        Ok(Self {
            scaler,
            index,
            raw_data,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.raw_data.len_of(Axis(1))
    }

    pub fn num_channels(&self) -> usize {
        self.raw_data.len_of(Axis(2))
    }
}

fn nested_to_array(nested: Vec<Vec<Vec<f64>>>) -> std::result::Result<Array3<f64>, String> {
    let len = nested.len();
    let nodes = nested.first().map_or(0, |p| p.len());
    let channels = nested
        .first()
        .and_then(|p| p.first())
        .map_or(0, |r| r.len());

    let mut flat = Vec::with_capacity(len * nodes * channels);
    for (t, plane) in nested.into_iter().enumerate() {
        if plane.len() != nodes {
            return Err(format!("ragged raw_data at step {}", t));
        }
        for row in plane {
            if row.len() != channels {
                return Err(format!("ragged raw_data at step {}", t));
            }
            flat.extend(row);
        }
    }

    Array3::from_shape_vec((len, nodes, channels), flat).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleIndex;
    use ndarray::{array, Array2};
    use ndarray_npy::{write_npy, NpzWriter};
    use tempfile::tempdir;

    #[test]
    fn test_load_npy_f32_converts_to_f64() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("speed.npy");
        let arr = Array3::<f32>::from_shape_fn((4, 2, 3), |(t, n, c)| (t * 6 + n * 3 + c) as f32);
        write_npy(&path, &arr).unwrap();

        let loaded = load_raw_series(&path, DEFAULT_ARRAY_KEY, &[2, 0]).unwrap();
        assert_eq!(loaded.dim(), (4, 2, 2));
        assert_eq!(loaded[[1, 1, 0]], 11.0);
        assert_eq!(loaded[[1, 1, 1]], 9.0);
    }

    #[test]
    fn test_load_npz_by_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("time.npz");
        let mut npz = NpzWriter::new(File::create(&path).unwrap());
        npz.add_array("x", &array![[1i64, 1], [1, 2], [1, 3]]).unwrap();
        npz.finish().unwrap();

        let ordinals = load_time_metadata(&path, "x").unwrap();
        assert_eq!(ordinals.time_of_day, array![1.0, 2.0, 3.0]);

        let err = load_array(&path, "y").unwrap_err();
        assert!(err.to_string().contains("'y' not found"));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = load_array(Path::new("no/such/file.npz"), "x").unwrap_err();
        assert!(matches!(err, PrepError::Input { .. }));
        assert!(err.to_string().contains("no/such/file.npz"));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("speed.csv");
        fs::write(&path, "1,2,3").unwrap();
        assert!(load_array(&path, "x").is_err());
    }

    #[test]
    fn test_raw_series_rank_is_checked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flat.npy");
        write_npy(&path, &Array2::<f64>::zeros((5, 2))).unwrap();
        let err = load_raw_series(&path, "x", &[0]).unwrap_err();
        assert!(matches!(err, PrepError::Shape { .. }));
    }

    #[test]
    fn test_channel_out_of_range() {
        let data = Array3::<f64>::zeros((2, 2, 2));
        assert!(select_channels(data.clone(), &[0, 2]).is_err());
        assert!(select_channels(data, &[]).is_err());
    }

    #[test]
    fn test_persist_and_load_back() {
        let dir = tempdir().unwrap();
        let scaler = ScalerRecord::min_max(1.5, 70.0);
        let index = SplitIndex {
            train: vec![SampleIndex::new(0, 2, 4), SampleIndex::new(1, 3, 5)],
            valid: vec![SampleIndex::new(2, 4, 6)],
            test: vec![],
        };
        let features = Array3::from_shape_fn((6, 2, 3), |(t, n, c)| {
            t as f64 + n as f64 * 0.1 + c as f64 * 0.01
        });

        let paths = persist_artifacts(dir.path(), &scaler, &index, features.view()).unwrap();
        assert!(paths.scaler.is_file() && paths.index.is_file() && paths.data.is_file());

        let prepared = PreparedDataset::load(dir.path()).unwrap();
        assert_eq!(prepared.scaler, scaler);
        assert_eq!(prepared.index, index);
        assert_eq!(prepared.raw_data, features);
        assert_eq!(prepared.num_nodes(), 2);
        assert_eq!(prepared.num_channels(), 3);
    }

    #[test]
    fn test_persist_overwrites_existing_files() {
        let dir = tempdir().unwrap();
        let stale = b"stale bytes that are longer than before";
        fs::write(dir.path().join(SCALER_FILE), stale).unwrap();

        let scaler = ScalerRecord::min_max(0.0, 1.0);
        let features = Array3::<f64>::zeros((2, 1, 1));
        persist_artifacts(dir.path(), &scaler, &SplitIndex::default(), features.view()).unwrap();

        let prepared = PreparedDataset::load(dir.path()).unwrap();
        assert_eq!(prepared.scaler, scaler);
    }

    #[test]
    fn test_copy_graph() {
        let dir = tempdir().unwrap();
        let graph = dir.path().join("adj_BAST.pkl");
        fs::write(&graph, b"adjacency").unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let copied = copy_graph(&graph, &out).unwrap();
        assert_eq!(fs::read(copied).unwrap(), b"adjacency");
        assert!(copy_graph(&dir.path().join("missing.pkl"), &out).is_err());
    }

    #[test]
    fn test_nested_to_array_rejects_ragged() {
        let ragged = vec![vec![vec![1.0, 2.0]], vec![vec![1.0]]];
        assert!(nested_to_array(ragged).is_err());
    }
}
