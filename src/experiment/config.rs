//! Конфигурация эксперимента STID для внешнего раннера
//!
//! Схема фиксирована, неизвестные ключи отклоняются при чтении.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::metrics::Registry;
use crate::error::{ConfigError, PrepError, Result};
use crate::storage::PreparedDataset;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    pub description: String,
    pub dataset_name: String,
    pub dataset_type: String,
    pub gpu_num: usize,
    /// Отображаемое имя -> имя функции в реестре
    pub metrics: BTreeMap<String, String>,
    pub env: EnvConfig,
    pub model: ModelConfig,
    pub train: TrainConfig,
    pub val: EvalConfig,
    pub test: EvalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvConfig {
    /// Сид передается раннеру явно, глобального состояния нет
    pub seed: u64,
    pub cudnn_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StidParams {
    pub num_nodes: usize,
    pub input_len: usize,
    pub input_dim: usize,
    pub embed_dim: usize,
    pub output_len: usize,
    pub num_layer: usize,
    pub if_node: bool,
    pub node_dim: usize,
    pub if_t_i_d: bool,
    pub if_d_i_w: bool,
    pub temp_dim_tid: usize,
    pub temp_dim_diw: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub name: String,
    pub params: StidParams,
    pub forward_features: Vec<usize>,
    pub target_features: Vec<usize>,
}

/// Раскладка каналов подготовленного тензора:
/// выбранные сырые каналы, затем time in day и, если есть, day in week
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLayout {
    pub num_nodes: usize,
    pub raw_channels: usize,
    pub day_in_week: bool,
    pub history_len: usize,
    pub future_len: usize,
}

impl DataLayout {
    pub fn num_channels(&self) -> usize {
        self.raw_channels + 1 + usize::from(self.day_in_week)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Adam,
    AdamW,
    #[serde(rename = "SGD")]
    Sgd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub lr: f64,
    pub weight_decay: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LrSchedulerKind {
    MultiStepLR,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LrSchedulerConfig {
    pub kind: LrSchedulerKind,
    pub milestones: Vec<usize>,
    pub gamma: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataLoaderConfig {
    pub dir: String,
    pub batch_size: usize,
    pub prefetch: bool,
    pub shuffle: bool,
    pub num_workers: usize,
    pub pin_memory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainConfig {
    pub loss: String,
    pub optim: OptimizerConfig,
    pub lr_scheduler: LrSchedulerConfig,
    pub num_epochs: usize,
    pub ckpt_save_dir: String,
    pub null_val: f64,
    pub data: DataLoaderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvalConfig {
    pub interval: usize,
    pub data: DataLoaderConfig,
}

impl DataLoaderConfig {
    fn training(dir: &str) -> Self {
        Self {
            dir: dir.to_string(),
            batch_size: 64,
            prefetch: true,
            shuffle: true,
            num_workers: 1,
            pin_memory: true,
        }
    }

    fn evaluation(dir: &str) -> Self {
        Self {
            dir: dir.to_string(),
            batch_size: 64,
            prefetch: false,
            shuffle: false,
            num_workers: 1,
            pin_memory: false,
        }
    }
}

impl ExperimentConfig {
    /// STID на датасете BAST (скорость трафика)
    pub fn stid_bast() -> Self {
        let dataset_name = "BAST";
        let data_dir = format!("datasets/{}", dataset_name);
        let model_name = "STID";
        let num_epochs = 100;

        let metrics = [("MAE", "masked_mae"), ("RMSE", "masked_rmse"), ("MAPE", "masked_mape")]
            .into_iter()
            .map(|(label, func)| (label.to_string(), func.to_string()))
            .collect();

        Self {
            description: "Basic MTS model configuration".to_string(),
            dataset_name: dataset_name.to_string(),
            dataset_type: "Traffic speed".to_string(),
            gpu_num: 1,
            metrics,
            env: EnvConfig {
                seed: 1,
                cudnn_enabled: true,
            },
            model: ModelConfig {
                name: model_name.to_string(),
                params: StidParams {
                    num_nodes: 1680,
                    input_len: 12,
                    input_dim: 4,
                    embed_dim: 32,
                    output_len: 12,
                    num_layer: 3,
                    if_node: true,
                    node_dim: 32,
                    if_t_i_d: true,
                    if_d_i_w: true,
                    temp_dim_tid: 32,
                    temp_dim_diw: 32,
                },
                // скорость, доп. канал, time in day, day in week
                forward_features: vec![0, 1, 2, 3],
                target_features: vec![0, 1],
            },
            train: TrainConfig {
                loss: "masked_l1_loss".to_string(),
                optim: OptimizerConfig {
                    kind: OptimizerKind::Adam,
                    lr: 0.002,
                    weight_decay: 0.0001,
                },
                lr_scheduler: LrSchedulerConfig {
                    kind: LrSchedulerKind::MultiStepLR,
                    milestones: vec![1, 50, 80],
                    gamma: 0.5,
                },
                num_epochs,
                ckpt_save_dir: format!("checkpoints/{}_{}", model_name, num_epochs),
                null_val: 0.0,
                data: DataLoaderConfig::training(&data_dir),
            },
            val: EvalConfig {
                interval: 1,
                data: DataLoaderConfig::evaluation(&data_dir),
            },
            test: EvalConfig {
                interval: 1,
                data: DataLoaderConfig::evaluation(&data_dir),
            },
        }
    }

    /// Копия, у которой все три загрузчика смотрят в `dir`
    pub fn with_data_dir(&self, dir: &Path) -> Self {
        let dir = dir.to_string_lossy().into_owned();
        let mut config = self.clone();
        config.train.data.dir = dir.clone();
        config.val.data.dir = dir.clone();
        config.test.data.dir = dir;
        config
    }

    pub fn validate(&self, registry: &Registry) -> std::result::Result<(), ConfigError> {
        if self.dataset_name.trim().is_empty() {
            return Err(ConfigError::invalid("dataset_name", "must not be empty"));
        }
        if self.model.name.trim().is_empty() {
            return Err(ConfigError::invalid("model.name", "must not be empty"));
        }
        if self.metrics.is_empty() {
            return Err(ConfigError::invalid("metrics", "at least one metric is required"));
        }
        for func in self.metrics.values() {
            registry.metric(func)?;
        }
        registry.loss(&self.train.loss)?;

        let params = &self.model.params;
        if params.num_nodes == 0 || params.input_len == 0 || params.output_len == 0 {
            return Err(ConfigError::invalid(
                "model.params",
                "num_nodes, input_len and output_len must be > 0",
            ));
        }
        if params.input_dim != self.model.forward_features.len() {
            return Err(ConfigError::invalid(
                "model.params.input_dim",
                format!(
                    "{} does not match {} forward features",
                    params.input_dim,
                    self.model.forward_features.len()
                ),
            ));
        }
        if let Some(t) = self
            .model
            .target_features
            .iter()
            .find(|t| !self.model.forward_features.contains(t))
        {
            return Err(ConfigError::invalid(
                "model.target_features",
                format!("feature {} is not among forward features", t),
            ));
        }

        let optim = &self.train.optim;
        if !(optim.lr.is_finite() && optim.lr > 0.0) {
            return Err(ConfigError::invalid("train.optim.lr", "must be > 0"));
        }
        if !(optim.weight_decay.is_finite() && optim.weight_decay >= 0.0) {
            return Err(ConfigError::invalid("train.optim.weight_decay", "must be >= 0"));
        }

        let sched = &self.train.lr_scheduler;
        if !(sched.gamma > 0.0 && sched.gamma <= 1.0) {
            return Err(ConfigError::invalid("train.lr_scheduler.gamma", "must be in (0, 1]"));
        }
        if sched.milestones.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::invalid(
                "train.lr_scheduler.milestones",
                "must be strictly increasing",
            ));
        }
        if self.train.num_epochs == 0 {
            return Err(ConfigError::invalid("train.num_epochs", "must be > 0"));
        }

        for (field, loader) in [
            ("train.data", &self.train.data),
            ("val.data", &self.val.data),
            ("test.data", &self.test.data),
        ] {
            if loader.batch_size == 0 {
                return Err(ConfigError::invalid(
                    format!("{}.batch_size", field),
                    "must be > 0",
                ));
            }
            if loader.dir.trim().is_empty() {
                return Err(ConfigError::invalid(format!("{}.dir", field), "must not be empty"));
            }
        }
        if self.val.interval == 0 || self.test.interval == 0 {
            return Err(ConfigError::invalid("val/test.interval", "must be > 0"));
        }

        Ok(())
    }

    /// Окна, узлы и каналы под конкретный подготовленный датасет
    pub fn with_layout(&self, layout: &DataLayout) -> Self {
        let mut config = self.clone();
        let params = &mut config.model.params;
        params.num_nodes = layout.num_nodes;
        params.input_len = layout.history_len;
        params.output_len = layout.future_len;
        params.input_dim = layout.num_channels();
        params.if_t_i_d = true;
        params.if_d_i_w = layout.day_in_week;
        config.model.forward_features = (0..layout.num_channels()).collect();
        config.model.target_features = (0..layout.raw_channels).collect();
        config
    }

    /// Сверка с формой подготовленного тензора `(L, N, C)`
    pub fn check_layout(
        &self,
        num_nodes: usize,
        num_channels: usize,
    ) -> std::result::Result<(), ConfigError> {
        if let Some(f) = self.model.forward_features.iter().find(|&&f| f >= num_channels) {
            return Err(ConfigError::invalid(
                "model.forward_features",
                format!("feature {} exceeds {} prepared channels", f, num_channels),
            ));
        }
        if self.model.params.num_nodes != num_nodes {
            return Err(ConfigError::invalid(
                "model.params.num_nodes",
                format!(
                    "{} does not match {} nodes in prepared data",
                    self.model.params.num_nodes, num_nodes
                ),
            ));
        }
        Ok(())
    }

    pub fn check_dataset(
        &self,
        prepared: &PreparedDataset,
    ) -> std::result::Result<(), ConfigError> {
        self.check_layout(prepared.num_nodes(), prepared.num_channels())
    }

    pub fn from_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PrepError::io(path, e))?;
        serde_json::from_str(&content).map_err(|source| PrepError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|source| PrepError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(|e| PrepError::io(path, e))
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self::stid_bast()
    }
}
