//! Маскированные метрики и функции потерь, выбираемые по имени

use std::collections::{BTreeMap, HashMap};

use ndarray::{ArrayViewD, Zip};

use crate::error::{ConfigError, PrepError, Result};

/// Метрика качества прогноза
pub trait MetricFunction: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(
        &self,
        prediction: ArrayViewD<f64>,
        target: ArrayViewD<f64>,
        null_val: f64,
    ) -> Result<f64>;
}

/// Функция потерь для обучения
pub trait LossFunction: Send + Sync {
    fn name(&self) -> &'static str;

    fn loss(
        &self,
        prediction: ArrayViewD<f64>,
        target: ArrayViewD<f64>,
        null_val: f64,
    ) -> Result<f64>;
}

fn is_null(target: f64, null_val: f64) -> bool {
    // NaN в цели всегда считается пропуском
    target.is_nan() || (!null_val.is_nan() && target == null_val)
}

/// Среднее `term(p, t)` по элементам, где цель не пропуск; 0.0, если таких нет
fn masked_mean(
    prediction: ArrayViewD<f64>,
    target: ArrayViewD<f64>,
    null_val: f64,
    term: impl Fn(f64, f64) -> Option<f64>,
) -> Result<f64> {
    if prediction.shape() != target.shape() {
        return Err(PrepError::shape(
            "prediction",
            format!("{:?}", target.shape()),
            prediction.shape(),
        ));
    }

    let mut sum = 0.0;
    let mut count = 0usize;
    Zip::from(&prediction).and(&target).for_each(|&p, &t| {
        if is_null(t, null_val) {
            return;
        }
        if let Some(v) = term(p, t) {
            sum += v;
            count += 1;
        }
    });

    Ok(if count == 0 { 0.0 } else { sum / count as f64 })
}

pub struct MaskedMae;
pub struct MaskedRmse;
pub struct MaskedMape;
pub struct MaskedL1Loss;

impl MetricFunction for MaskedMae {
    fn name(&self) -> &'static str {
        "masked_mae"
    }

    fn evaluate(
        &self,
        prediction: ArrayViewD<f64>,
        target: ArrayViewD<f64>,
        null_val: f64,
    ) -> Result<f64> {
        masked_mean(prediction, target, null_val, |p, t| Some((p - t).abs()))
    }
}

impl MetricFunction for MaskedRmse {
    fn name(&self) -> &'static str {
        "masked_rmse"
    }

    fn evaluate(
        &self,
        prediction: ArrayViewD<f64>,
        target: ArrayViewD<f64>,
        null_val: f64,
    ) -> Result<f64> {
        let mse = masked_mean(prediction, target, null_val, |p, t| Some((p - t).powi(2)))?;
        Ok(mse.sqrt())
    }
}

impl MetricFunction for MaskedMape {
    fn name(&self) -> &'static str {
        "masked_mape"
    }

    fn evaluate(
        &self,
        prediction: ArrayViewD<f64>,
        target: ArrayViewD<f64>,
        null_val: f64,
    ) -> Result<f64> {
        // нулевые цели пропускаются
        masked_mean(prediction, target, null_val, |p, t| {
            (t != 0.0).then(|| ((p - t) / t).abs())
        })
    }
}

impl LossFunction for MaskedL1Loss {
    fn name(&self) -> &'static str {
        "masked_l1_loss"
    }

    fn loss(
        &self,
        prediction: ArrayViewD<f64>,
        target: ArrayViewD<f64>,
        null_val: f64,
    ) -> Result<f64> {
        masked_mean(prediction, target, null_val, |p, t| Some((p - t).abs()))
    }
}

/// Реестр метрик и потерь по имени
pub struct Registry {
    metrics: HashMap<String, Box<dyn MetricFunction>>,
    losses: HashMap<String, Box<dyn LossFunction>>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            metrics: HashMap::new(),
            losses: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register_metric(Box::new(MaskedMae));
        registry.register_metric(Box::new(MaskedRmse));
        registry.register_metric(Box::new(MaskedMape));
        registry.register_loss(Box::new(MaskedL1Loss));
        registry
    }

    pub fn register_metric(&mut self, metric: Box<dyn MetricFunction>) {
        self.metrics.insert(metric.name().to_string(), metric);
    }

    pub fn register_loss(&mut self, loss: Box<dyn LossFunction>) {
        self.losses.insert(loss.name().to_string(), loss);
    }

    pub fn metric(&self, name: &str) -> std::result::Result<&dyn MetricFunction, ConfigError> {
        self.metrics
            .get(name)
            .map(|m| m.as_ref())
            .ok_or_else(|| ConfigError::UnknownMetric(name.to_string()))
    }

    pub fn loss(&self, name: &str) -> std::result::Result<&dyn LossFunction, ConfigError> {
        self.losses
            .get(name)
            .map(|l| l.as_ref())
            .ok_or_else(|| ConfigError::UnknownLoss(name.to_string()))
    }

    /// Все метрики конфигурации: отображаемое имя -> значение
    pub fn evaluate_all(
        &self,
        metrics: &BTreeMap<String, String>,
        prediction: ArrayViewD<f64>,
        target: ArrayViewD<f64>,
        null_val: f64,
    ) -> anyhow::Result<BTreeMap<String, f64>> {
        let mut results = BTreeMap::new();
        for (label, func) in metrics {
            let value = self.metric(func)?.evaluate(prediction.view(), target.view(), null_val)?;
            results.insert(label.clone(), value);
        }
        Ok(results)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
