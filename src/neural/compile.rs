// projeto: seqforecast
// file: src/neural/compile.rs
// Compile configuration: optimizer, loss and metrics, with default merging

use serde::{Deserialize, Serialize};

use crate::neural::losses::{LossKind, MetricKind};
use crate::neural::optim::OptimizerKind;
use crate::neural::utils::TrainingError;

/// Partially specified compile settings. Missing keys are filled by `merged_with`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<OptimizerKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<LossKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<MetricKind>>,
}

impl CompileOptions {
    /// The fallback settings: adam, rmse, [mae].
    pub fn defaults() -> Self {
        CompileOptions {
            optimizer: Some(OptimizerKind::adam()),
            loss: Some(LossKind::Rmse),
            metrics: Some(vec![MetricKind::Mae]),
        }
    }

    /// Keys already present win; absent keys are taken from `defaults`.
    pub fn merged_with(&self, defaults: &CompileOptions) -> CompileOptions {
        CompileOptions {
            optimizer: self.optimizer.clone().or_else(|| defaults.optimizer.clone()),
            loss: self.loss.or(defaults.loss),
            metrics: self.metrics.clone().or_else(|| defaults.metrics.clone()),
        }
    }

    /// Fills in the defaults, with `metrics` (when given) standing in for the default metric list.
    pub fn resolve(&self, metrics: Option<&[MetricKind]>) -> Result<CompileConfig, TrainingError> {
        let mut defaults = CompileOptions::defaults();
        if let Some(list) = metrics {
            defaults.metrics = Some(list.to_vec());
        }
        let merged = self.merged_with(&defaults);
        let config = CompileConfig {
            optimizer: merged.optimizer.unwrap_or_else(OptimizerKind::adam),
            loss: merged.loss.unwrap_or(LossKind::Rmse),
            metrics: merged.metrics.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Fully resolved compile settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    pub optimizer: OptimizerKind,
    pub loss: LossKind,
    pub metrics: Vec<MetricKind>,
}

impl CompileConfig {
    pub fn validate(&self) -> Result<(), TrainingError> {
        self.optimizer.validate()
    }
}

impl Default for CompileConfig {
    fn default() -> Self {
        CompileConfig {
            optimizer: OptimizerKind::adam(),
            loss: LossKind::Rmse,
            metrics: vec![MetricKind::Mae],
        }
    }
}
