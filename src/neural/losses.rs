// projeto: seqforecast
// file: src/neural/losses.rs
// Loss functions (with gradients) and evaluation metrics

use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::neural::utils::TrainingError;

const HUBER_DELTA: f64 = 1.0;

/// Training objective.
///
/// * `mse` - mean squared error.
/// * `mae` - mean absolute error.
/// * `rmse` - square root of the mean squared error (default objective).
/// * `huber` - quadratic below delta = 1, linear above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    Mse,
    Mae,
    Rmse,
    Huber,
}

impl LossKind {
    pub fn name(self) -> &'static str {
        match self {
            LossKind::Mse => "mse",
            LossKind::Mae => "mae",
            LossKind::Rmse => "rmse",
            LossKind::Huber => "huber",
        }
    }

    pub fn compute(self, predictions: &ArrayD<f64>, targets: &ArrayD<f64>) -> Result<f64, TrainingError> {
        check_same_shape(predictions, targets)?;
        let n = predictions.len().max(1) as f64;
        let value = match self {
            LossKind::Mse => squared_error_sum(predictions, targets) / n,
            LossKind::Mae => absolute_error_sum(predictions, targets) / n,
            LossKind::Rmse => (squared_error_sum(predictions, targets) / n).sqrt(),
            LossKind::Huber => {
                predictions
                    .iter()
                    .zip(targets.iter())
                    .map(|(p, t)| {
                        let e = (p - t).abs();
                        if e <= HUBER_DELTA {
                            0.5 * e * e
                        } else {
                            HUBER_DELTA * (e - 0.5 * HUBER_DELTA)
                        }
                    })
                    .sum::<f64>()
                    / n
            }
        };
        Ok(value)
    }

    /// Gradient of the mean loss with respect to the predictions.
    pub fn gradient(self, predictions: &ArrayD<f64>, targets: &ArrayD<f64>) -> Result<ArrayD<f64>, TrainingError> {
        check_same_shape(predictions, targets)?;
        let n = predictions.len().max(1) as f64;
        let diff = predictions - targets;
        let grad = match self {
            LossKind::Mse => diff.mapv(|d| 2.0 * d / n),
            LossKind::Mae => diff.mapv(|d| if d == 0.0 { 0.0 } else { d.signum() / n }),
            LossKind::Rmse => {
                let rmse = (diff.iter().map(|d| d * d).sum::<f64>() / n).sqrt();
                if rmse < 1e-12 {
                    ArrayD::zeros(diff.raw_dim())
                } else {
                    diff.mapv(|d| d / (n * rmse))
                }
            }
            LossKind::Huber => diff.mapv(|d| d.clamp(-HUBER_DELTA, HUBER_DELTA) / n),
        };
        Ok(grad)
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossKind {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mse" | "mean_squared_error" => Ok(LossKind::Mse),
            "mae" | "mean_absolute_error" => Ok(LossKind::Mae),
            "rmse" | "root_mean_squared_error" => Ok(LossKind::Rmse),
            "huber" => Ok(LossKind::Huber),
            other => Err(TrainingError::Compile(format!("unknown loss '{}'", other))),
        }
    }
}

/// Metrics reported per epoch next to the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Mae,
    Mse,
    Rmse,
    Mape,
}

impl MetricKind {
    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Mae => "mae",
            MetricKind::Mse => "mse",
            MetricKind::Rmse => "rmse",
            MetricKind::Mape => "mape",
        }
    }

    pub fn compute(self, predictions: &ArrayD<f64>, targets: &ArrayD<f64>) -> Result<f64, TrainingError> {
        match self {
            MetricKind::Mae => LossKind::Mae.compute(predictions, targets),
            MetricKind::Mse => LossKind::Mse.compute(predictions, targets),
            MetricKind::Rmse => LossKind::Rmse.compute(predictions, targets),
            MetricKind::Mape => {
                check_same_shape(predictions, targets)?;
                let n = predictions.len().max(1) as f64;
                let total: f64 = predictions
                    .iter()
                    .zip(targets.iter())
                    .map(|(p, t)| ((t - p) / t.abs().max(1e-7)).abs())
                    .sum();
                Ok(100.0 * total / n)
            }
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mae" | "mean_absolute_error" => Ok(MetricKind::Mae),
            "mse" | "mean_squared_error" => Ok(MetricKind::Mse),
            "rmse" | "root_mean_squared_error" => Ok(MetricKind::Rmse),
            "mape" | "mean_absolute_percentage_error" => Ok(MetricKind::Mape),
            other => Err(TrainingError::Compile(format!("unknown metric '{}'", other))),
        }
    }
}

/// Brings window targets in line with the network output.
///
/// Targets carrying one extra time axis, (batch, L, k) against predictions of
/// (batch, k), are reduced to the last step of each window.
pub fn align_targets(targets: &ArrayD<f64>, output_shape: &[usize]) -> Result<ArrayD<f64>, TrainingError> {
    let target_sample = &targets.shape()[1..];
    if target_sample == output_shape {
        return Ok(targets.clone());
    }
    if targets.ndim() == output_shape.len() + 2 && &target_sample[1..] == output_shape {
        let steps = targets.shape()[1];
        if steps == 0 {
            return Err(TrainingError::Shape("target windows are empty".to_string()));
        }
        return Ok(targets.index_axis(Axis(1), steps - 1).to_owned());
    }
    Err(TrainingError::Shape(format!(
        "targets of shape {:?} do not match model output (batch, {:?})",
        targets.shape(),
        output_shape
    )))
}

fn check_same_shape(predictions: &ArrayD<f64>, targets: &ArrayD<f64>) -> Result<(), TrainingError> {
    if predictions.shape() != targets.shape() {
        return Err(TrainingError::Shape(format!(
            "predictions {:?} vs targets {:?}",
            predictions.shape(),
            targets.shape()
        )));
    }
    Ok(())
}

fn squared_error_sum(predictions: &ArrayD<f64>, targets: &ArrayD<f64>) -> f64 {
    predictions.iter().zip(targets.iter()).map(|(p, t)| (p - t).powi(2)).sum()
}

fn absolute_error_sum(predictions: &ArrayD<f64>, targets: &ArrayD<f64>) -> f64 {
    predictions.iter().zip(targets.iter()).map(|(p, t)| (p - t).abs()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn dyn2(rows: Vec<f64>) -> ArrayD<f64> {
        let n = rows.len();
        Array2::from_shape_vec((n, 1), rows).unwrap().into_dyn()
    }

    #[test]
    fn test_loss_values() {
        let p = dyn2(vec![1.0, 2.0, 3.0]);
        let t = dyn2(vec![1.0, 2.0, 5.0]);
        assert!((LossKind::Mse.compute(&p, &t).unwrap() - 4.0 / 3.0).abs() < 1e-12);
        assert!((LossKind::Mae.compute(&p, &t).unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((LossKind::Rmse.compute(&p, &t).unwrap() - (4.0f64 / 3.0).sqrt()).abs() < 1e-12);
        // |e| = 2 > delta: 1 * (2 - 0.5) / 3
        assert!((LossKind::Huber.compute(&p, &t).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let p = dyn2(vec![0.3, -1.2, 2.0]);
        let t = dyn2(vec![0.1, 0.4, 1.0]);
        for loss in [LossKind::Mse, LossKind::Mae, LossKind::Rmse, LossKind::Huber] {
            let grad = loss.gradient(&p, &t).unwrap();
            for i in 0..3 {
                let eps = 1e-6;
                let mut plus = p.clone();
                plus[[i, 0]] += eps;
                let mut minus = p.clone();
                minus[[i, 0]] -= eps;
                let numeric = (loss.compute(&plus, &t).unwrap() - loss.compute(&minus, &t).unwrap()) / (2.0 * eps);
                assert!((numeric - grad[[i, 0]]).abs() < 1e-5, "{} grad mismatch at {}", loss, i);
            }
        }
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let p = dyn2(vec![1.0, 2.0]);
        let t = dyn2(vec![1.0, 2.0, 3.0]);
        assert!(LossKind::Mse.compute(&p, &t).is_err());
    }

    #[test]
    fn test_unknown_names_rejected() {
        assert_eq!("rmse".parse::<LossKind>().unwrap(), LossKind::Rmse);
        assert!("cosine".parse::<LossKind>().is_err());
        assert_eq!("MAE".parse::<MetricKind>().unwrap(), MetricKind::Mae);
        assert!("accuracy".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_mape() {
        let p = dyn2(vec![90.0, 110.0]);
        let t = dyn2(vec![100.0, 100.0]);
        assert!((MetricKind::Mape.compute(&p, &t).unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_align_targets_takes_last_step() {
        let targets = Array3::from_shape_fn((2, 4, 1), |(w, s, _)| (w * 10 + s) as f64).into_dyn();
        let aligned = align_targets(&targets, &[1]).unwrap();
        assert_eq!(aligned.shape(), &[2, 1]);
        assert_eq!(aligned[[0, 0]], 3.0);
        assert_eq!(aligned[[1, 0]], 13.0);

        let same = dyn2(vec![1.0, 2.0]);
        assert_eq!(align_targets(&same, &[1]).unwrap(), same);
        assert!(align_targets(&same, &[3]).is_err());
    }
}
