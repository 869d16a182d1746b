// projeto: seqforecast
// file: src/neural/optim.rs
// Optimizers keyed by parameter name

use ndarray::{Array, ArrayD, Dimension, Zip};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::neural::utils::TrainingError;

fn default_learning_rate() -> f64 {
    0.001
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_epsilon() -> f64 {
    1e-7
}

fn default_sgd_learning_rate() -> f64 {
    0.01
}

fn default_rho() -> f64 {
    0.9
}

/// Optimizer choice as it appears in a compile configuration.
///
/// * `adam` - adaptive moments, the default for sequence models.
/// * `sgd` - plain or momentum gradient descent.
/// * `rms_prop` - per-parameter scaling by a running mean of squared gradients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam {
        #[serde(default = "default_learning_rate")]
        learning_rate: f64,
        #[serde(default = "default_beta1")]
        beta1: f64,
        #[serde(default = "default_beta2")]
        beta2: f64,
        #[serde(default = "default_epsilon")]
        epsilon: f64,
    },
    Sgd {
        #[serde(default = "default_sgd_learning_rate")]
        learning_rate: f64,
        #[serde(default)]
        momentum: f64,
    },
    RmsProp {
        #[serde(default = "default_learning_rate")]
        learning_rate: f64,
        #[serde(default = "default_rho")]
        rho: f64,
        #[serde(default = "default_epsilon")]
        epsilon: f64,
    },
}

impl OptimizerKind {
    pub fn adam() -> Self {
        OptimizerKind::Adam {
            learning_rate: default_learning_rate(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
        }
    }

    pub fn sgd() -> Self {
        OptimizerKind::Sgd {
            learning_rate: default_sgd_learning_rate(),
            momentum: 0.0,
        }
    }

    pub fn rms_prop() -> Self {
        OptimizerKind::RmsProp {
            learning_rate: default_learning_rate(),
            rho: default_rho(),
            epsilon: default_epsilon(),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            OptimizerKind::Adam { learning_rate, .. }
            | OptimizerKind::Sgd { learning_rate, .. }
            | OptimizerKind::RmsProp { learning_rate, .. } => *learning_rate,
        }
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let lr = self.learning_rate();
        if !(lr.is_finite() && lr > 0.0) {
            return Err(TrainingError::Compile(format!(
                "learning rate must be positive, got {}",
                lr
            )));
        }
        match self {
            OptimizerKind::Adam { beta1, beta2, .. } => {
                if !(0.0..1.0).contains(beta1) || !(0.0..1.0).contains(beta2) {
                    return Err(TrainingError::Compile(
                        "adam betas must lie in [0, 1)".to_string(),
                    ));
                }
            }
            OptimizerKind::Sgd { momentum, .. } => {
                if !(0.0..1.0).contains(momentum) {
                    return Err(TrainingError::Compile(
                        "sgd momentum must lie in [0, 1)".to_string(),
                    ));
                }
            }
            OptimizerKind::RmsProp { rho, .. } => {
                if !(0.0..1.0).contains(rho) {
                    return Err(TrainingError::Compile(
                        "rms_prop rho must lie in [0, 1)".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Adam { learning_rate, .. } => write!(f, "adam(lr={})", learning_rate),
            OptimizerKind::Sgd { learning_rate, momentum } => {
                write!(f, "sgd(lr={}, momentum={})", learning_rate, momentum)
            }
            OptimizerKind::RmsProp { learning_rate, .. } => {
                write!(f, "rms_prop(lr={})", learning_rate)
            }
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::adam()),
            "sgd" => Ok(OptimizerKind::sgd()),
            "rmsprop" | "rms_prop" => Ok(OptimizerKind::rms_prop()),
            other => Err(TrainingError::Compile(format!("unknown optimizer '{}'", other))),
        }
    }
}

/// Stateful optimizer. Moment buffers are created lazily per parameter key.
#[derive(Debug, Clone)]
pub struct Optimizer {
    kind: OptimizerKind,
    t: usize,
    first: HashMap<String, ArrayD<f64>>,
    second: HashMap<String, ArrayD<f64>>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind) -> Self {
        Optimizer {
            kind,
            t: 0,
            first: HashMap::new(),
            second: HashMap::new(),
        }
    }

    pub fn iterations(&self) -> usize {
        self.t
    }

    /// Advances the step counter. Called once per mini-batch, before the updates.
    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    pub fn update<D: Dimension>(&mut self, key: &str, param: &mut Array<f64, D>, grad: &Array<f64, D>) {
        let grad = grad.view().into_dyn();
        let param = param.view_mut().into_dyn();
        let step = self.t.max(1) as i32;

        match self.kind {
            OptimizerKind::Adam { learning_rate, beta1, beta2, epsilon } => {
                let m = self
                    .first
                    .entry(key.to_string())
                    .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
                let v = self
                    .second
                    .entry(key.to_string())
                    .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
                let bias1 = 1.0 - beta1.powi(step);
                let bias2 = 1.0 - beta2.powi(step);

                Zip::from(param).and(&grad).and(m).and(v).for_each(|p, &g, m, v| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / bias1;
                    let v_hat = *v / bias2;
                    *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
                });
            }
            OptimizerKind::Sgd { learning_rate, momentum } => {
                if momentum == 0.0 {
                    Zip::from(param).and(&grad).for_each(|p, &g| *p -= learning_rate * g);
                } else {
                    let velocity = self
                        .first
                        .entry(key.to_string())
                        .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
                    Zip::from(param).and(&grad).and(velocity).for_each(|p, &g, vel| {
                        *vel = momentum * *vel - learning_rate * g;
                        *p += *vel;
                    });
                }
            }
            OptimizerKind::RmsProp { learning_rate, rho, epsilon } => {
                let avg = self
                    .second
                    .entry(key.to_string())
                    .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
                Zip::from(param).and(&grad).and(avg).for_each(|p, &g, a| {
                    *a = rho * *a + (1.0 - rho) * g * g;
                    *p -= learning_rate * g / (a.sqrt() + epsilon);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_adam_moves_against_gradient() {
        let mut optimizer = Optimizer::new(OptimizerKind::adam());
        let mut param = array![1.0, -1.0];
        let grad = array![0.5, -0.5];
        optimizer.begin_step();
        optimizer.update("w", &mut param, &grad);
        // First Adam step is lr * sign(g) up to epsilon.
        assert!((param[0] - (1.0 - 0.001)).abs() < 1e-6);
        assert!((param[1] - (-1.0 + 0.001)).abs() < 1e-6);
        assert_eq!(optimizer.iterations(), 1);
    }

    #[test]
    fn test_sgd_plain_step() {
        let mut optimizer = Optimizer::new(OptimizerKind::Sgd { learning_rate: 0.1, momentum: 0.0 });
        let mut param = array![[1.0, 2.0]];
        optimizer.begin_step();
        optimizer.update("w", &mut param, &array![[1.0, -1.0]]);
        assert!((param[[0, 0]] - 0.9).abs() < 1e-12);
        assert!((param[[0, 1]] - 2.1).abs() < 1e-12);
    }

    #[test]
    fn test_sgd_momentum_accumulates() {
        let mut optimizer = Optimizer::new(OptimizerKind::Sgd { learning_rate: 0.1, momentum: 0.5 });
        let mut param = array![0.0];
        for _ in 0..2 {
            optimizer.begin_step();
            optimizer.update("w", &mut param, &array![1.0]);
        }
        // v1 = -0.1, v2 = -0.05 - 0.1
        assert!((param[0] - (-0.25)).abs() < 1e-12);
    }

    #[test]
    fn test_rmsprop_reduces_param() {
        let mut optimizer = Optimizer::new(OptimizerKind::rms_prop());
        let mut param = array![1.0];
        optimizer.begin_step();
        optimizer.update("w", &mut param, &array![2.0]);
        assert!(param[0] < 1.0);
    }

    #[test]
    fn test_optimizer_from_str() {
        assert_eq!("adam".parse::<OptimizerKind>().unwrap(), OptimizerKind::adam());
        assert_eq!("RMSprop".parse::<OptimizerKind>().unwrap(), OptimizerKind::rms_prop());
        assert!("adagrad".parse::<OptimizerKind>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_rate() {
        let kind = OptimizerKind::Sgd { learning_rate: 0.0, momentum: 0.0 };
        assert!(kind.validate().is_err());
        assert!(OptimizerKind::adam().validate().is_ok());
    }
}
