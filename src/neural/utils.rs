// projeto: seqforecast
// file: src/neural/utils.rs
// Error handling, activations and weight initialisation shared by the layers

use ndarray::{Array, Array1, Array2, ArrayD, Dimension, ShapeError};
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data processing error: {0}")]
    DataProcessing(String),

    #[error("Split table '{0}' was not loaded")]
    MissingSplit(&'static str),

    #[error("Marker '{marker}' matches more than one file: {first} and {second}")]
    AmbiguousSplit {
        marker: &'static str,
        first: String,
        second: String,
    },

    #[error("No model detected, assemble one before fitting")]
    NoModel,

    #[error("Model must be compiled before {0}")]
    NotCompiled(&'static str),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Cannot reshape windows of length {sequence_length} into n_seq={n_seq} x n_steps={n_steps}")]
    ReshapeMismatch {
        sequence_length: usize,
        n_seq: usize,
        n_steps: usize,
    },

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Chart error: {0}")]
    Chart(String),
}

impl From<ShapeError> for TrainingError {
    fn from(err: ShapeError) -> Self {
        TrainingError::Shape(err.to_string())
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(err: toml::de::Error) -> Self {
        TrainingError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for TrainingError {
    fn from(err: toml::ser::Error) -> Self {
        TrainingError::Config(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply<D: Dimension>(self, x: &mut Array<f64, D>) {
        match self {
            Activation::Linear => {}
            Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
            Activation::Tanh => x.mapv_inplace(f64::tanh),
            Activation::Sigmoid => x.mapv_inplace(sigmoid_scalar),
        }
    }

    /// Derivative expressed through the activated output `y = f(z)`.
    pub fn derivative_from_output(self, y: f64) -> f64 {
        match self {
            Activation::Linear => 1.0,
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Tanh => 1.0 - y * y,
            Activation::Sigmoid => y * (1.0 - y),
        }
    }

    /// Multiplies `grad` in place by f'(z), given the activated output.
    pub fn backprop<D: Dimension>(self, grad: &mut Array<f64, D>, output: &Array<f64, D>) {
        if self == Activation::Linear {
            return;
        }
        grad.zip_mut_with(output, |g, &y| *g *= self.derivative_from_output(y));
    }
}

pub fn sigmoid_scalar(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Glorot-uniform kernel of shape (fan_in, fan_out).
pub fn glorot_uniform(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Array2<f64> {
    let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
    Array2::from_shape_fn((fan_in, fan_out), |_| rng.random_range(-limit..limit))
}

pub fn zeros_bias(size: usize) -> Array1<f64> {
    Array1::zeros(size)
}

/// Product of a per-sample shape, i.e. the number of features it flattens to.
pub fn shape_size(shape: &[usize]) -> usize {
    shape.iter().product()
}

pub fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("(None, {})", dims.join(", "))
}

pub fn validate_finite(data: &ArrayD<f64>, name: &str) -> Result<(), TrainingError> {
    if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
        return Err(TrainingError::DataProcessing(format!(
            "{} contains a non-finite value at flat position {}",
            name, pos
        )));
    }
    Ok(())
}
