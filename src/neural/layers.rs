// projeto: seqforecast
// file: src/neural/layers.rs
// Layer templates and their ndarray implementations (Dense, Conv1D, MaxPooling1D,
// Flatten, LSTM, Dropout, TimeDistributed)

use ndarray::{Array1, Array2, Array3, ArrayD, Axis, Ix2, Ix3, IxDyn, concatenate, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::neural::optim::Optimizer;
use crate::neural::utils::{Activation, TrainingError, glorot_uniform, shape_size, sigmoid_scalar, zeros_bias};

/// Runtime layer. Shapes passed to `build` exclude the batch axis; tensors passed
/// to `forward`/`backward` include it.
pub trait Layer: fmt::Debug {
    fn kind(&self) -> &'static str;

    /// Allocates parameters for a per-sample input shape and returns the per-sample output shape.
    fn build(&mut self, input_shape: &[usize], rng: &mut StdRng) -> Result<Vec<usize>, TrainingError>;

    fn forward(&mut self, input: &ArrayD<f64>, training: bool) -> Result<ArrayD<f64>, TrainingError>;

    /// Consumes dL/d(output) of the last `forward` call, stores parameter gradients and
    /// returns dL/d(input).
    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>, TrainingError>;

    fn apply_gradients(&mut self, _optimizer: &mut Optimizer, _key: &str) {}

    fn param_count(&self) -> usize {
        0
    }

    fn describe(&self) -> String {
        self.kind().to_string()
    }
}

fn default_pool_size() -> usize {
    2
}

fn default_lstm_activation() -> Activation {
    Activation::Tanh
}

/// One entry of a model template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    /// Fully connected layer applied over the last axis.
    Dense {
        units: usize,
        #[serde(default)]
        activation: Activation,
    },
    /// 1-D convolution over (steps, channels), valid padding, stride 1.
    Conv1d {
        filters: usize,
        kernel_size: usize,
        #[serde(default)]
        activation: Activation,
    },
    /// Max pooling over steps with stride equal to the pool size; trailing steps are dropped.
    MaxPooling1d {
        #[serde(default = "default_pool_size")]
        pool_size: usize,
    },
    /// Collapses everything but the batch axis.
    Flatten,
    /// LSTM over (steps, features); emits the last hidden state unless `return_sequences`.
    Lstm {
        units: usize,
        #[serde(default = "default_lstm_activation")]
        activation: Activation,
        #[serde(default)]
        return_sequences: bool,
    },
    /// Inverted dropout, active only while training.
    Dropout { rate: f64 },
    /// Applies the wrapped layer independently to every slice along axis 1.
    TimeDistributed { layer: Box<LayerSpec> },
}

impl LayerSpec {
    pub fn dense(units: usize, activation: Activation) -> Self {
        LayerSpec::Dense { units, activation }
    }

    pub fn lstm(units: usize, activation: Activation) -> Self {
        LayerSpec::Lstm {
            units,
            activation,
            return_sequences: false,
        }
    }

    pub fn time_distributed(layer: LayerSpec) -> Self {
        LayerSpec::TimeDistributed { layer: Box::new(layer) }
    }

    pub fn build_layer(&self) -> Result<Box<dyn Layer>, TrainingError> {
        let layer: Box<dyn Layer> = match self {
            LayerSpec::Dense { units, activation } => {
                require_positive("dense units", *units)?;
                Box::new(Dense::new(*units, *activation))
            }
            LayerSpec::Conv1d { filters, kernel_size, activation } => {
                require_positive("conv1d filters", *filters)?;
                require_positive("conv1d kernel_size", *kernel_size)?;
                Box::new(Conv1d::new(*filters, *kernel_size, *activation))
            }
            LayerSpec::MaxPooling1d { pool_size } => {
                require_positive("max_pooling1d pool_size", *pool_size)?;
                Box::new(MaxPooling1d::new(*pool_size))
            }
            LayerSpec::Flatten => Box::new(Flatten::default()),
            LayerSpec::Lstm { units, activation, return_sequences } => {
                require_positive("lstm units", *units)?;
                Box::new(Lstm::new(*units, *activation, *return_sequences))
            }
            LayerSpec::Dropout { rate } => {
                if !(0.0..1.0).contains(rate) {
                    return Err(TrainingError::Compile(format!(
                        "dropout rate must lie in [0, 1), got {}",
                        rate
                    )));
                }
                Box::new(Dropout::new(*rate))
            }
            LayerSpec::TimeDistributed { layer } => Box::new(TimeDistributed::new(layer.build_layer()?)),
        };
        Ok(layer)
    }
}

fn require_positive(what: &str, value: usize) -> Result<(), TrainingError> {
    if value == 0 {
        return Err(TrainingError::Compile(format!("{} must be positive", what)));
    }
    Ok(())
}

fn expect_rank(layer: &str, shape: &[usize], rank: usize) -> Result<(), TrainingError> {
    if shape.len() != rank {
        return Err(TrainingError::Shape(format!(
            "{} expects a per-sample input of rank {}, got {:?}",
            layer, rank, shape
        )));
    }
    Ok(())
}

/// Views `input` as a (rows, cols) matrix, rows being every leading axis merged.
fn to_matrix(input: &ArrayD<f64>, cols: usize) -> Result<Array2<f64>, TrainingError> {
    let last = input.shape().last().copied().unwrap_or(0);
    if last != cols {
        return Err(TrainingError::Shape(format!(
            "expected last axis of size {}, got shape {:?}",
            cols,
            input.shape()
        )));
    }
    let rows = if cols == 0 { 0 } else { input.len() / cols };
    Ok(input.to_shape((rows, cols))?.into_owned())
}

fn reshape_owned(data: ArrayD<f64>, shape: &[usize]) -> Result<ArrayD<f64>, TrainingError> {
    Ok(data.to_shape(IxDyn(shape))?.into_owned())
}

fn with_last(shape: &[usize], last: usize) -> Vec<usize> {
    let mut out = shape[..shape.len().saturating_sub(1)].to_vec();
    out.push(last);
    out
}

// ------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct Dense {
    units: usize,
    activation: Activation,
    input_dim: usize,
    kernel: Array2<f64>,
    bias: Array1<f64>,
    d_kernel: Array2<f64>,
    d_bias: Array1<f64>,
    input_cache: Option<Array2<f64>>,
    output_cache: Option<Array2<f64>>,
    last_input_shape: Vec<usize>,
}

impl Dense {
    pub fn new(units: usize, activation: Activation) -> Self {
        Dense {
            units,
            activation,
            input_dim: 0,
            kernel: Array2::zeros((0, units)),
            bias: zeros_bias(units),
            d_kernel: Array2::zeros((0, units)),
            d_bias: zeros_bias(units),
            input_cache: None,
            output_cache: None,
            last_input_shape: Vec::new(),
        }
    }
}

impl Layer for Dense {
    fn kind(&self) -> &'static str {
        "dense"
    }

    fn build(&mut self, input_shape: &[usize], rng: &mut StdRng) -> Result<Vec<usize>, TrainingError> {
        let input_dim = *input_shape
            .last()
            .ok_or_else(|| TrainingError::Shape("dense needs at least one input axis".to_string()))?;
        self.input_dim = input_dim;
        self.kernel = glorot_uniform(input_dim, self.units, rng);
        self.bias = zeros_bias(self.units);
        self.d_kernel = Array2::zeros(self.kernel.raw_dim());
        self.d_bias = zeros_bias(self.units);
        Ok(with_last(input_shape, self.units))
    }

    fn forward(&mut self, input: &ArrayD<f64>, _training: bool) -> Result<ArrayD<f64>, TrainingError> {
        let x = to_matrix(input, self.input_dim)?;
        let mut z = x.dot(&self.kernel) + &self.bias;
        self.activation.apply(&mut z);
        let out_shape = with_last(input.shape(), self.units);
        self.last_input_shape = input.shape().to_vec();
        self.input_cache = Some(x);
        self.output_cache = Some(z.clone());
        reshape_owned(z.into_dyn(), &out_shape)
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>, TrainingError> {
        let (x, y) = match (&self.input_cache, &self.output_cache) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(TrainingError::Shape("dense backward called before forward".to_string())),
        };
        let mut g = to_matrix(grad_output, self.units)?;
        if g.dim() != y.dim() {
            return Err(TrainingError::Shape(format!(
                "dense gradient {:?} does not match output {:?}",
                g.dim(),
                y.dim()
            )));
        }
        self.activation.backprop(&mut g, y);
        self.d_kernel = x.t().dot(&g);
        self.d_bias = g.sum_axis(Axis(0));
        let dx = g.dot(&self.kernel.t());
        reshape_owned(dx.into_dyn(), &self.last_input_shape)
    }

    fn apply_gradients(&mut self, optimizer: &mut Optimizer, key: &str) {
        optimizer.update(&format!("{}.kernel", key), &mut self.kernel, &self.d_kernel);
        optimizer.update(&format!("{}.bias", key), &mut self.bias, &self.d_bias);
    }

    fn param_count(&self) -> usize {
        self.kernel.len() + self.bias.len()
    }
}

// ------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct Conv1d {
    filters: usize,
    kernel_size: usize,
    activation: Activation,
    channels: usize,
    kernel: Array2<f64>, // (kernel_size * channels, filters)
    bias: Array1<f64>,
    d_kernel: Array2<f64>,
    d_bias: Array1<f64>,
    cols_cache: Option<Array2<f64>>,
    output_cache: Option<Array2<f64>>,
    last_input_shape: Vec<usize>,
}

impl Conv1d {
    pub fn new(filters: usize, kernel_size: usize, activation: Activation) -> Self {
        Conv1d {
            filters,
            kernel_size,
            activation,
            channels: 0,
            kernel: Array2::zeros((0, filters)),
            bias: zeros_bias(filters),
            d_kernel: Array2::zeros((0, filters)),
            d_bias: zeros_bias(filters),
            cols_cache: None,
            output_cache: None,
            last_input_shape: Vec::new(),
        }
    }
}

impl Layer for Conv1d {
    fn kind(&self) -> &'static str {
        "conv1d"
    }

    fn build(&mut self, input_shape: &[usize], rng: &mut StdRng) -> Result<Vec<usize>, TrainingError> {
        expect_rank("conv1d", input_shape, 2)?;
        let (steps, channels) = (input_shape[0], input_shape[1]);
        if steps < self.kernel_size {
            return Err(TrainingError::Shape(format!(
                "conv1d kernel_size {} is larger than the {} input steps",
                self.kernel_size, steps
            )));
        }
        self.channels = channels;
        self.kernel = glorot_uniform(self.kernel_size * channels, self.filters, rng);
        self.bias = zeros_bias(self.filters);
        self.d_kernel = Array2::zeros(self.kernel.raw_dim());
        self.d_bias = zeros_bias(self.filters);
        Ok(vec![steps - self.kernel_size + 1, self.filters])
    }

    fn forward(&mut self, input: &ArrayD<f64>, _training: bool) -> Result<ArrayD<f64>, TrainingError> {
        let x = input.view().into_dimensionality::<Ix3>()?;
        let (batch, steps, channels) = x.dim();
        if channels != self.channels || steps < self.kernel_size {
            return Err(TrainingError::Shape(format!(
                "conv1d built for {} channels and kernel {}, got input {:?}",
                self.channels,
                self.kernel_size,
                input.shape()
            )));
        }
        let out_len = steps - self.kernel_size + 1;
        let mut cols = Array2::zeros((batch * out_len, self.kernel_size * channels));
        for b in 0..batch {
            for t in 0..out_len {
                for k in 0..self.kernel_size {
                    cols.slice_mut(s![b * out_len + t, k * channels..(k + 1) * channels])
                        .assign(&x.slice(s![b, t + k, ..]));
                }
            }
        }
        let mut z = cols.dot(&self.kernel) + &self.bias;
        self.activation.apply(&mut z);
        self.last_input_shape = input.shape().to_vec();
        self.cols_cache = Some(cols);
        self.output_cache = Some(z.clone());
        reshape_owned(z.into_dyn(), &[batch, out_len, self.filters])
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>, TrainingError> {
        let (cols, y) = match (&self.cols_cache, &self.output_cache) {
            (Some(c), Some(y)) => (c, y),
            _ => return Err(TrainingError::Shape("conv1d backward called before forward".to_string())),
        };
        let mut g = to_matrix(grad_output, self.filters)?;
        if g.dim() != y.dim() {
            return Err(TrainingError::Shape(format!(
                "conv1d gradient {:?} does not match output {:?}",
                g.dim(),
                y.dim()
            )));
        }
        self.activation.backprop(&mut g, y);
        self.d_kernel = cols.t().dot(&g);
        self.d_bias = g.sum_axis(Axis(0));
        let d_cols = g.dot(&self.kernel.t());

        let (batch, steps, channels) = (self.last_input_shape[0], self.last_input_shape[1], self.channels);
        let out_len = steps - self.kernel_size + 1;
        let mut dx = Array3::<f64>::zeros((batch, steps, channels));
        for b in 0..batch {
            for t in 0..out_len {
                for k in 0..self.kernel_size {
                    let mut target = dx.slice_mut(s![b, t + k, ..]);
                    target += &d_cols.slice(s![b * out_len + t, k * channels..(k + 1) * channels]);
                }
            }
        }
        Ok(dx.into_dyn())
    }

    fn apply_gradients(&mut self, optimizer: &mut Optimizer, key: &str) {
        optimizer.update(&format!("{}.kernel", key), &mut self.kernel, &self.d_kernel);
        optimizer.update(&format!("{}.bias", key), &mut self.bias, &self.d_bias);
    }

    fn param_count(&self) -> usize {
        self.kernel.len() + self.bias.len()
    }
}

// ------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct MaxPooling1d {
    pool_size: usize,
    argmax: Option<Array3<usize>>,
    last_input_shape: Vec<usize>,
}

impl MaxPooling1d {
    pub fn new(pool_size: usize) -> Self {
        MaxPooling1d {
            pool_size,
            argmax: None,
            last_input_shape: Vec::new(),
        }
    }
}

impl Layer for MaxPooling1d {
    fn kind(&self) -> &'static str {
        "max_pooling1d"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut StdRng) -> Result<Vec<usize>, TrainingError> {
        expect_rank("max_pooling1d", input_shape, 2)?;
        let out_len = input_shape[0] / self.pool_size;
        if out_len == 0 {
            return Err(TrainingError::Shape(format!(
                "max_pooling1d pool_size {} exceeds the {} input steps",
                self.pool_size, input_shape[0]
            )));
        }
        Ok(vec![out_len, input_shape[1]])
    }

    fn forward(&mut self, input: &ArrayD<f64>, _training: bool) -> Result<ArrayD<f64>, TrainingError> {
        let x = input.view().into_dimensionality::<Ix3>()?;
        let (batch, steps, channels) = x.dim();
        let out_len = steps / self.pool_size;
        let mut out = Array3::<f64>::zeros((batch, out_len, channels));
        let mut argmax = Array3::<usize>::zeros((batch, out_len, channels));
        for b in 0..batch {
            for i in 0..out_len {
                for c in 0..channels {
                    let start = i * self.pool_size;
                    let mut best = start;
                    for t in start + 1..start + self.pool_size {
                        if x[[b, t, c]] > x[[b, best, c]] {
                            best = t;
                        }
                    }
                    out[[b, i, c]] = x[[b, best, c]];
                    argmax[[b, i, c]] = best;
                }
            }
        }
        self.last_input_shape = input.shape().to_vec();
        self.argmax = Some(argmax);
        Ok(out.into_dyn())
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>, TrainingError> {
        let argmax = self
            .argmax
            .as_ref()
            .ok_or_else(|| TrainingError::Shape("max_pooling1d backward called before forward".to_string()))?;
        let g = grad_output.view().into_dimensionality::<Ix3>()?;
        if g.dim() != argmax.dim() {
            return Err(TrainingError::Shape(format!(
                "max_pooling1d gradient {:?} does not match output {:?}",
                g.dim(),
                argmax.dim()
            )));
        }
        let (batch, steps, channels) = (self.last_input_shape[0], self.last_input_shape[1], self.last_input_shape[2]);
        let mut dx = Array3::<f64>::zeros((batch, steps, channels));
        for ((b, i, c), &t) in argmax.indexed_iter() {
            dx[[b, t, c]] += g[[b, i, c]];
        }
        Ok(dx.into_dyn())
    }
}

// ------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Flatten {
    last_input_shape: Vec<usize>,
}

impl Layer for Flatten {
    fn kind(&self) -> &'static str {
        "flatten"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut StdRng) -> Result<Vec<usize>, TrainingError> {
        Ok(vec![shape_size(input_shape)])
    }

    fn forward(&mut self, input: &ArrayD<f64>, _training: bool) -> Result<ArrayD<f64>, TrainingError> {
        let batch = input.shape().first().copied().unwrap_or(0);
        let features = shape_size(&input.shape()[1..]);
        self.last_input_shape = input.shape().to_vec();
        Ok(input.to_shape((batch, features))?.into_owned().into_dyn())
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>, TrainingError> {
        reshape_owned(grad_output.clone(), &self.last_input_shape)
    }
}

// ------------------------------------------------------------------------------------------

#[derive(Debug)]
struct LstmStep {
    x: Array2<f64>,
    h_prev: Array2<f64>,
    c_prev: Array2<f64>,
    i: Array2<f64>,
    f: Array2<f64>,
    g: Array2<f64>,
    o: Array2<f64>,
    c_act: Array2<f64>,
}

/// LSTM with gate layout [input, forget, cell, output] along the 4*units axis.
#[derive(Debug)]
pub struct Lstm {
    units: usize,
    activation: Activation,
    return_sequences: bool,
    features: usize,
    kernel: Array2<f64>,    // (features, 4 * units)
    recurrent: Array2<f64>, // (units, 4 * units)
    bias: Array1<f64>,
    d_kernel: Array2<f64>,
    d_recurrent: Array2<f64>,
    d_bias: Array1<f64>,
    steps: Vec<LstmStep>,
}

impl Lstm {
    pub fn new(units: usize, activation: Activation, return_sequences: bool) -> Self {
        Lstm {
            units,
            activation,
            return_sequences,
            features: 0,
            kernel: Array2::zeros((0, 4 * units)),
            recurrent: Array2::zeros((units, 4 * units)),
            bias: zeros_bias(4 * units),
            d_kernel: Array2::zeros((0, 4 * units)),
            d_recurrent: Array2::zeros((units, 4 * units)),
            d_bias: zeros_bias(4 * units),
            steps: Vec::new(),
        }
    }
}

impl Layer for Lstm {
    fn kind(&self) -> &'static str {
        "lstm"
    }

    fn build(&mut self, input_shape: &[usize], rng: &mut StdRng) -> Result<Vec<usize>, TrainingError> {
        expect_rank("lstm", input_shape, 2)?;
        let (steps, features) = (input_shape[0], input_shape[1]);
        let u = self.units;
        self.features = features;
        self.kernel = glorot_uniform(features, 4 * u, rng);
        self.recurrent = glorot_uniform(u, 4 * u, rng);
        self.bias = zeros_bias(4 * u);
        // unit forget bias
        self.bias.slice_mut(s![u..2 * u]).fill(1.0);
        self.d_kernel = Array2::zeros(self.kernel.raw_dim());
        self.d_recurrent = Array2::zeros(self.recurrent.raw_dim());
        self.d_bias = zeros_bias(4 * u);
        if self.return_sequences {
            Ok(vec![steps, u])
        } else {
            Ok(vec![u])
        }
    }

    fn forward(&mut self, input: &ArrayD<f64>, _training: bool) -> Result<ArrayD<f64>, TrainingError> {
        let x = input.view().into_dimensionality::<Ix3>()?;
        let (batch, steps, features) = x.dim();
        if features != self.features {
            return Err(TrainingError::Shape(format!(
                "lstm built for {} features, got input {:?}",
                self.features,
                input.shape()
            )));
        }
        let u = self.units;
        let mut h = Array2::<f64>::zeros((batch, u));
        let mut c = Array2::<f64>::zeros((batch, u));
        let mut sequence = if self.return_sequences {
            Some(Array3::<f64>::zeros((batch, steps, u)))
        } else {
            None
        };
        self.steps.clear();

        for t in 0..steps {
            let x_t = x.slice(s![.., t, ..]).to_owned();
            let z = x_t.dot(&self.kernel) + h.dot(&self.recurrent) + &self.bias;
            let i = z.slice(s![.., 0..u]).mapv(sigmoid_scalar);
            let f = z.slice(s![.., u..2 * u]).mapv(sigmoid_scalar);
            let mut g = z.slice(s![.., 2 * u..3 * u]).to_owned();
            self.activation.apply(&mut g);
            let o = z.slice(s![.., 3 * u..4 * u]).mapv(sigmoid_scalar);

            let c_new = &f * &c + &i * &g;
            let mut c_act = c_new.clone();
            self.activation.apply(&mut c_act);
            let h_new = &o * &c_act;

            if let Some(seq) = sequence.as_mut() {
                seq.slice_mut(s![.., t, ..]).assign(&h_new);
            }
            self.steps.push(LstmStep {
                x: x_t,
                h_prev: std::mem::replace(&mut h, h_new),
                c_prev: std::mem::replace(&mut c, c_new),
                i,
                f,
                g,
                o,
                c_act,
            });
        }

        match sequence {
            Some(seq) => Ok(seq.into_dyn()),
            None => Ok(h.into_dyn()),
        }
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>, TrainingError> {
        let steps = self.steps.len();
        if steps == 0 {
            return Err(TrainingError::Shape("lstm backward called before forward".to_string()));
        }
        let u = self.units;
        let batch = self.steps[0].x.nrows();
        let expected = if self.return_sequences {
            vec![batch, steps, u]
        } else {
            vec![batch, u]
        };
        if grad_output.shape() != expected.as_slice() {
            return Err(TrainingError::Shape(format!(
                "lstm gradient {:?} does not match output {:?}",
                grad_output.shape(),
                expected
            )));
        }
        let grad_seq = if self.return_sequences {
            Some(grad_output.view().into_dimensionality::<Ix3>()?)
        } else {
            None
        };
        let grad_last = if self.return_sequences {
            None
        } else {
            Some(grad_output.view().into_dimensionality::<Ix2>()?)
        };

        let mut d_kernel = Array2::<f64>::zeros(self.kernel.raw_dim());
        let mut d_recurrent = Array2::<f64>::zeros(self.recurrent.raw_dim());
        let mut d_bias = Array1::<f64>::zeros(4 * u);
        let mut dx = Array3::<f64>::zeros((batch, steps, self.features));
        let mut dh_next = Array2::<f64>::zeros((batch, u));
        let mut dc_next = Array2::<f64>::zeros((batch, u));

        for t in (0..steps).rev() {
            let step = &self.steps[t];
            let mut dh = dh_next.clone();
            if let Some(gs) = &grad_seq {
                dh += &gs.slice(s![.., t, ..]);
            } else if t + 1 == steps {
                if let Some(gl) = &grad_last {
                    dh += gl;
                }
            }

            let d_o = &dh * &step.c_act;
            let mut dc_from_h = &dh * &step.o;
            self.activation.backprop(&mut dc_from_h, &step.c_act);
            let dc = dc_next + dc_from_h;

            let d_i = &dc * &step.g;
            let mut d_g = &dc * &step.i;
            let d_f = &dc * &step.c_prev;
            dc_next = &dc * &step.f;

            let dz_i = d_i * &step.i.mapv(|v| v * (1.0 - v));
            let dz_f = d_f * &step.f.mapv(|v| v * (1.0 - v));
            let dz_o = d_o * &step.o.mapv(|v| v * (1.0 - v));
            self.activation.backprop(&mut d_g, &step.g);

            let dz = concatenate(Axis(1), &[dz_i.view(), dz_f.view(), d_g.view(), dz_o.view()])?;
            d_kernel += &step.x.t().dot(&dz);
            d_recurrent += &step.h_prev.t().dot(&dz);
            d_bias += &dz.sum_axis(Axis(0));
            dx.slice_mut(s![.., t, ..]).assign(&dz.dot(&self.kernel.t()));
            dh_next = dz.dot(&self.recurrent.t());
        }

        self.d_kernel = d_kernel;
        self.d_recurrent = d_recurrent;
        self.d_bias = d_bias;
        Ok(dx.into_dyn())
    }

    fn apply_gradients(&mut self, optimizer: &mut Optimizer, key: &str) {
        optimizer.update(&format!("{}.kernel", key), &mut self.kernel, &self.d_kernel);
        optimizer.update(&format!("{}.recurrent", key), &mut self.recurrent, &self.d_recurrent);
        optimizer.update(&format!("{}.bias", key), &mut self.bias, &self.d_bias);
    }

    fn param_count(&self) -> usize {
        self.kernel.len() + self.recurrent.len() + self.bias.len()
    }
}

// ------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct Dropout {
    rate: f64,
    rng: StdRng,
    mask: Option<ArrayD<f64>>,
}

impl Dropout {
    pub fn new(rate: f64) -> Self {
        Dropout {
            rate,
            rng: StdRng::seed_from_u64(0),
            mask: None,
        }
    }
}

impl Layer for Dropout {
    fn kind(&self) -> &'static str {
        "dropout"
    }

    fn build(&mut self, input_shape: &[usize], rng: &mut StdRng) -> Result<Vec<usize>, TrainingError> {
        self.rng = StdRng::seed_from_u64(rng.random::<u64>());
        Ok(input_shape.to_vec())
    }

    fn forward(&mut self, input: &ArrayD<f64>, training: bool) -> Result<ArrayD<f64>, TrainingError> {
        if !training || self.rate == 0.0 {
            self.mask = None;
            return Ok(input.clone());
        }
        let keep = 1.0 - self.rate;
        let rate = self.rate;
        let rng = &mut self.rng;
        let mask = ArrayD::from_shape_fn(input.raw_dim(), |_| {
            if rng.random::<f64>() >= rate { 1.0 / keep } else { 0.0 }
        });
        let out = input * &mask;
        self.mask = Some(mask);
        Ok(out)
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>, TrainingError> {
        match &self.mask {
            Some(mask) => Ok(grad_output * mask),
            None => Ok(grad_output.clone()),
        }
    }
}

// ------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct TimeDistributed {
    inner: Box<dyn Layer>,
    last_input_shape: Vec<usize>,
    last_output_shape: Vec<usize>,
}

impl TimeDistributed {
    pub fn new(inner: Box<dyn Layer>) -> Self {
        TimeDistributed {
            inner,
            last_input_shape: Vec::new(),
            last_output_shape: Vec::new(),
        }
    }
}

impl Layer for TimeDistributed {
    fn kind(&self) -> &'static str {
        "time_distributed"
    }

    fn build(&mut self, input_shape: &[usize], rng: &mut StdRng) -> Result<Vec<usize>, TrainingError> {
        if input_shape.len() < 2 {
            return Err(TrainingError::Shape(format!(
                "time_distributed expects (steps, ...) per sample, got {:?}",
                input_shape
            )));
        }
        let inner_out = self.inner.build(&input_shape[1..], rng)?;
        let mut out = vec![input_shape[0]];
        out.extend(inner_out);
        Ok(out)
    }

    fn forward(&mut self, input: &ArrayD<f64>, training: bool) -> Result<ArrayD<f64>, TrainingError> {
        let shape = input.shape();
        if shape.len() < 3 {
            return Err(TrainingError::Shape(format!(
                "time_distributed expects (batch, steps, ...), got {:?}",
                shape
            )));
        }
        let (batch, steps) = (shape[0], shape[1]);
        let mut merged_shape = vec![batch * steps];
        merged_shape.extend_from_slice(&shape[2..]);
        let merged = input.to_shape(IxDyn(&merged_shape))?.into_owned();

        let inner_out = self.inner.forward(&merged, training)?;
        let mut out_shape = vec![batch, steps];
        out_shape.extend_from_slice(&inner_out.shape()[1..]);
        self.last_input_shape = shape.to_vec();
        self.last_output_shape = out_shape.clone();
        reshape_owned(inner_out, &out_shape)
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>, TrainingError> {
        if grad_output.shape() != self.last_output_shape.as_slice() {
            return Err(TrainingError::Shape(format!(
                "time_distributed gradient {:?} does not match output {:?}",
                grad_output.shape(),
                self.last_output_shape
            )));
        }
        let (batch, steps) = (self.last_output_shape[0], self.last_output_shape[1]);
        let mut merged_shape = vec![batch * steps];
        merged_shape.extend_from_slice(&self.last_output_shape[2..]);
        let merged = grad_output.to_shape(IxDyn(&merged_shape))?.into_owned();
        let dx = self.inner.backward(&merged)?;
        reshape_owned(dx, &self.last_input_shape)
    }

    fn apply_gradients(&mut self, optimizer: &mut Optimizer, key: &str) {
        self.inner.apply_gradients(optimizer, key);
    }

    fn param_count(&self) -> usize {
        self.inner.param_count()
    }

    fn describe(&self) -> String {
        format!("time_distributed({})", self.inner.describe())
    }
}
