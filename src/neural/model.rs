// projeto: seqforecast
// file: src/neural/model.rs
// Sequential model: layer stack, compile state, fit / evaluate / predict

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use ndarray::{ArrayD, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::time::Instant;

use crate::neural::compile::CompileConfig;
use crate::neural::history::{EpochRecord, History};
use crate::neural::layers::{Layer, LayerSpec};
use crate::neural::losses::align_targets;
use crate::neural::optim::Optimizer;
use crate::neural::utils::{TrainingError, format_shape, validate_finite};

/// Options for a single `Sequential::fit` call.
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub shuffle: bool,
    pub verbose: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            epochs: 10,
            batch_size: 32,
            shuffle: true,
            verbose: true,
        }
    }
}

pub struct Sequential {
    name: String,
    specs: Vec<LayerSpec>,
    layers: Vec<Box<dyn Layer>>,
    input_shape: Option<Vec<usize>>,
    layer_shapes: Vec<Vec<usize>>,
    compile: Option<CompileConfig>,
    optimizer: Option<Optimizer>,
    rng: StdRng,
    seed: u64,
}

impl std::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequential")
            .field("name", &self.name)
            .field("layers", &self.specs.len())
            .field("input_shape", &self.input_shape)
            .field("compiled", &self.compile.is_some())
            .field("seed", &self.seed)
            .finish()
    }
}

impl Sequential {
    /// Empty model. Without a seed one is drawn at random; the seed drives
    /// weight init, dropout masks and batch shuffling.
    pub fn new(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random::<u64>);
        Sequential {
            name: "sequential".to_string(),
            specs: Vec::new(),
            layers: Vec::new(),
            input_shape: None,
            layer_shapes: Vec::new(),
            compile: None,
            optimizer: None,
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn add(&mut self, spec: LayerSpec) -> Result<(), TrainingError> {
        if self.is_built() {
            return Err(TrainingError::Compile(
                "cannot add layers to a model that is already built".to_string(),
            ));
        }
        let layer = spec.build_layer()?;
        self.specs.push(spec);
        self.layers.push(layer);
        Ok(())
    }

    pub fn specs(&self) -> &[LayerSpec] {
        &self.specs
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn compile(&mut self, config: CompileConfig) -> Result<(), TrainingError> {
        config.validate()?;
        debug!(
            "⚙️ Compilando modelo: optimizer={}, loss={}, metrics={:?}",
            config.optimizer, config.loss, config.metrics
        );
        self.optimizer = Some(Optimizer::new(config.optimizer.clone()));
        self.compile = Some(config);
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    pub fn compile_config(&self) -> Option<&CompileConfig> {
        self.compile.as_ref()
    }

    pub fn is_built(&self) -> bool {
        self.input_shape.is_some()
    }

    pub fn input_shape(&self) -> Option<&[usize]> {
        self.input_shape.as_deref()
    }

    pub fn output_shape(&self) -> Option<&[usize]> {
        if self.is_built() {
            self.layer_shapes.last().map(|s| s.as_slice())
        } else {
            None
        }
    }

    /// Allocates every layer for a per-sample input shape. Rebuilding with the
    /// same shape is a no-op; a different shape is an error.
    pub fn build(&mut self, input_shape: &[usize]) -> Result<(), TrainingError> {
        if let Some(existing) = &self.input_shape {
            if existing.as_slice() == input_shape {
                return Ok(());
            }
            return Err(TrainingError::Shape(format!(
                "model was built for input {} but received {}",
                format_shape(existing),
                format_shape(input_shape)
            )));
        }
        if self.layers.is_empty() {
            return Err(TrainingError::Compile("model has no layers".to_string()));
        }

        let mut shape = input_shape.to_vec();
        let mut shapes = Vec::with_capacity(self.layers.len());
        for (idx, layer) in self.layers.iter_mut().enumerate() {
            shape = layer.build(&shape, &mut self.rng).map_err(|e| {
                TrainingError::Shape(format!("layer {} ({}): {}", idx, layer.describe(), e))
            })?;
            shapes.push(shape.clone());
        }
        self.layer_shapes = shapes;
        self.input_shape = Some(input_shape.to_vec());
        debug!("🧱 Modelo construído: entrada {} -> saída {}", format_shape(input_shape), format_shape(&shape));
        Ok(())
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(|l| l.param_count()).sum()
    }

    /// Layer table in the usual "Layer (type) / Output Shape / Param #" layout.
    pub fn summary(&self) -> String {
        let rule = "_".repeat(72);
        let double = "=".repeat(72);
        let mut out = String::new();
        out.push_str(&format!("Model: \"{}\"\n{}\n", self.name, rule));
        out.push_str(&format!(" {:<32}{:<26}{:>12}\n{}\n", "Layer (type)", "Output Shape", "Param #", double));
        for (idx, layer) in self.layers.iter().enumerate() {
            let shape = self
                .layer_shapes
                .get(idx)
                .map(|s| format_shape(s))
                .unwrap_or_else(|| "(unbuilt)".to_string());
            out.push_str(&format!(
                " {:<32}{:<26}{:>12}\n",
                layer.describe(),
                shape,
                thousands(layer.param_count())
            ));
        }
        out.push_str(&format!("{}\nTotal params: {}\n{}\n", double, thousands(self.param_count()), rule));
        out
    }

    fn forward_all(&mut self, input: &ArrayD<f64>, training: bool) -> Result<ArrayD<f64>, TrainingError> {
        let mut out = input.clone();
        for layer in self.layers.iter_mut() {
            out = layer.forward(&out, training)?;
        }
        Ok(out)
    }

    fn check_input(&self, x: &ArrayD<f64>) -> Result<(), TrainingError> {
        let expected = self
            .input_shape
            .as_ref()
            .ok_or_else(|| TrainingError::Shape("model has not been built".to_string()))?;
        if x.ndim() == 0 || &x.shape()[1..] != expected.as_slice() {
            return Err(TrainingError::Shape(format!(
                "expected input {} but received {:?}",
                format_shape(expected),
                x.shape()
            )));
        }
        Ok(())
    }

    pub fn predict(&mut self, x: &ArrayD<f64>) -> Result<ArrayD<f64>, TrainingError> {
        self.check_input(x)?;
        self.forward_all(x, false)
    }

    /// Loss and metrics on a dataset, without updating weights.
    pub fn evaluate(
        &mut self,
        x: &ArrayD<f64>,
        y: &ArrayD<f64>,
    ) -> Result<(f64, BTreeMap<String, f64>), TrainingError> {
        let config = self.compile.clone().ok_or(TrainingError::NotCompiled("evaluate"))?;
        let predictions = self.predict(x)?;
        let targets = align_targets(y, &predictions.shape()[1..])?;
        let loss = config.loss.compute(&predictions, &targets)?;
        let mut metrics = BTreeMap::new();
        for metric in &config.metrics {
            metrics.insert(metric.name().to_string(), metric.compute(&predictions, &targets)?);
        }
        Ok((loss, metrics))
    }

    /// One optimisation step on a mini-batch. Returns the batch loss and metric values.
    fn train_batch(
        &mut self,
        config: &CompileConfig,
        x: &ArrayD<f64>,
        y: &ArrayD<f64>,
    ) -> Result<(f64, Vec<f64>), TrainingError> {
        let predictions = self.forward_all(x, true)?;
        let loss = config.loss.compute(&predictions, y)?;
        let metrics = config
            .metrics
            .iter()
            .map(|m| m.compute(&predictions, y))
            .collect::<Result<Vec<_>, _>>()?;

        let mut grad = config.loss.gradient(&predictions, y)?;
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }

        let optimizer = self.optimizer.as_mut().ok_or(TrainingError::NotCompiled("fit"))?;
        optimizer.begin_step();
        for (idx, layer) in self.layers.iter_mut().enumerate() {
            layer.apply_gradients(optimizer, &idx.to_string());
        }
        Ok((loss, metrics))
    }

    /// Trains for `config.epochs` epochs. Targets carrying a window axis are reduced
    /// to the last step of each window before training.
    pub fn fit(
        &mut self,
        x: &ArrayD<f64>,
        y: &ArrayD<f64>,
        validation: Option<(&ArrayD<f64>, &ArrayD<f64>)>,
        config: &FitConfig,
    ) -> Result<History, TrainingError> {
        let compile = self.compile.clone().ok_or(TrainingError::NotCompiled("fit"))?;
        if x.ndim() < 2 {
            return Err(TrainingError::Shape(format!("training input must be batched, got {:?}", x.shape())));
        }
        let samples = x.shape()[0];
        if samples == 0 {
            return Err(TrainingError::DataProcessing("no training samples".to_string()));
        }
        if y.ndim() == 0 || y.shape()[0] != samples {
            return Err(TrainingError::Shape(format!(
                "{} input samples but targets of shape {:?}",
                samples,
                y.shape()
            )));
        }
        validate_finite(x, "training input")?;
        validate_finite(y, "training targets")?;

        self.build(&x.shape()[1..])?;
        let output_shape = self.output_shape().map(|s| s.to_vec()).unwrap_or_default();
        let targets = align_targets(y, &output_shape)?;
        let validation = match validation {
            Some((vx, vy)) => {
                validate_finite(vx, "validation input")?;
                validate_finite(vy, "validation targets")?;
                Some((vx, align_targets(vy, &output_shape)?))
            }
            None => None,
        };

        let batch_size = config.batch_size.max(1);
        let batches = samples.div_ceil(batch_size);
        let mut history = History::new(compile.loss.name());
        let mut indices: Vec<usize> = (0..samples).collect();

        info!(
            "🎓 Treinando {} amostras {} por {} épocas (batch = {})",
            samples,
            format_shape(&x.shape()[1..]),
            config.epochs,
            batch_size
        );

        for epoch in 1..=config.epochs {
            let epoch_start = Instant::now();
            if config.shuffle {
                indices.shuffle(&mut self.rng);
            }

            let progress = if config.verbose {
                let bar = ProgressBar::new(batches as u64);
                let style = ProgressStyle::default_bar()
                    .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-");
                bar.set_style(style);
                bar.set_message(format!("Época {}/{}", epoch, config.epochs));
                Some(bar)
            } else {
                None
            };

            let mut loss_sum = 0.0;
            let mut metric_sums = vec![0.0; compile.metrics.len()];
            for chunk in indices.chunks(batch_size) {
                let xb = x.select(Axis(0), chunk);
                let yb = targets.select(Axis(0), chunk);
                let (loss, metrics) = self.train_batch(&compile, &xb, &yb)?;
                let weight = chunk.len() as f64;
                loss_sum += loss * weight;
                for (sum, value) in metric_sums.iter_mut().zip(metrics) {
                    *sum += value * weight;
                }
                if let Some(bar) = &progress {
                    bar.inc(1);
                }
            }
            if let Some(bar) = progress {
                bar.finish_and_clear();
            }

            let mut record = EpochRecord::new(epoch, loss_sum / samples as f64);
            if !record.loss.is_finite() {
                return Err(TrainingError::DataProcessing(format!(
                    "loss diverged to {} at epoch {}",
                    record.loss, epoch
                )));
            }
            for (metric, sum) in compile.metrics.iter().zip(metric_sums) {
                record.metrics.insert(metric.name().to_string(), sum / samples as f64);
            }
            if let Some((vx, vy)) = &validation {
                let (val_loss, val_metrics) = self.evaluate(vx, vy)?;
                record.val_loss = Some(val_loss);
                record.val_metrics = val_metrics;
            }
            record.elapsed_secs = epoch_start.elapsed().as_secs_f64();

            let line = format_epoch_line(&record, config.epochs);
            if config.verbose {
                info!("{}", line);
            } else {
                debug!("{}", line);
            }
            history.push(record);
        }

        Ok(history)
    }
}

fn format_epoch_line(record: &EpochRecord, epochs: usize) -> String {
    let mut line = format!("📈 Época {}/{}: loss={:.6}", record.epoch, epochs, record.loss);
    for (name, value) in &record.metrics {
        line.push_str(&format!(" | {}={:.6}", name, value));
    }
    if let Some(val) = record.val_loss {
        line.push_str(&format!(" | val_loss={:.6}", val));
    }
    for (name, value) in &record.val_metrics {
        line.push_str(&format!(" | val_{}={:.6}", name, value));
    }
    line.push_str(&format!(" | {:.1}s", record.elapsed_secs));
    line
}

fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::losses::{LossKind, MetricKind};
    use crate::neural::optim::OptimizerKind;
    use crate::neural::utils::Activation;
    use ndarray::{Array2, Array4};

    fn quiet() -> FitConfig {
        FitConfig {
            epochs: 40,
            batch_size: 8,
            shuffle: true,
            verbose: false,
        }
    }

    fn linear_model() -> Sequential {
        let mut model = Sequential::new(Some(3));
        model.add(LayerSpec::dense(1, Activation::Linear)).unwrap();
        model
            .compile(CompileConfig {
                optimizer: OptimizerKind::Adam { learning_rate: 0.05, beta1: 0.9, beta2: 0.999, epsilon: 1e-7 },
                loss: LossKind::Mse,
                metrics: vec![MetricKind::Mae],
            })
            .unwrap();
        model
    }

    fn linear_data(n: usize) -> (ArrayD<f64>, ArrayD<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i * 7 + j * 3) % 11) as f64 / 10.0 - 0.5);
        let y = Array2::from_shape_fn((n, 1), |(i, _)| 2.0 * x[[i, 0]] - x[[i, 1]] + 0.3);
        (x.into_dyn(), y.into_dyn())
    }

    #[test]
    fn test_fit_reduces_loss() {
        let mut model = linear_model();
        let (x, y) = linear_data(32);
        let history = model.fit(&x, &y, Some((&x, &y)), &quiet()).unwrap();
        let losses = history.losses();
        assert_eq!(losses.len(), 40);
        assert!(losses[39] < losses[0] * 0.5, "{:?}", losses);
        assert_eq!(history.val_losses().unwrap().len(), 40);
        assert!(history.series("mae").is_some());
    }

    #[test]
    fn test_fit_requires_compile() {
        let mut model = Sequential::new(Some(1));
        model.add(LayerSpec::dense(1, Activation::Linear)).unwrap();
        let (x, y) = linear_data(4);
        let err = model.fit(&x, &y, None, &quiet()).unwrap_err();
        assert!(matches!(err, TrainingError::NotCompiled("fit")));
    }

    #[test]
    fn test_build_is_idempotent_and_rejects_new_shape() {
        let mut model = linear_model();
        model.build(&[2]).unwrap();
        model.build(&[2]).unwrap();
        assert!(model.build(&[3]).is_err());
        assert!(model.add(LayerSpec::Flatten).is_err());
        assert_eq!(model.output_shape().unwrap(), &[1]);
    }

    #[test]
    fn test_cnn_lstm_predict_shape_and_summary() {
        let mut model = Sequential::new(Some(11));
        for spec in [
            LayerSpec::time_distributed(LayerSpec::Conv1d { filters: 8, kernel_size: 1, activation: Activation::Relu }),
            LayerSpec::time_distributed(LayerSpec::MaxPooling1d { pool_size: 2 }),
            LayerSpec::time_distributed(LayerSpec::Flatten),
            LayerSpec::lstm(5, Activation::Relu),
            LayerSpec::dense(1, Activation::Linear),
        ] {
            model.add(spec).unwrap();
        }
        model.build(&[2, 2, 3]).unwrap();
        let x = Array4::from_elem((3, 2, 2, 3), 0.5).into_dyn();
        let y = model.predict(&x).unwrap();
        assert_eq!(y.shape(), &[3, 1]);

        let summary = model.summary();
        assert!(summary.contains("time_distributed(conv1d)"));
        assert!(summary.contains("(None, 2, 8)"));
        assert!(summary.contains(&format!("Total params: {}", thousands(model.param_count()))));
    }

    #[test]
    fn test_fit_with_window_targets() {
        let mut model = linear_model();
        let x = Array2::from_shape_fn((6, 2), |(i, j)| (i + j) as f64 / 10.0).into_dyn();
        let y = ndarray::Array3::from_shape_fn((6, 3, 1), |(i, s, _)| (i + s) as f64 / 10.0).into_dyn();
        let history = model
            .fit(&x, &y, None, &FitConfig { epochs: 2, batch_size: 4, shuffle: false, verbose: false })
            .unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_predict_rejects_wrong_shape() {
        let mut model = linear_model();
        model.build(&[2]).unwrap();
        let x = Array2::<f64>::zeros((2, 3)).into_dyn();
        assert!(model.predict(&x).is_err());
    }

    #[test]
    fn test_thousands() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(23307), "23,307");
        assert_eq!(thousands(1234567), "1,234,567");
    }
}
