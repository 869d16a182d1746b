// projeto: seqforecast
// file: src/pipeline/assembler.rs
// Builds a Sequential model from a layer template and compiles it

use log::{debug, info};

use crate::neural::{Activation, CompileOptions, LayerSpec, MetricKind, Sequential, TrainingError};

#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub compile: bool,
    /// Partial compile settings; absent keys fall back to adam / rmse / `metrics`.
    pub compile_config: Option<CompileOptions>,
    /// Replaces the default `[mae]` metric list when the compile settings carry none.
    pub metrics: Option<Vec<MetricKind>>,
    pub verbose: bool,
    /// Per-sample input shape; when given the model is built right away.
    pub input_shape: Option<Vec<usize>>,
    pub seed: Option<u64>,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        AssembleOptions {
            compile: true,
            compile_config: None,
            metrics: None,
            verbose: true,
            input_shape: None,
            seed: None,
        }
    }
}

/// The CNN-LSTM stack used when no template is configured.
pub fn cnn_lstm_template() -> Vec<LayerSpec> {
    vec![
        LayerSpec::time_distributed(LayerSpec::Conv1d {
            filters: 64,
            kernel_size: 1,
            activation: Activation::Relu,
        }),
        LayerSpec::time_distributed(LayerSpec::MaxPooling1d { pool_size: 2 }),
        LayerSpec::time_distributed(LayerSpec::Flatten),
        LayerSpec::lstm(50, Activation::Relu),
        LayerSpec::dense(1, Activation::Linear),
    ]
}

/// Appends every template entry in order to an empty model. Layer compatibility is
/// not checked here; mismatches surface when the model is built.
pub fn assemble(template: &[LayerSpec], options: &AssembleOptions) -> Result<Sequential, TrainingError> {
    let mut model = Sequential::new(options.seed);
    for spec in template {
        model.add(spec.clone())?;
    }
    debug!("🧩 {} camadas adicionadas (seed = {})", model.layer_count(), model.seed());

    if options.compile {
        let partial = options.compile_config.clone().unwrap_or_default();
        let config = partial.resolve(options.metrics.as_deref())?;
        info!(
            "⚙️ Compilando: optimizer = {}, loss = {}, metrics = {:?}",
            config.optimizer,
            config.loss,
            config.metrics.iter().map(|m| m.name()).collect::<Vec<_>>()
        );
        model.compile(config)?;
    }

    if let Some(shape) = &options.input_shape {
        model.build(shape)?;
    }

    if options.verbose {
        println!("{}", model.summary());
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::{LossKind, OptimizerKind};

    fn quiet() -> AssembleOptions {
        AssembleOptions {
            verbose: false,
            seed: Some(5),
            ..AssembleOptions::default()
        }
    }

    #[test]
    fn test_defaults_synthesized() {
        let model = assemble(&cnn_lstm_template(), &quiet()).unwrap();
        let config = model.compile_config().unwrap();
        assert_eq!(config.optimizer, OptimizerKind::adam());
        assert_eq!(config.loss, LossKind::Rmse);
        assert_eq!(config.metrics, vec![MetricKind::Mae]);
        assert_eq!(model.layer_count(), 5);
        assert_eq!(model.specs(), cnn_lstm_template().as_slice());
    }

    #[test]
    fn test_partial_config_and_metrics_argument() {
        let options = AssembleOptions {
            compile_config: Some(CompileOptions {
                loss: Some(LossKind::Mse),
                ..CompileOptions::default()
            }),
            metrics: Some(vec![MetricKind::Rmse]),
            ..quiet()
        };
        let model = assemble(&cnn_lstm_template(), &options).unwrap();
        let config = model.compile_config().unwrap();
        assert_eq!(config.loss, LossKind::Mse);
        assert_eq!(config.optimizer, OptimizerKind::adam());
        assert_eq!(config.metrics, vec![MetricKind::Rmse]);
    }

    #[test]
    fn test_compile_disabled() {
        let options = AssembleOptions { compile: false, ..quiet() };
        let model = assemble(&[LayerSpec::dense(1, Activation::Linear)], &options).unwrap();
        assert!(!model.is_compiled());
    }

    #[test]
    fn test_incompatible_template_fails_at_build() {
        let template = vec![LayerSpec::lstm(4, Activation::Tanh), LayerSpec::lstm(4, Activation::Tanh)];
        // appending never validates
        assert!(assemble(&template, &quiet()).is_ok());
        let options = AssembleOptions { input_shape: Some(vec![3, 2]), ..quiet() };
        assert!(matches!(assemble(&template, &options), Err(TrainingError::Shape(_))));
    }

    #[test]
    fn test_compile_failure_surfaces() {
        let options = AssembleOptions {
            compile_config: Some(CompileOptions {
                optimizer: Some(OptimizerKind::Sgd { learning_rate: 0.0, momentum: 0.0 }),
                ..CompileOptions::default()
            }),
            ..quiet()
        };
        assert!(matches!(
            assemble(&[LayerSpec::dense(1, Activation::Linear)], &options),
            Err(TrainingError::Compile(_))
        ));
    }
}
