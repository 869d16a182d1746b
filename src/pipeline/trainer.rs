// projeto: seqforecast
// file: src/pipeline/trainer.rs
// Training session: owns the windowed data and the model, runs fit and renders the loss chart

use log::{error, info, warn};
use plotters::prelude::*;
use std::path::{Path, PathBuf};

use crate::neural::{FitConfig, History, LayerSpec, Sequential, TrainingError};
use crate::pipeline::assembler::{AssembleOptions, assemble};
use crate::pipeline::chart::{AxisProperties, PlotSeries, chart_err, draw_line_chart};
use crate::pipeline::windower::{WindowedSplits, reshape_windows};

#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    pub n_seq: usize,
    pub n_steps: usize,
    pub batch_size: usize,
    pub render_chart: bool,
    /// When set, `fit` returns the per-epoch validation losses.
    pub return_history: bool,
    pub verbose: bool,
    pub shuffle: bool,
    pub chart_path: PathBuf,
    /// Also chart the first compiled metric (train vs validation) to this file.
    pub metric_chart_path: Option<PathBuf>,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            epochs: 10,
            n_seq: 2,
            n_steps: 2,
            batch_size: 32,
            render_chart: true,
            return_history: false,
            verbose: true,
            shuffle: true,
            chart_path: PathBuf::from("loss_by_epoch.svg"),
            metric_chart_path: None,
        }
    }
}

/// One dataset, at most one model.
#[derive(Debug)]
pub struct TrainingSession {
    data: WindowedSplits,
    model: Option<Sequential>,
    last_history: Option<History>,
}

impl TrainingSession {
    pub fn new(data: WindowedSplits) -> Self {
        TrainingSession {
            data,
            model: None,
            last_history: None,
        }
    }

    pub fn model(&self) -> Option<&Sequential> {
        self.model.as_ref()
    }

    /// Uses a model built outside the assembler.
    pub fn set_model(&mut self, model: Sequential) {
        self.model = Some(model);
    }

    /// Assembles `template` and stores it as the session model, replacing any previous one.
    pub fn assemble(&mut self, template: &[LayerSpec], options: &AssembleOptions) -> Result<(), TrainingError> {
        let model = assemble(template, options)?;
        self.model = Some(model);
        Ok(())
    }

    pub fn last_history(&self) -> Option<&History> {
        self.last_history.as_ref()
    }

    /// Reshapes the windows to (n_seq, n_steps), fits once with the test split as
    /// validation data and optionally charts the loss curves.
    pub fn fit(&mut self, options: &FitOptions) -> Result<Option<Vec<f64>>, TrainingError> {
        let Some(model) = self.model.as_mut() else {
            error!("❌ Nenhum modelo detectado; monte um modelo antes de treinar");
            return Err(TrainingError::NoModel);
        };

        let x_train = reshape_windows(&self.data.x_train, options.n_seq, options.n_steps)?.into_dyn();
        let x_test = reshape_windows(&self.data.x_test, options.n_seq, options.n_steps)?.into_dyn();
        let y_train = self.data.y_train.clone().into_dyn();
        let y_test = self.data.y_test.clone().into_dyn();

        let validation = if x_test.shape()[0] == 0 {
            warn!("⚠️ Split de teste sem janelas; treinando sem validação");
            None
        } else {
            Some((&x_test, &y_test))
        };

        let config = FitConfig {
            epochs: options.epochs,
            batch_size: options.batch_size,
            shuffle: options.shuffle,
            verbose: options.verbose,
        };
        let history = model.fit(&x_train, &y_train, validation, &config)?;
        if options.verbose {
            history.print_summary();
        }

        if options.render_chart {
            render_loss_chart(&history, &options.chart_path)?;
            if let Some(path) = &options.metric_chart_path {
                match model.compile_config().and_then(|c| c.metrics.first()) {
                    Some(metric) => render_metric_chart(&history, metric.name(), path)?,
                    None => warn!("⚠️ Modelo sem métricas; gráfico de métrica ignorado"),
                }
            }
        }

        let result = if options.return_history {
            Some(history.val_losses().unwrap_or_default())
        } else {
            None
        };
        self.last_history = Some(history);
        Ok(result)
    }
}

/// Writes the loss / val_loss curves of `history` to an SVG file.
pub fn render_loss_chart(history: &History, path: &Path) -> Result<(), TrainingError> {
    render_history_chart(history, "loss", AxisProperties::loss_by_epoch, path)
}

/// Writes `<metric>` / `val_<metric>` curves of `history` to an SVG file.
pub fn render_metric_chart(history: &History, metric: &str, path: &Path) -> Result<(), TrainingError> {
    render_history_chart(history, metric, |values| AxisProperties::metric_by_epoch(metric, values), path)
}

fn render_history_chart<F>(history: &History, key: &str, decorate: F, path: &Path) -> Result<(), TrainingError>
where
    F: Fn(&[f64]) -> AxisProperties,
{
    let train = history
        .series(key)
        .ok_or_else(|| TrainingError::Chart(format!("history has no '{}' series", key)))?;
    let val_key = format!("val_{}", key);
    let mut series = vec![PlotSeries::new(key, train)];
    let props = match history.series(&val_key) {
        Some(values) => {
            let props = decorate(&values);
            series.push(PlotSeries::new(&val_key, values));
            props
        }
        None => AxisProperties {
            label_series: None,
            ..decorate(&[])
        },
    };

    let root = SVGBackend::new(path, (1000, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;
    draw_line_chart(&root, &props, &series)?;
    root.present().map_err(chart_err)?;
    info!("🖼️ Gráfico '{}' salvo em: {}", key, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::{Activation, CompileConfig, CompileOptions, LossKind};
    use ndarray::Array3;
    use tempfile::tempdir;

    fn windows(count: usize, length: usize) -> WindowedSplits {
        let x = Array3::from_shape_fn((count, length, 2), |(i, t, f)| ((i + t) as f64 * 0.1).sin() + f as f64 * 0.01);
        let y = Array3::from_shape_fn((count, length, 1), |(i, t, _)| ((i + t) as f64 * 0.1).cos());
        WindowedSplits {
            sequence_length: length,
            x_train: x.clone(),
            y_train: y.clone(),
            x_test: x,
            y_test: y,
        }
    }

    fn small_template() -> Vec<LayerSpec> {
        vec![
            LayerSpec::time_distributed(LayerSpec::Flatten),
            LayerSpec::lstm(4, Activation::Tanh),
            LayerSpec::dense(1, Activation::Linear),
        ]
    }

    fn quiet_assemble() -> AssembleOptions {
        AssembleOptions {
            verbose: false,
            seed: Some(9),
            compile_config: Some(CompileOptions {
                loss: Some(LossKind::Mse),
                ..CompileOptions::default()
            }),
            ..AssembleOptions::default()
        }
    }

    #[test]
    fn test_fit_without_model() {
        let mut session = TrainingSession::new(windows(6, 4));
        let err = session.fit(&FitOptions::default()).unwrap_err();
        assert!(matches!(err, TrainingError::NoModel));
        assert!(session.last_history().is_none());
    }

    #[test]
    fn test_fit_returns_val_loss_and_writes_chart() {
        let dir = tempdir().unwrap();
        let chart_path = dir.path().join("loss.svg");
        let mut session = TrainingSession::new(windows(12, 4));
        session.assemble(&small_template(), &quiet_assemble()).unwrap();

        let metric_path = dir.path().join("mae.svg");
        let options = FitOptions {
            epochs: 3,
            batch_size: 4,
            return_history: true,
            verbose: false,
            chart_path: chart_path.clone(),
            metric_chart_path: Some(metric_path.clone()),
            ..FitOptions::default()
        };
        let val_loss = session.fit(&options).unwrap().unwrap();
        assert_eq!(val_loss.len(), 3);
        let history = session.last_history().unwrap();
        assert_eq!(history.val_losses().unwrap(), val_loss);
        assert_eq!(history.losses().len(), 3);

        let svg = std::fs::read_to_string(&chart_path).unwrap();
        assert!(svg.contains("Loss by Epoch"));
        let svg = std::fs::read_to_string(&metric_path).unwrap();
        assert!(svg.contains("MAE by Epoch"));
    }

    #[test]
    fn test_fit_without_history_returns_none() {
        let mut session = TrainingSession::new(windows(8, 4));
        session.assemble(&small_template(), &quiet_assemble()).unwrap();
        let options = FitOptions {
            epochs: 1,
            render_chart: false,
            verbose: false,
            ..FitOptions::default()
        };
        assert!(session.fit(&options).unwrap().is_none());
        assert_eq!(session.last_history().unwrap().len(), 1);
    }

    #[test]
    fn test_fit_with_hand_built_model() {
        let mut model = Sequential::new(Some(21));
        for spec in small_template() {
            model.add(spec).unwrap();
        }
        let mut session = TrainingSession::new(windows(8, 4));
        session.set_model(model);
        let options = FitOptions {
            epochs: 2,
            render_chart: false,
            return_history: true,
            verbose: false,
            ..FitOptions::default()
        };
        // compile is still the caller's job
        assert!(matches!(session.fit(&options), Err(TrainingError::NotCompiled(_))));

        let mut model = Sequential::new(Some(21));
        for spec in small_template() {
            model.add(spec).unwrap();
        }
        model.compile(CompileConfig::default()).unwrap();
        session.set_model(model);
        let val_loss = session.fit(&options).unwrap().unwrap();
        assert_eq!(val_loss.len(), 2);
        assert_eq!(session.model().unwrap().output_shape(), Some(&[1usize][..]));
    }

    #[test]
    fn test_reshape_precondition() {
        let mut session = TrainingSession::new(windows(8, 4));
        session.assemble(&small_template(), &quiet_assemble()).unwrap();
        let options = FitOptions {
            n_seq: 3,
            n_steps: 2,
            render_chart: false,
            verbose: false,
            ..FitOptions::default()
        };
        assert!(matches!(session.fit(&options), Err(TrainingError::ReshapeMismatch { .. })));
    }
}
