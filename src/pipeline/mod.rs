// projeto: seqforecast
// file: src/pipeline/mod.rs
// Stage modules and the end-to-end run: load -> normalize -> window -> assemble -> fit

pub mod loader;      // Pre-split CSV tables keyed by marker
pub mod normalizer;  // Scalers fitted on X_train only
pub mod windower;    // Sliding windows and (n_seq, n_steps) reshape
pub mod assembler;   // Template -> compiled Sequential
pub mod trainer;     // Training session and loss charts
pub mod chart;       // plotters line-chart formatting

pub use assembler::{AssembleOptions, assemble, cnn_lstm_template};
pub use chart::{AxisProperties, PlotSeries, draw_line_chart};
pub use loader::{LoaderOptions, SplitKind, SplitTable, SplitTables};
pub use normalizer::{NormalizedSplits, Scaler, ScalerKind, normalize};
pub use trainer::{FitOptions, TrainingSession};
pub use windower::{WindowedSplits, reshape_windows, split_to_sequences, window};

use log::info;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use crate::config::RunConfig;
use crate::neural::{History, TrainingError};

/// What one full run produced.
#[derive(Debug)]
pub struct RunReport {
    pub status: BTreeMap<&'static str, bool>,
    pub scaler: Scaler,
    pub history: History,
    pub val_loss: Option<Vec<f64>>,
    pub parameters: usize,
}

/// Runs every stage with the settings in `config`.
pub fn run(config: &RunConfig) -> Result<RunReport, TrainingError> {
    config.validate()?;
    let start = Instant::now();

    let tables = SplitTables::load_dir(&config.data.dir, &config.loader_options())?;
    let normalized = normalize(&tables, config.data.scaler)?;
    let windows = split_to_sequences(&tables, &normalized, config.data.sequence_length)?.ok_or_else(|| {
        TrainingError::DataProcessing("não foi possível gerar as sequências (ver avisos acima)".to_string())
    })?;

    let options = AssembleOptions {
        compile: true,
        compile_config: Some(config.compile.clone()),
        metrics: None,
        verbose: config.training.verbose,
        input_shape: Some(vec![config.training.n_seq, config.training.n_steps, windows.n_features()]),
        seed: config.training.seed,
    };
    let mut session = TrainingSession::new(windows);
    session.assemble(&config.layers, &options)?;
    let parameters = session.model().map(|m| m.param_count()).unwrap_or(0);

    let val_loss = session.fit(&config.fit_options())?;
    let history = session.last_history().cloned().unwrap_or_default();

    if let Some(path) = &config.training.history_path {
        save_history(&history, path)?;
    }

    info!("⏱️ Execução concluída em {:.2}s", start.elapsed().as_secs_f64());
    Ok(RunReport {
        status: tables.status(),
        scaler: normalized.scaler,
        history,
        val_loss,
        parameters,
    })
}

/// Saves as CSV when the extension is `csv`, JSON otherwise.
pub fn save_history(history: &History, path: &Path) -> Result<(), TrainingError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => history.save_csv(path),
        _ => history.save_json(path),
    }
}
