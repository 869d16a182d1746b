// projeto: seqforecast
// file: src/config.rs
// Run configuration (TOML): data location, training options, compile settings and layer template

use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::neural::{CompileOptions, LayerSpec, TrainingError};
use crate::pipeline::assembler::cnn_lstm_template;
use crate::pipeline::loader::LoaderOptions;
use crate::pipeline::normalizer::ScalerKind;
use crate::pipeline::trainer::FitOptions;

pub const DEFAULT_CONFIG_PATH: &str = "seqforecast.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub data: DataConfig,
    pub training: TrainingConfig,
    #[serde(default)]
    pub compile: CompileOptions,
    #[serde(default = "cnn_lstm_template")]
    pub layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub dir: PathBuf,
    pub index_column: String,
    pub delimiter: char,
    pub scaler: ScalerKind,
    pub sequence_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub n_seq: usize,
    pub n_steps: usize,
    pub batch_size: usize,
    pub render_chart: bool,
    pub return_history: bool,
    pub shuffle: bool,
    pub verbose: bool,
    pub chart_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_chart_path: Option<PathBuf>,
    /// `.json` or `.csv`, chosen by extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data: DataConfig {
                dir: PathBuf::from("data"),
                index_column: "Date".to_string(),
                delimiter: ',',
                scaler: ScalerKind::Standard,
                sequence_length: 4,
            },
            training: TrainingConfig {
                epochs: 10,
                n_seq: 2,
                n_steps: 2,
                batch_size: 32,
                render_chart: true,
                return_history: false,
                shuffle: true,
                verbose: true,
                chart_path: PathBuf::from("loss_by_epoch.svg"),
                metric_chart_path: None,
                history_path: None,
                seed: None,
            },
            compile: CompileOptions::default(),
            layers: cnn_lstm_template(),
        }
    }
}

impl RunConfig {
    /// Reads `path`; when the file does not exist the defaults are written there and returned.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: RunConfig = toml::from_str(&content)?;
            info!("⚙️ Configuração carregada de: {}", path.display());
            Ok(config)
        } else {
            info!("📄 Arquivo de configuração não encontrado. Criando padrão...");
            let config = RunConfig::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TrainingError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)?;
        info!("💾 Configuração salva em: {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        if self.data.dir.as_os_str().is_empty() {
            return Err(TrainingError::Config("data.dir não pode estar vazio".to_string()));
        }
        if self.data.index_column.trim().is_empty() {
            return Err(TrainingError::Config("data.index_column não pode estar vazio".to_string()));
        }
        if !self.data.delimiter.is_ascii() {
            return Err(TrainingError::Config(format!(
                "delimitador '{}' precisa ser ASCII",
                self.data.delimiter
            )));
        }
        if self.data.sequence_length == 0 {
            return Err(TrainingError::Config("sequence_length deve ser maior que zero".to_string()));
        }
        let t = &self.training;
        if t.epochs == 0 || t.batch_size == 0 || t.n_seq == 0 || t.n_steps == 0 {
            return Err(TrainingError::Config(
                "epochs, batch_size, n_seq e n_steps devem ser maiores que zero".to_string(),
            ));
        }
        if t.n_seq.checked_mul(t.n_steps) != Some(self.data.sequence_length) {
            return Err(TrainingError::ReshapeMismatch {
                sequence_length: self.data.sequence_length,
                n_seq: t.n_seq,
                n_steps: t.n_steps,
            });
        }
        if self.layers.is_empty() {
            return Err(TrainingError::Config("o template de camadas está vazio".to_string()));
        }
        if let Some(optimizer) = &self.compile.optimizer {
            optimizer.validate()?;
        }
        Ok(())
    }

    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            index_column: self.data.index_column.clone(),
            delimiter: self.data.delimiter as u8,
        }
    }

    pub fn fit_options(&self) -> FitOptions {
        let t = &self.training;
        FitOptions {
            epochs: t.epochs,
            n_seq: t.n_seq,
            n_steps: t.n_steps,
            batch_size: t.batch_size,
            render_chart: t.render_chart,
            return_history: t.return_history,
            verbose: t.verbose,
            shuffle: t.shuffle,
            chart_path: t.chart_path.clone(),
            metric_chart_path: t.metric_chart_path.clone(),
        }
    }
}
