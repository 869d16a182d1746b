// projeto: seqforecast
// file: src/lib.rs
// Sequence-forecasting trainer: pre-split CSV tables -> windows -> CNN-LSTM style models

pub mod config;    // TOML run configuration
pub mod neural;    // ndarray layers, Sequential model, optimizers, losses
pub mod pipeline;  // Loader, normalizer, windower, assembler, trainer, charts

pub use config::RunConfig;
pub use neural::TrainingError;
