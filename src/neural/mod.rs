// projeto: seqforecast
// file: src/neural/mod.rs
// Module declarations for the ndarray sequence-model library

pub mod utils;    // Error type, activations and initialisers
pub mod optim;    // Adam / SGD / RMSprop keyed by parameter name
pub mod losses;   // Losses with gradients, metrics and target alignment
pub mod layers;   // Layer trait, layer specs and implementations
pub mod compile;  // Compile options and default merging
pub mod history;  // Per-epoch history with CSV / JSON export
pub mod model;    // Sequential model

// Re-export commonly used items for convenience
pub use compile::{CompileConfig, CompileOptions};
pub use history::{EpochRecord, History};
pub use layers::{Layer, LayerSpec};
pub use losses::{LossKind, MetricKind};
pub use model::{FitConfig, Sequential};
pub use optim::{Optimizer, OptimizerKind};
pub use utils::{Activation, TrainingError};
