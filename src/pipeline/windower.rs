// projeto: seqforecast
// file: src/pipeline/windower.rs
// Sliding-window sequence builder and (n_seq, n_steps) reshaping

use log::{info, warn};
use ndarray::{Array3, Array4, ArrayView2, s};

use crate::neural::TrainingError;
use crate::pipeline::loader::{SplitKind, SplitTables};
use crate::pipeline::normalizer::NormalizedSplits;

/// Slides a window of `sequence_length` rows, stride 1, over features and targets together.
///
/// For N rows the result holds N - L windows; window i covers rows [i, i + L). Returns
/// `None` (after a warning) when the row counts differ or L is zero.
pub fn window(
    features: ArrayView2<'_, f64>,
    targets: ArrayView2<'_, f64>,
    sequence_length: usize,
) -> Option<(Array3<f64>, Array3<f64>)> {
    let rows = features.nrows();
    if rows != targets.nrows() {
        warn!(
            "⚠️ Número de linhas diferente entre features ({}) e targets ({}); janelas não geradas",
            rows,
            targets.nrows()
        );
        return None;
    }
    if sequence_length == 0 {
        warn!("⚠️ sequence_length deve ser maior que zero; janelas não geradas");
        return None;
    }

    let count = rows.saturating_sub(sequence_length);
    let mut x = Array3::zeros((count, sequence_length, features.ncols()));
    let mut y = Array3::zeros((count, sequence_length, targets.ncols()));
    for i in 0..count {
        x.slice_mut(s![i, .., ..])
            .assign(&features.slice(s![i..i + sequence_length, ..]));
        y.slice_mut(s![i, .., ..])
            .assign(&targets.slice(s![i..i + sequence_length, ..]));
    }
    Some((x, y))
}

/// Train and test windows, ready for reshaping.
#[derive(Debug, Clone)]
pub struct WindowedSplits {
    pub sequence_length: usize,
    pub x_train: Array3<f64>,
    pub y_train: Array3<f64>,
    pub x_test: Array3<f64>,
    pub y_test: Array3<f64>,
}

impl WindowedSplits {
    pub fn n_features(&self) -> usize {
        self.x_train.dim().2
    }
}

/// Windows normalized features against the raw target tables of each split.
///
/// `Ok(None)` means a split could not be windowed (the reason has been logged).
pub fn split_to_sequences(
    tables: &SplitTables,
    normalized: &NormalizedSplits,
    sequence_length: usize,
) -> Result<Option<WindowedSplits>, TrainingError> {
    let y_train = tables.require(SplitKind::YTrain)?;
    let y_test = tables.require(SplitKind::YTest)?;

    let Some((x_train, y_train)) = window(normalized.x_train.view(), y_train.values.view(), sequence_length) else {
        return Ok(None);
    };
    let Some((x_test, y_test)) = window(normalized.x_test.view(), y_test.values.view(), sequence_length) else {
        return Ok(None);
    };

    info!(
        "🔄 Sequências geradas (L = {}): treino {:?} / {:?}, teste {:?} / {:?}",
        sequence_length,
        x_train.dim(),
        y_train.dim(),
        x_test.dim(),
        y_test.dim()
    );
    Ok(Some(WindowedSplits {
        sequence_length,
        x_train,
        y_train,
        x_test,
        y_test,
    }))
}

/// (windows, L, F) -> (windows, n_seq, n_steps, F). Requires n_seq * n_steps == L.
pub fn reshape_windows(batch: &Array3<f64>, n_seq: usize, n_steps: usize) -> Result<Array4<f64>, TrainingError> {
    let (count, sequence_length, features) = batch.dim();
    if n_seq == 0 || n_steps == 0 || n_seq.checked_mul(n_steps) != Some(sequence_length) {
        return Err(TrainingError::ReshapeMismatch {
            sequence_length,
            n_seq,
            n_steps,
        });
    }
    Ok(batch
        .to_shape((count, n_seq, n_steps, features))?
        .into_owned())
}
