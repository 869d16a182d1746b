// projeto: seqforecast
// file: src/pipeline/normalizer.rs
// Feature scaling: fit on X_train only, apply the same transform to X_test

use log::{info, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_stats::QuantileExt;
use ndarray_stats::interpolate::Linear;
use noisy_float::types::n64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::neural::TrainingError;
use crate::pipeline::loader::{SplitKind, SplitTables};

/// Scaling strategy.
///
/// * `standard` - zero mean, unit (population) variance.
/// * `min_max` - maps the training range onto [0, 1].
/// * `robust` - centres on the median and divides by the interquartile range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    #[default]
    Standard,
    MinMax,
    Robust,
}

impl ScalerKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalerKind::Standard => "standard",
            ScalerKind::MinMax => "min_max",
            ScalerKind::Robust => "robust",
        }
    }
}

impl fmt::Display for ScalerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScalerKind {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(ScalerKind::Standard),
            "min_max" | "minmax" => Ok(ScalerKind::MinMax),
            "robust" => Ok(ScalerKind::Robust),
            other => Err(TrainingError::Config(format!("unknown scaler '{}'", other))),
        }
    }
}

/// Fitted per-column parameters: `x' = (x - center) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub kind: ScalerKind,
    pub center: Array1<f64>,
    pub scale: Array1<f64>,
}

impl Scaler {
    /// Fits one (center, scale) pair per column. NaN cells are ignored; constant
    /// columns get a scale of 1.
    pub fn fit(kind: ScalerKind, data: ArrayView2<'_, f64>) -> Result<Self, TrainingError> {
        if data.nrows() == 0 {
            return Err(TrainingError::DataProcessing(
                "cannot fit a scaler on an empty table".to_string(),
            ));
        }
        let mut center = Array1::zeros(data.ncols());
        let mut scale = Array1::ones(data.ncols());

        for (j, column) in data.axis_iter(Axis(1)).enumerate() {
            let mut finite: Array1<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
            if finite.is_empty() {
                warn!("⚠️ Coluna {} sem valores finitos; mantendo escala identidade", j);
                continue;
            }
            let (c, s) = match kind {
                ScalerKind::Standard => {
                    let mean = finite.mean().unwrap_or(0.0);
                    (mean, finite.std(0.0))
                }
                ScalerKind::MinMax => {
                    let min = *finite
                        .min()
                        .map_err(|e| TrainingError::DataProcessing(e.to_string()))?;
                    let max = *finite
                        .max()
                        .map_err(|e| TrainingError::DataProcessing(e.to_string()))?;
                    (min, max - min)
                }
                ScalerKind::Robust => {
                    let median = column_quantile(&mut finite, 0.5)?;
                    let iqr = column_quantile(&mut finite, 0.75)? - column_quantile(&mut finite, 0.25)?;
                    (median, iqr)
                }
            };
            center[j] = c;
            scale[j] = if s.abs() < f64::EPSILON { 1.0 } else { s };
        }

        Ok(Scaler { kind, center, scale })
    }

    pub fn n_features(&self) -> usize {
        self.center.len()
    }

    fn check_columns(&self, data: &ArrayView2<'_, f64>) -> Result<(), TrainingError> {
        if data.ncols() != self.n_features() {
            return Err(TrainingError::DataProcessing(format!(
                "scaler fitted on {} columns, got {}",
                self.n_features(),
                data.ncols()
            )));
        }
        Ok(())
    }

    pub fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>, TrainingError> {
        self.check_columns(&data)?;
        Ok((&data - &self.center) / &self.scale)
    }

    pub fn inverse_transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>, TrainingError> {
        self.check_columns(&data)?;
        Ok(&data * &self.scale + &self.center)
    }

    pub fn fit_transform(kind: ScalerKind, data: ArrayView2<'_, f64>) -> Result<(Self, Array2<f64>), TrainingError> {
        let scaler = Self::fit(kind, data)?;
        let scaled = scaler.transform(data)?;
        Ok((scaler, scaled))
    }
}

/// Linear-interpolated quantile of a non-empty column (reorders `values`).
fn column_quantile(values: &mut Array1<f64>, q: f64) -> Result<f64, TrainingError> {
    values
        .quantile_axis_skipnan_mut(Axis(0), n64(q), &Linear)
        .map(|quantile| quantile.into_scalar())
        .map_err(|e| TrainingError::DataProcessing(e.to_string()))
}

/// Scaled feature matrices plus the scaler that produced them.
#[derive(Debug, Clone)]
pub struct NormalizedSplits {
    pub scaler: Scaler,
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
}

/// Fits `kind` on X_train and applies it unchanged to X_test.
pub fn normalize(tables: &SplitTables, kind: ScalerKind) -> Result<NormalizedSplits, TrainingError> {
    let train = tables.require(SplitKind::XTrain)?;
    let test = tables.require(SplitKind::XTest)?;

    let (scaler, x_train) = Scaler::fit_transform(kind, train.values.view())?;
    let x_test = scaler.transform(test.values.view())?;
    info!(
        "📏 Normalização '{}' ajustada em X_train ({} colunas) e aplicada a X_test",
        kind,
        scaler.n_features()
    );
    Ok(NormalizedSplits { scaler, x_train, x_test })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::loader::SplitTable;
    use ndarray::array;
    use std::path::PathBuf;

    fn table(values: Array2<f64>) -> SplitTable {
        SplitTable {
            source: PathBuf::from("mem"),
            index_name: "Date".to_string(),
            index: (0..values.nrows()).map(|i| format!("d{}", i)).collect(),
            columns: (0..values.ncols()).map(|j| format!("c{}", j)).collect(),
            values,
        }
    }

    #[test]
    fn test_standard_scaler() {
        let data = array![[1.0, 10.0], [2.0, 10.0], [3.0, 10.0]];
        let (scaler, scaled) = Scaler::fit_transform(ScalerKind::Standard, data.view()).unwrap();
        assert!((scaler.center[0] - 2.0).abs() < 1e-12);
        assert!((scaler.scale[0] - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
        // constant column keeps unit scale
        assert_eq!(scaler.scale[1], 1.0);
        assert!(scaled.column(0).sum().abs() < 1e-12);
        assert!(scaled.column(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_min_max_and_robust() {
        let data = array![[0.0], [5.0], [10.0], [20.0]];
        let minmax = Scaler::fit(ScalerKind::MinMax, data.view()).unwrap();
        let scaled = minmax.transform(data.view()).unwrap();
        assert_eq!(scaled.column(0).to_vec(), vec![0.0, 0.25, 0.5, 1.0]);

        let robust = Scaler::fit(ScalerKind::Robust, data.view()).unwrap();
        assert!((robust.center[0] - 7.5).abs() < 1e-12);
        // q25 = 3.75, q75 = 12.5
        assert!((robust.scale[0] - 8.75).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_transform_restores_data() {
        let data = array![[1.0, -4.0], [3.0, 2.0], [8.0, 0.5]];
        for kind in [ScalerKind::Standard, ScalerKind::MinMax, ScalerKind::Robust] {
            let (scaler, scaled) = Scaler::fit_transform(kind, data.view()).unwrap();
            let restored = scaler.inverse_transform(scaled.view()).unwrap();
            for (a, b) in restored.iter().zip(data.iter()) {
                assert!((a - b).abs() < 1e-9, "{}", kind);
            }
        }
    }

    #[test]
    fn test_fit_then_transform_matches_fit_transform() {
        let train = array![[1.0, 7.0], [4.0, -2.0], [2.5, 3.0], [9.0, 0.0]];
        for kind in [ScalerKind::Standard, ScalerKind::MinMax, ScalerKind::Robust] {
            let scaler = Scaler::fit(kind, train.view()).unwrap();
            let separate = scaler.transform(train.view()).unwrap();
            let (joint_scaler, joint) = Scaler::fit_transform(kind, train.view()).unwrap();
            assert_eq!(scaler, joint_scaler);
            assert_eq!(separate, joint);
        }
    }

    #[test]
    fn test_transform_leaves_scaler_unchanged() {
        let train = array![[1.0, 7.0], [4.0, -2.0], [2.5, 3.0]];
        let test = array![[50.0, -40.0], [0.0, 1.0]];
        let scaler = Scaler::fit(ScalerKind::Robust, train.view()).unwrap();
        let before = scaler.clone();
        scaler.transform(test.view()).unwrap();
        assert_eq!(scaler.center, before.center);
        assert_eq!(scaler.scale, before.scale);
    }

    #[test]
    fn test_robust_skips_nan() {
        let data = array![[0.0], [f64::NAN], [5.0], [10.0], [20.0]];
        let robust = Scaler::fit(ScalerKind::Robust, data.view()).unwrap();
        assert!((robust.center[0] - 7.5).abs() < 1e-12);
        assert!((robust.scale[0] - 8.75).abs() < 1e-12);
    }

    #[test]
    fn test_test_split_uses_training_statistics() {
        let mut tables = SplitTables::new();
        tables.insert(SplitKind::XTrain, table(array![[0.0], [2.0]]));
        tables.insert(SplitKind::XTest, table(array![[100.0], [102.0]]));
        let normalized = normalize(&tables, ScalerKind::Standard).unwrap();
        assert_eq!(normalized.x_train.column(0).to_vec(), vec![-1.0, 1.0]);
        // (100 - 1) / 1: test data never refits the scaler
        assert_eq!(normalized.x_test.column(0).to_vec(), vec![99.0, 101.0]);
    }

    #[test]
    fn test_missing_split_and_column_mismatch() {
        let mut tables = SplitTables::new();
        tables.insert(SplitKind::XTrain, table(array![[0.0, 1.0], [2.0, 3.0]]));
        assert!(matches!(
            normalize(&tables, ScalerKind::Standard),
            Err(TrainingError::MissingSplit("X_test"))
        ));
        tables.insert(SplitKind::XTest, table(array![[1.0], [2.0]]));
        assert!(normalize(&tables, ScalerKind::Standard).is_err());
    }

    #[test]
    fn test_nan_cells_ignored_when_fitting() {
        let data = array![[1.0], [f64::NAN], [3.0]];
        let scaler = Scaler::fit(ScalerKind::Standard, data.view()).unwrap();
        assert!((scaler.center[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_scaler_kind_from_str() {
        assert_eq!("MinMax".parse::<ScalerKind>().unwrap(), ScalerKind::MinMax);
        assert!("zscore".parse::<ScalerKind>().is_err());
    }
}
