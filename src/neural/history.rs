// projeto: seqforecast
// file: src/neural/history.rs
// Per-epoch training history with summary and CSV/JSON export

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::neural::utils::TrainingError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f64,
    pub val_loss: Option<f64>,
    pub metrics: BTreeMap<String, f64>,
    pub val_metrics: BTreeMap<String, f64>,
    pub elapsed_secs: f64,
    pub timestamp: DateTime<Utc>,
}

impl EpochRecord {
    pub fn new(epoch: usize, loss: f64) -> Self {
        EpochRecord {
            epoch,
            loss,
            val_loss: None,
            metrics: BTreeMap::new(),
            val_metrics: BTreeMap::new(),
            elapsed_secs: 0.0,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub loss_name: String,
    pub records: Vec<EpochRecord>,
}

impl History {
    pub fn new(loss_name: &str) -> Self {
        History {
            loss_name: loss_name.to_string(),
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn losses(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.loss).collect()
    }

    /// Validation losses, present only when every epoch was validated.
    pub fn val_losses(&self) -> Option<Vec<f64>> {
        if self.records.is_empty() {
            return None;
        }
        self.records.iter().map(|r| r.val_loss).collect()
    }

    /// Looks a series up by its keras-style key: `loss`, `val_loss`, `<metric>` or `val_<metric>`.
    pub fn series(&self, key: &str) -> Option<Vec<f64>> {
        match key {
            "loss" => Some(self.losses()),
            "val_loss" => self.val_losses(),
            _ => {
                let (validation, name) = match key.strip_prefix("val_") {
                    Some(name) => (true, name),
                    None => (false, key),
                };
                let values: Option<Vec<f64>> = self
                    .records
                    .iter()
                    .map(|r| {
                        let map = if validation { &r.val_metrics } else { &r.metrics };
                        map.get(name).copied()
                    })
                    .collect();
                values.filter(|v| !v.is_empty())
            }
        }
    }

    /// Epoch with the lowest validation loss, falling back to the training loss.
    pub fn best_epoch(&self) -> Option<&EpochRecord> {
        let score = |r: &EpochRecord| r.val_loss.unwrap_or(r.loss);
        self.records.iter().min_by(|a, b| score(a).total_cmp(&score(b)))
    }

    pub fn print_summary(&self) {
        if let Some(best) = self.best_epoch() {
            println!("📈 Resumo do treinamento ({} épocas, loss = {}):", self.len(), self.loss_name);
            println!("   ├── Melhor época: {}", best.epoch);
            println!("   ├── Loss: {:.6}", best.loss);
            if let Some(val) = best.val_loss {
                println!("   ├── Val loss: {:.6}", val);
            }
            for (name, value) in &best.val_metrics {
                println!("   ├── Val {}: {:.6}", name, value);
            }
            let total: f64 = self.records.iter().map(|r| r.elapsed_secs).sum();
            println!("   └── Tempo total: {:.2}s", total);
        }
    }

    fn metric_names(&self) -> Vec<String> {
        self.records
            .first()
            .map(|r| r.metrics.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), TrainingError> {
        let names = self.metric_names();
        let mut writer = csv::Writer::from_path(path.as_ref())?;

        let mut header = vec!["epoch".to_string(), "loss".to_string(), "val_loss".to_string()];
        for name in &names {
            header.push(name.clone());
            header.push(format!("val_{}", name));
        }
        header.push("elapsed_secs".to_string());
        header.push("timestamp".to_string());
        writer.write_record(&header)?;

        let fmt_opt = |v: Option<f64>| v.map(|x| format!("{:.6}", x)).unwrap_or_default();
        for record in &self.records {
            let mut row = vec![
                record.epoch.to_string(),
                format!("{:.6}", record.loss),
                fmt_opt(record.val_loss),
            ];
            for name in &names {
                row.push(fmt_opt(record.metrics.get(name).copied()));
                row.push(fmt_opt(record.val_metrics.get(name).copied()));
            }
            row.push(format!("{:.3}", record.elapsed_secs));
            row.push(record.timestamp.to_rfc3339());
            writer.write_record(&row)?;
        }
        writer.flush()?;
        info!("📊 Histórico de treinamento salvo em: {}", path.as_ref().display());
        Ok(())
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), TrainingError> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, self)?;
        info!("📊 Histórico de treinamento salvo em: {}", path.as_ref().display());
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, TrainingError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_history() -> History {
        let mut history = History::new("rmse");
        for (epoch, (loss, val)) in [(0.9, 0.8), (0.5, 0.6), (0.3, 0.7)].into_iter().enumerate() {
            let mut record = EpochRecord::new(epoch + 1, loss);
            record.val_loss = Some(val);
            record.metrics.insert("mae".to_string(), loss / 2.0);
            record.val_metrics.insert("mae".to_string(), val / 2.0);
            history.push(record);
        }
        history
    }

    #[test]
    fn test_series_lookup() {
        let history = sample_history();
        assert_eq!(history.series("loss").unwrap(), vec![0.9, 0.5, 0.3]);
        assert_eq!(history.series("val_loss").unwrap(), vec![0.8, 0.6, 0.7]);
        assert_eq!(history.series("val_mae").unwrap(), vec![0.4, 0.3, 0.35]);
        assert!(history.series("mape").is_none());
    }

    #[test]
    fn test_best_epoch_uses_validation() {
        let history = sample_history();
        assert_eq!(history.best_epoch().unwrap().epoch, 2);
    }

    #[test]
    fn test_val_losses_missing() {
        let mut history = History::new("mse");
        history.push(EpochRecord::new(1, 1.0));
        assert!(history.val_losses().is_none());
        assert!(History::new("mse").val_losses().is_none());
    }

    #[test]
    fn test_csv_and_json_export() {
        let dir = tempdir().unwrap();
        let history = sample_history();

        let csv_path = dir.path().join("history.csv");
        history.save_csv(&csv_path).unwrap();
        let text = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "epoch,loss,val_loss,mae,val_mae,elapsed_secs,timestamp"
        );
        let first = lines.next().unwrap();
        let stamp = first.rsplit(',').next().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
        assert_eq!(lines.count(), 2);

        let json_path = dir.path().join("history.json");
        history.save_json(&json_path).unwrap();
        let loaded = History::load_json(&json_path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.loss_name, "rmse");
        for (a, b) in loaded.losses().iter().zip(history.losses()) {
            assert!((a - b).abs() < 1e-12);
        }
        for (a, b) in loaded.records.iter().zip(&history.records) {
            assert_eq!(a.timestamp, b.timestamp);
        }
    }
}
