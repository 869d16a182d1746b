// projeto: seqforecast
// file: src/pipeline/loader.rs
// Loads the pre-split X_train / X_test / y_train / y_test tables from a directory of CSV files

use csv::{ReaderBuilder, Trim};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView1, Axis};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::neural::TrainingError;

/// Which of the four pre-split tables a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SplitKind {
    XTrain,
    XTest,
    YTrain,
    YTest,
}

impl SplitKind {
    pub const ALL: [SplitKind; 4] = [SplitKind::XTrain, SplitKind::XTest, SplitKind::YTrain, SplitKind::YTest];

    /// Substring a file name must contain to be loaded as this table.
    pub fn marker(self) -> &'static str {
        match self {
            SplitKind::XTrain => "X_train",
            SplitKind::XTest => "X_test",
            SplitKind::YTrain => "y_train",
            SplitKind::YTest => "y_test",
        }
    }
}

impl fmt::Display for SplitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Column used as the row key (dates in the usual layout).
    pub index_column: String,
    pub delimiter: u8,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        LoaderOptions {
            index_column: "Date".to_string(),
            delimiter: b',',
        }
    }
}

/// A date-keyed numeric table.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitTable {
    pub source: PathBuf,
    pub index_name: String,
    pub index: Vec<String>,
    pub columns: Vec<String>,
    pub values: Array2<f64>,
}

impl SplitTable {
    pub fn from_path<P: AsRef<Path>>(path: P, options: &LoaderOptions) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let file = fs::File::open(path)?;
        let mut table = Self::from_reader(file, options, &path.display().to_string())?;
        table.source = path.to_path_buf();
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R, options: &LoaderOptions, name: &str) -> Result<Self, TrainingError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(options.delimiter)
            .trim(Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let index_pos = headers
            .iter()
            .position(|h| h == options.index_column)
            .ok_or_else(|| {
                TrainingError::DataProcessing(format!(
                    "{}: coluna de índice '{}' não encontrada (cabeçalho: {:?})",
                    name,
                    options.index_column,
                    headers.iter().collect::<Vec<_>>()
                ))
            })?;
        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index_pos)
            .map(|(_, h)| h.to_string())
            .collect();

        let mut index = Vec::new();
        let mut flat = Vec::new();
        let mut empty_cells = 0usize;
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            for (i, cell) in record.iter().enumerate() {
                if i == index_pos {
                    index.push(cell.to_string());
                    continue;
                }
                if cell.is_empty() {
                    empty_cells += 1;
                    flat.push(f64::NAN);
                    continue;
                }
                let value = cell.parse::<f64>().map_err(|_| {
                    TrainingError::DataProcessing(format!(
                        "{}: linha {}, coluna '{}': valor não numérico '{}'",
                        name,
                        line + 2,
                        &headers[i],
                        cell
                    ))
                })?;
                flat.push(value);
            }
        }
        if empty_cells > 0 {
            warn!("⚠️ {}: {} células vazias lidas como NaN", name, empty_cells);
        }

        let values = Array2::from_shape_vec((index.len(), columns.len()), flat)?;
        Ok(SplitTable {
            source: PathBuf::from(name),
            index_name: options.index_column.clone(),
            index,
            columns,
            values,
        })
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.values.index_axis(Axis(1), i))
    }
}

/// The tables found in one data directory. Any subset of the four may be present.
#[derive(Debug, Clone, Default)]
pub struct SplitTables {
    tables: BTreeMap<SplitKind, SplitTable>,
}

impl SplitTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `dir` for `*.csv` files whose name contains a split marker. Files without a
    /// marker are skipped. Two files carrying the same marker are an error.
    pub fn load_dir<P: AsRef<Path>>(dir: P, options: &LoaderOptions) -> Result<Self, TrainingError> {
        let dir = dir.as_ref();
        info!("📂 Procurando arquivos CSV em: {}", dir.display());

        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("csv"))
            .collect();
        files.sort();

        let mut matched: BTreeMap<SplitKind, PathBuf> = BTreeMap::new();
        for path in &files {
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let mut any = false;
            for kind in SplitKind::ALL {
                if !file_name.contains(kind.marker()) {
                    continue;
                }
                any = true;
                if let Some(previous) = matched.get(&kind) {
                    return Err(TrainingError::AmbiguousSplit {
                        marker: kind.marker(),
                        first: previous.display().to_string(),
                        second: path.display().to_string(),
                    });
                }
                matched.insert(kind, path.clone());
            }
            if !any {
                debug!("⏭️ Ignorando arquivo sem marcador: {}", file_name);
            }
        }

        let mut tables = SplitTables::new();
        for (kind, path) in matched {
            let table = SplitTable::from_path(&path, options)?;
            debug!("📄 {} carregado de {}", kind, path.display());
            tables.insert(kind, table);
        }
        tables.log_summary();
        Ok(tables)
    }

    pub fn insert(&mut self, kind: SplitKind, table: SplitTable) {
        self.tables.insert(kind, table);
    }

    pub fn get(&self, kind: SplitKind) -> Option<&SplitTable> {
        self.tables.get(&kind)
    }

    pub fn require(&self, kind: SplitKind) -> Result<&SplitTable, TrainingError> {
        self.get(kind).ok_or(TrainingError::MissingSplit(kind.marker()))
    }

    /// Markers that were loaded, each mapped to `true`. Absent markers have no entry.
    pub fn status(&self) -> BTreeMap<&'static str, bool> {
        self.tables.keys().map(|k| (k.marker(), true)).collect()
    }

    pub fn is_complete(&self) -> bool {
        SplitKind::ALL.iter().all(|k| self.tables.contains_key(k))
    }

    pub fn log_summary(&self) {
        if self.tables.is_empty() {
            warn!("⚠️ Nenhuma tabela X_train / X_test / y_train / y_test encontrada");
            return;
        }
        info!("✅ Tabelas carregadas: {}", self.tables.len());
        let last = self.tables.len() - 1;
        for (i, (kind, table)) in self.tables.iter().enumerate() {
            let branch = if i == last { "└──" } else { "├──" };
            info!(
                "   {} {}: {} linhas x {} colunas ({})",
                branch,
                kind,
                table.nrows(),
                table.ncols(),
                table.source.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    const X: &str = "Date,open,close\n2024-01-01,1.0,2.0\n2024-01-02,3.0,4.0\n";
    const Y: &str = "Date,target\n2024-01-01,0.5\n2024-01-02,0.7\n";

    #[test]
    fn test_status_lists_only_found_markers() {
        let dir = tempdir().unwrap();
        write(dir.path(), "X_train.csv", X);
        write(dir.path(), "y_test.csv", Y);
        write(dir.path(), "notes.csv", "Date,a\n2024-01-01,1\n");
        write(dir.path(), "X_test.txt", X);

        let tables = SplitTables::load_dir(dir.path(), &LoaderOptions::default()).unwrap();
        let status = tables.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status.get("X_train"), Some(&true));
        assert_eq!(status.get("y_test"), Some(&true));
        assert!(tables.get(SplitKind::XTest).is_none());
        assert!(matches!(
            tables.require(SplitKind::YTrain),
            Err(TrainingError::MissingSplit("y_train"))
        ));
        assert!(!tables.is_complete());
    }

    #[test]
    fn test_table_contents() {
        let dir = tempdir().unwrap();
        write(dir.path(), "stock_X_train.csv", X);
        let tables = SplitTables::load_dir(dir.path(), &LoaderOptions::default()).unwrap();
        let table = tables.require(SplitKind::XTrain).unwrap();
        assert_eq!(table.index, vec!["2024-01-01", "2024-01-02"]);
        assert_eq!(table.columns, vec!["open", "close"]);
        assert_eq!(table.values[[1, 1]], 4.0);
        assert_eq!(table.column("close").unwrap().to_vec(), vec![2.0, 4.0]);
    }

    #[test]
    fn test_ambiguous_marker_is_error() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a_X_train.csv", X);
        write(dir.path(), "b_X_train.csv", X);
        let err = SplitTables::load_dir(dir.path(), &LoaderOptions::default()).unwrap_err();
        assert!(matches!(err, TrainingError::AmbiguousSplit { marker: "X_train", .. }));
    }

    #[test]
    fn test_missing_index_column() {
        let err = SplitTable::from_reader("day,a\n1,2\n".as_bytes(), &LoaderOptions::default(), "t").unwrap_err();
        assert!(matches!(err, TrainingError::DataProcessing(_)));
    }

    #[test]
    fn test_empty_cell_becomes_nan_and_text_is_error() {
        let options = LoaderOptions::default();
        let table = SplitTable::from_reader("Date,a,b\nd1,,2\n".as_bytes(), &options, "t").unwrap();
        assert!(table.values[[0, 0]].is_nan());
        assert_eq!(table.values[[0, 1]], 2.0);

        let err = SplitTable::from_reader("Date,a\nd1,abc\n".as_bytes(), &options, "t").unwrap_err();
        assert!(matches!(err, TrainingError::DataProcessing(_)));
    }

    #[test]
    fn test_custom_delimiter_and_index() {
        let options = LoaderOptions {
            index_column: "Data".to_string(),
            delimiter: b';',
        };
        let table = SplitTable::from_reader("a;Data\n1.5;d1\n2.5;d2\n".as_bytes(), &options, "t").unwrap();
        assert_eq!(table.columns, vec!["a"]);
        assert_eq!(table.index, vec!["d1", "d2"]);
        assert_eq!(table.values.column(0).to_vec(), vec![1.5, 2.5]);
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = tempdir().unwrap();
        let err = SplitTables::load_dir(dir.path().join("nope"), &LoaderOptions::default()).unwrap_err();
        assert!(matches!(err, TrainingError::Io(_)));
    }
}
