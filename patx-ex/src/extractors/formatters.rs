//! Tabular output formatters
//!
//! Feature-vector methods append one row per file to every configured formatter.
//! Each formatter owns `<output>.<ext>`: the header is written when the formatter
//! is created, rows are appended afterwards.

use super::Row;
use crate::error::{ExtractError, ExtractResult};
use patx_common::{FeatureOutputOptions, OutputFormat};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Column type
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    /// Closed set of labels
    Nominal(Vec<String>),
    Real,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn nominal(name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Nominal(labels),
        }
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Real,
        }
    }
}

pub trait Formatter: Send {
    /// Output file, `None` for formatters that discard rows
    fn path(&self) -> Option<&Path>;

    fn append(&mut self, rows: &[Row]) -> std::io::Result<()>;
}

fn with_extension(base: &Path, extension: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn create_file(path: &Path) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

fn append_file(path: &Path) -> std::io::Result<BufWriter<File>> {
    Ok(BufWriter::new(OpenOptions::new().append(true).open(path)?))
}

/// Weka ARFF
pub struct ArffFormat {
    path: PathBuf,
}

impl ArffFormat {
    pub fn create(base: &Path, columns: &[Column], relation_name: &str) -> std::io::Result<Self> {
        let path = with_extension(base, "arff");
        let mut writer = create_file(&path)?;

        writeln!(writer, "@relation {}", relation_name)?;
        for column in columns {
            match &column.kind {
                ColumnKind::Nominal(labels) => {
                    writeln!(writer, "@attribute {} {{{}}}", column.name, labels.join(","))?
                }
                ColumnKind::Real => writeln!(writer, "@attribute {} real", column.name)?,
            }
        }
        writeln!(writer, "@data")?;
        writer.flush()?;

        Ok(Self { path })
    }
}

impl Formatter for ArffFormat {
    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn append(&mut self, rows: &[Row]) -> std::io::Result<()> {
        let mut writer = append_file(&self.path)?;
        for row in rows {
            let mut fields = vec![row.label.clone()];
            fields.extend(row.values.iter().map(|v| v.to_string()));
            writeln!(writer, "{}", fields.join(","))?;
        }
        writer.flush()
    }
}

/// Comma separated values with a header row
pub struct CsvFormat {
    path: PathBuf,
}

impl CsvFormat {
    pub fn create(base: &Path, columns: &[Column]) -> std::io::Result<Self> {
        let path = with_extension(base, "csv");
        let mut writer = create_file(&path)?;
        let header: Vec<String> = columns.iter().map(|c| csv_field(&c.name)).collect();
        writeln!(writer, "{}", header.join(","))?;
        writer.flush()?;
        Ok(Self { path })
    }
}

impl Formatter for CsvFormat {
    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn append(&mut self, rows: &[Row]) -> std::io::Result<()> {
        let mut writer = append_file(&self.path)?;
        for row in rows {
            let mut fields = vec![csv_field(&row.label)];
            fields.extend(row.values.iter().map(|v| v.to_string()));
            writeln!(writer, "{}", fields.join(","))?;
        }
        writer.flush()
    }
}

/// Quote a field containing a separator, quote or line break
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Discards every row
pub struct NullFormat;

impl Formatter for NullFormat {
    fn path(&self) -> Option<&Path> {
        None
    }

    fn append(&mut self, _rows: &[Row]) -> std::io::Result<()> {
        Ok(())
    }
}

/// Column layout plus the formatters rows are appended to
///
/// Shared by the batch workers of a run; appends are serialized.
pub struct FeatureTable {
    columns: Vec<Column>,
    formatters: Mutex<Vec<Box<dyn Formatter>>>,
}

impl FeatureTable {
    pub fn create(options: &FeatureOutputOptions, columns: Vec<Column>) -> ExtractResult<Self> {
        let wanted: &[OutputFormat] = match options.format {
            OutputFormat::All => &[OutputFormat::Arff, OutputFormat::Csv, OutputFormat::Null],
            OutputFormat::Arff => &[OutputFormat::Arff],
            OutputFormat::Csv => &[OutputFormat::Csv],
            OutputFormat::Null => &[OutputFormat::Null],
        };

        let mut formatters: Vec<Box<dyn Formatter>> = Vec::with_capacity(wanted.len());
        for format in wanted {
            let formatter: Box<dyn Formatter> = match format {
                OutputFormat::Arff => {
                    let relation = options.relation_name.as_deref().ok_or_else(|| {
                        ExtractError::Config(
                            "Missing relation name in arff header (\"relation_name\")".to_string(),
                        )
                    })?;
                    Box::new(ArffFormat::create(&options.output, &columns, relation)?)
                }
                OutputFormat::Csv => Box::new(CsvFormat::create(&options.output, &columns)?),
                OutputFormat::Null | OutputFormat::All => Box::new(NullFormat),
            };
            if let Some(path) = formatter.path() {
                tracing::debug!(path = %path.display(), "Formatter created");
            }
            formatters.push(formatter);
        }

        Ok(Self {
            columns,
            formatters: Mutex::new(formatters),
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn append(&self, rows: &[Row]) -> ExtractResult<()> {
        let mut formatters = self
            .formatters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for formatter in formatters.iter_mut() {
            formatter.append(rows)?;
        }
        Ok(())
    }

    /// Output files written by this table
    pub fn paths(&self) -> Vec<PathBuf> {
        self.formatters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter_map(|f| f.path().map(Path::to_path_buf))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::Cell;
    use tempfile::TempDir;

    fn columns() -> Vec<Column> {
        vec![
            Column::nominal("class", vec!["bart".to_string(), "homer".to_string()]),
            Column::real("shirt"),
        ]
    }

    fn row(label: &str, value: f64) -> Row {
        Row {
            label: label.to_string(),
            values: vec![Cell::Real(value)],
        }
    }

    #[test]
    fn test_arff_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("features");
        let mut arff = ArffFormat::create(&base, &columns(), "simpsons").unwrap();
        arff.append(&[row("bart", 12.5)]).unwrap();

        let content = std::fs::read_to_string(dir.path().join("features.arff")).unwrap();
        assert_eq!(
            content,
            "@relation simpsons\n@attribute class {bart,homer}\n@attribute shirt real\n@data\nbart,12.5\n"
        );
    }

    #[test]
    fn test_csv_header_and_quoting() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("features");
        let mut csv = CsvFormat::create(&base, &columns()).unwrap();
        csv.append(&[row("bart", 1.0), row("a,b", 2.0)]).unwrap();

        let content = std::fs::read_to_string(dir.path().join("features.csv")).unwrap();
        assert_eq!(content, "class,shirt\nbart,1\n\"a,b\",2\n");
    }

    #[test]
    fn test_all_format_requires_relation_name() {
        let dir = TempDir::new().unwrap();
        let options = FeatureOutputOptions {
            output: dir.path().join("features"),
            format: OutputFormat::All,
            relation_name: None,
        };
        assert!(matches!(
            FeatureTable::create(&options, columns()),
            Err(ExtractError::Config(_))
        ));
    }

    #[test]
    fn test_null_format_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let options = FeatureOutputOptions {
            output: dir.path().join("features"),
            format: OutputFormat::Null,
            relation_name: None,
        };
        let table = FeatureTable::create(&options, columns()).unwrap();
        table.append(&[row("bart", 3.0)]).unwrap();
        assert!(table.paths().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
