//! CSV base tables for the in-memory catalog.
//!
//! Headers name the columns. A column is `Int64` if every non-empty cell
//! parses as an integer, `Float64` if every one parses as a number, `Boolean`
//! for `true`/`false`, and `Utf8` otherwise. Empty cells are null.

use std::io::Read;
use std::path::Path;

use sitewise_core::schema::DataType;
use sitewise_core::types::{Column, RowBatch, Scalar};

use crate::context::TableCatalog;
use crate::runtime::{ExecError, Result};

pub fn read_csv<R: Read>(reader: R) -> Result<RowBatch> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers: Vec<String> = rdr
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();
    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in rdr.records() {
        let record = record.map_err(csv_error)?;
        for (col, cell) in cells.iter_mut().zip(record.iter()) {
            col.push(cell.to_string());
        }
    }
    let columns = headers
        .into_iter()
        .zip(cells)
        .map(|(name, raw)| typed_column(name, &raw))
        .collect();
    Ok(RowBatch::new(columns)?)
}

fn typed_column(name: String, raw: &[String]) -> Column {
    let present = || raw.iter().filter(|c| !c.is_empty());
    let data_type = if present().all(|c| c.parse::<i64>().is_ok()) {
        DataType::Int64
    } else if present().all(|c| c.parse::<f64>().is_ok()) {
        DataType::Float64
    } else if present().all(|c| c == "true" || c == "false") {
        DataType::Boolean
    } else {
        DataType::Utf8
    };
    let values = raw
        .iter()
        .map(|c| match (c.is_empty(), data_type) {
            (true, _) => Scalar::Null,
            (false, DataType::Int64) => c.parse().map(Scalar::I64).unwrap_or(Scalar::Null),
            (false, DataType::Float64) => c.parse().map(Scalar::F64).unwrap_or(Scalar::Null),
            (false, DataType::Boolean) => Scalar::Bool(c == "true"),
            (false, _) => Scalar::Str(c.clone()),
        })
        .collect();
    Column::new(name, data_type, values)
}

fn csv_error(e: csv::Error) -> ExecError {
    ExecError::Load(e.to_string())
}

impl TableCatalog {
    /// Load every `<name>.csv` in `dir` as table `name`. Returns the count.
    pub fn load_dir(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let table = read_csv(std::fs::File::open(&path)?)?;
            tracing::info!(table = name, rows = table.num_rows(), "loaded table");
            self.insert(name, table);
            loaded += 1;
        }
        Ok(loaded)
    }
}
