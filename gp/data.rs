//! Training data loading.
//!
//! Input is a CSV file with a header row. The column named `y` holds the regression
//! targets; every other column is an input feature, in file order.

use csv::{ReaderBuilder, StringRecord};
use ndarray::{Array1, Array2};
use std::path::Path;
use thiserror::Error;

pub const TARGET_COLUMN: &str = "y";

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error reading CSV input: {0}")]
    CsvError(#[from] csv::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("Row {row} has {found} fields, but the header has {expected}.")]
    RowWidthMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Value '{value}' in column '{column}' (row {row}) is not a number.")]
    NotNumeric {
        column: String,
        row: usize,
        value: String,
    },
    #[error(
        "Non-finite values (NaN or Infinity) were found in column '{0}'. All inputs must be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("The input file contains no data rows.")]
    NoRows,
}

/// Features `x` (`n × p`) and targets `y` (`n`).
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub feature_names: Vec<String>,
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

impl TrainingData {
    pub fn n_samples(&self) -> usize {
        self.y.len()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }
}

pub fn load_training_data(path: impl AsRef<Path>) -> Result<TrainingData, DataError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path.as_ref())?;

    let headers: Vec<String> = rdr.headers()?.iter().map(|s| s.to_string()).collect();
    let target = headers
        .iter()
        .position(|h| h == TARGET_COLUMN)
        .ok_or_else(|| DataError::ColumnNotFound(TARGET_COLUMN.to_string()))?;
    let feature_cols: Vec<usize> = (0..headers.len()).filter(|&c| c != target).collect();

    let mut records = Vec::<StringRecord>::new();
    for (row, rec) in rdr.records().enumerate() {
        let record = rec?;
        if record.len() != headers.len() {
            return Err(DataError::RowWidthMismatch {
                row: row + 1,
                expected: headers.len(),
                found: record.len(),
            });
        }
        records.push(record);
    }
    if records.is_empty() {
        return Err(DataError::NoRows);
    }

    let parse = |row: usize, col: usize| -> Result<f64, DataError> {
        let raw = &records[row][col];
        let value: f64 = raw.parse().map_err(|_| DataError::NotNumeric {
            column: headers[col].clone(),
            row: row + 1,
            value: raw.to_string(),
        })?;
        if !value.is_finite() {
            return Err(DataError::NonFiniteValuesFound(headers[col].clone()));
        }
        Ok(value)
    };

    let n = records.len();
    let mut x = Array2::zeros((n, feature_cols.len()));
    let mut y = Array1::zeros(n);
    for row in 0..n {
        y[row] = parse(row, target)?;
        for (j, &col) in feature_cols.iter().enumerate() {
            x[[row, j]] = parse(row, col)?;
        }
    }

    log::debug!(
        "Loaded {n} rows with {} features from {}",
        feature_cols.len(),
        path.as_ref().display()
    );

    Ok(TrainingData {
        feature_names: feature_cols.iter().map(|&c| headers[c].clone()).collect(),
        x,
        y,
    })
}
