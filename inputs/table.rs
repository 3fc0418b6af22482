//! Numeric CSV tables read through polars, validated column by column.

use polars::prelude::*;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The required column '{0}' was not found in the input file.")]
    ColumnNotFound(String),
    #[error("The column '{column_name}' must be numeric but has type {found_type}.")]
    ColumnWrongType {
        column_name: String,
        found_type: String,
    },
    #[error("Missing values were found in the column '{0}'.")]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error("Column '{column_name}' holds {value}, which is not an integer.")]
    NonIntegerValue { column_name: String, value: f64 },
}

/// The `required` columns of a CSV file, in the order asked for.
pub(crate) struct NumericTable {
    columns: Vec<Vec<f64>>,
    height: usize,
}

impl NumericTable {
    pub(crate) fn height(&self) -> usize {
        self.height
    }

    pub(crate) fn value(&self, column: usize, row: usize) -> f64 {
        self.columns[column][row]
    }

    /// Reads a column that must hold whole numbers, such as an id.
    pub(crate) fn integer(
        &self,
        column: usize,
        row: usize,
        column_name: &str,
    ) -> Result<i64, TableError> {
        let value = self.columns[column][row];
        if value.fract() != 0.0 {
            return Err(TableError::NonIntegerValue {
                column_name: column_name.to_string(),
                value,
            });
        }
        Ok(value as i64)
    }
}

pub(crate) fn read_numeric_table(
    path: &Path,
    required: &[&str],
) -> Result<NumericTable, TableError> {
    let df = CsvReader::new(File::open(path)?)
        .with_options(CsvReadOptions::default().with_has_header(true))
        .finish()?;

    let names: BTreeSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for column in required {
        if !names.contains(*column) {
            return Err(TableError::ColumnNotFound(column.to_string()));
        }
    }

    let columns = required
        .iter()
        .map(|column| extract_numeric_column(&df, column))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(NumericTable {
        columns,
        height: df.height(),
    })
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, TableError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(TableError::MissingValuesFound(column_name.to_string()));
    }
    let casted = series
        .cast(&DataType::Float64)
        .map_err(|_| TableError::ColumnWrongType {
            column_name: column_name.to_string(),
            found_type: format!("{:?}", series.dtype()),
        })?;
    // A failed non-strict cast shows up as new nulls.
    if casted.null_count() > 0 {
        return Err(TableError::ColumnWrongType {
            column_name: column_name.to_string(),
            found_type: format!("{:?}", series.dtype()),
        });
    }
    let chunked = casted.f64()?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(TableError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}
