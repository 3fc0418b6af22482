//! # Mortality Data
//!
//! Observed other-cause mortality, one row per location and age/time
//! rectangle. Used only when omega is constrained rather than estimated.
//!
//! Files are comma-separated with the columns `location_id`, `age_lower`,
//! `age_upper`, `time_lower`, `time_upper` and `meas_value`. Every column is
//! required, numeric and free of missing or non-finite values.

use crate::inputs::locations::LocationId;
use crate::inputs::table::{TableError, read_numeric_table};
use crate::interpolate::RectangularRow;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

const REQUIRED_COLUMNS: [&str; 6] = [
    "location_id",
    "age_lower",
    "age_upper",
    "time_lower",
    "time_upper",
    "meas_value",
];

#[derive(Error, Debug)]
pub enum MortalityError {
    #[error("Could not read the mortality file: {0}")]
    Table(#[from] TableError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MortalityRow {
    pub location_id: LocationId,
    pub age_lower: f64,
    pub age_upper: f64,
    pub time_lower: f64,
    pub time_upper: f64,
    pub value: f64,
}

impl MortalityRow {
    pub fn rectangle(&self) -> RectangularRow {
        RectangularRow {
            age_lower: self.age_lower,
            age_upper: self.age_upper,
            time_lower: self.time_lower,
            time_upper: self.time_upper,
            value: self.value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MortalityTable {
    rows: Vec<MortalityRow>,
}

impl MortalityTable {
    pub fn new(rows: Vec<MortalityRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[MortalityRow] {
        &self.rows
    }

    /// The rectangles observed for one location, in file order.
    pub fn for_location(&self, location: LocationId) -> Vec<RectangularRow> {
        self.rows
            .iter()
            .filter(|row| row.location_id == location)
            .map(MortalityRow::rectangle)
            .collect()
    }

    pub fn locations(&self) -> BTreeSet<LocationId> {
        self.rows.iter().map(|row| row.location_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Reads and validates a mortality CSV file.
pub fn load_mortality_table(path: impl AsRef<Path>) -> Result<MortalityTable, MortalityError> {
    let path = path.as_ref();
    log::info!("Loading mortality data from '{}'", path.display());

    let table = read_numeric_table(path, &REQUIRED_COLUMNS)?;
    let mut rows = Vec::with_capacity(table.height());
    for i in 0..table.height() {
        rows.push(MortalityRow {
            location_id: table.integer(0, i, REQUIRED_COLUMNS[0])?,
            age_lower: table.value(1, i),
            age_upper: table.value(2, i),
            time_lower: table.value(3, i),
            time_upper: table.value(4, i),
            value: table.value(5, i),
        });
    }
    log::info!("Loaded {} mortality rows", rows.len());
    Ok(MortalityTable::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_csv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn mortality_rows_load_and_split_by_location() {
        let file = create_test_csv(
            "location_id,age_lower,age_upper,time_lower,time_upper,meas_value\n\
             70,0,1,2000,2001,0.01\n\
             70,1,5,2000,2001,0.02\n\
             71,0,5,2000,2001,0.03",
        )
        .unwrap();
        let table = load_mortality_table(file.path()).unwrap();
        assert_eq!(table.rows().len(), 3);
        assert_eq!(table.locations().into_iter().collect::<Vec<_>>(), vec![70, 71]);
        let parent = table.for_location(70);
        assert_eq!(parent.len(), 2);
        assert_abs_diff_eq!(parent[1].value, 0.02, epsilon = 1e-12);
        assert!(table.for_location(5).is_empty());
    }

    #[test]
    fn missing_columns_are_reported() {
        let file = create_test_csv("location_id,age_lower,age_upper,time_lower,time_upper\n70,0,1,2000,2001").unwrap();
        match load_mortality_table(file.path()).unwrap_err() {
            MortalityError::Table(TableError::ColumnNotFound(col)) => assert_eq!(col, "meas_value"),
            other => panic!("Expected ColumnNotFound(meas_value), got {:?}", other),
        }
    }

    #[test]
    fn non_integer_locations_are_rejected() {
        let file = create_test_csv(
            "location_id,age_lower,age_upper,time_lower,time_upper,meas_value\n70.5,0,1,2000,2001,0.01",
        )
        .unwrap();
        assert!(matches!(
            load_mortality_table(file.path()),
            Err(MortalityError::Table(TableError::NonIntegerValue { .. }))
        ));
    }
}
