//! # Midpoint Manipulation
//!
//! Measurements arrive on their own age and time intervals. Before fitting
//! on a coarse grid they can be moved onto the midpoints of the grid cells
//! they fall in, averaging everything that lands on the same cell.

use crate::grid::AgeTimeGrid;
use crate::inputs::locations::LocationId;
use crate::inputs::table::{TableError, read_numeric_table};
use ndarray::ArrayView1;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

const REQUIRED_COLUMNS: [&str; 8] = [
    "location_id",
    "sex_id",
    "age_lower",
    "age_upper",
    "time_lower",
    "time_upper",
    "meas_value",
    "meas_std",
];

#[derive(Error, Debug)]
pub enum ManipulateError {
    #[error("Could not read the measurement file: {0}")]
    Table(#[from] TableError),
    #[error(
        "The grid is finer than the data: the interval [{lower}, {upper}] overlaps more than one grid cell."
    )]
    FinerGridThanData { lower: f64, upper: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementRow {
    pub location_id: LocationId,
    pub sex_id: i64,
    pub age_lower: f64,
    pub age_upper: f64,
    pub time_lower: f64,
    pub time_upper: f64,
    pub meas_value: f64,
    pub meas_std: f64,
}

/// The span between two neighbouring grid points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub start: f64,
    pub mid: f64,
    pub end: f64,
}

impl Cell {
    fn overlaps(&self, lower: f64, upper: f64) -> bool {
        upper > self.start && lower < self.end
    }
}

pub fn cells_from_axis(points: ArrayView1<'_, f64>) -> Vec<Cell> {
    points
        .windows(2)
        .into_iter()
        .map(|pair| Cell {
            start: pair[0],
            mid: 0.5 * (pair[0] + pair[1]),
            end: pair[1],
        })
        .collect()
}

/// Index of the cell each interval falls in, or `None` when it misses the
/// grid.
///
/// A zero-width interval belongs to the cell whose half-open span
/// `[start, end)` holds it, except that the last cell also holds its end.
fn assign_cells(
    intervals: &[(f64, f64)],
    cells: &[Cell],
) -> Result<Vec<Option<usize>>, ManipulateError> {
    intervals
        .iter()
        .map(|&(lower, upper)| {
            if lower == upper {
                let inside = cells
                    .iter()
                    .position(|cell| cell.start <= lower && lower < cell.end);
                let at_end = cells
                    .last()
                    .filter(|cell| cell.end == lower)
                    .map(|_| cells.len() - 1);
                return Ok(inside.or(at_end));
            }
            let hits: Vec<usize> = cells
                .iter()
                .enumerate()
                .filter(|(_, cell)| cell.overlaps(lower, upper))
                .map(|(idx, _)| idx)
                .collect();
            match hits.as_slice() {
                [] => Ok(None),
                [idx] => Ok(Some(*idx)),
                _ => Err(ManipulateError::FinerGridThanData { lower, upper }),
            }
        })
        .collect()
}

/// Midpoint of the cell each interval overlaps.
pub fn midpoint_assignment(
    intervals: &[(f64, f64)],
    cells: &[Cell],
) -> Result<Vec<Option<f64>>, ManipulateError> {
    Ok(assign_cells(intervals, cells)?
        .into_iter()
        .map(|idx| idx.map(|i| cells[i].mid))
        .collect())
}

/// Moves every row onto the midpoint of its grid cell and averages rows that
/// share a location, sex and cell. Rows outside the grid are dropped.
pub fn midpoint_grid_from_data(
    rows: &[MeasurementRow],
    grid: &AgeTimeGrid,
) -> Result<Vec<MeasurementRow>, ManipulateError> {
    let age_cells = cells_from_axis(grid.ages());
    let time_cells = cells_from_axis(grid.times());
    let age_intervals: Vec<(f64, f64)> = rows.iter().map(|r| (r.age_lower, r.age_upper)).collect();
    let time_intervals: Vec<(f64, f64)> =
        rows.iter().map(|r| (r.time_lower, r.time_upper)).collect();
    let age_hits = assign_cells(&age_intervals, &age_cells)?;
    let time_hits = assign_cells(&time_intervals, &time_cells)?;

    // (sum of values, sum of stds, count)
    let mut groups: BTreeMap<(LocationId, i64, usize, usize), (f64, f64, usize)> = BTreeMap::new();
    let mut dropped = 0usize;
    for ((row, age), time) in rows.iter().zip(age_hits).zip(time_hits) {
        let (Some(age), Some(time)) = (age, time) else {
            dropped += 1;
            continue;
        };
        let entry = groups
            .entry((row.location_id, row.sex_id, age, time))
            .or_insert((0.0, 0.0, 0));
        entry.0 += row.meas_value;
        entry.1 += row.meas_std;
        entry.2 += 1;
    }
    if dropped > 0 {
        log::debug!("Dropped {dropped} measurements outside the grid");
    }

    Ok(groups
        .into_iter()
        .map(|((location_id, sex_id, age, time), (value, std, count))| {
            let n = count as f64;
            let age_mid = age_cells[age].mid;
            let time_mid = time_cells[time].mid;
            MeasurementRow {
                location_id,
                sex_id,
                age_lower: age_mid,
                age_upper: age_mid,
                time_lower: time_mid,
                time_upper: time_mid,
                meas_value: value / n,
                meas_std: std / n,
            }
        })
        .collect())
}

/// Reads and validates a measurement CSV file.
pub fn load_measurements(path: impl AsRef<Path>) -> Result<Vec<MeasurementRow>, ManipulateError> {
    let path = path.as_ref();
    log::info!("Loading measurements from '{}'", path.display());
    let table = read_numeric_table(path, &REQUIRED_COLUMNS)?;
    (0..table.height())
        .map(|i| {
            Ok(MeasurementRow {
                location_id: table.integer(0, i, REQUIRED_COLUMNS[0])?,
                sex_id: table.integer(1, i, REQUIRED_COLUMNS[1])?,
                age_lower: table.value(2, i),
                age_upper: table.value(3, i),
                time_lower: table.value(4, i),
                time_upper: table.value(5, i),
                meas_value: table.value(6, i),
                meas_std: table.value(7, i),
            })
        })
        .collect()
}
