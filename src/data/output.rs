//! Prediction table I/O
//!
//! The written table holds every input column of the evaluated rows followed
//! by the prediction columns. The same tables are read back for accuracy
//! scoring.

use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

use crate::data::csv_loader::{float_column, id_column, require_columns, Dataset};
use crate::error::Result;
use crate::models::{PredictionResult, TargetColumn};
use crate::scoring::ScoredRow;

pub const PREDICTED_RANK_COLUMN: &str = "predicted_rank";
pub const PREDICTED_POINTS_COLUMN: &str = "predicted_resultPoints";
pub const PREDICTED_CONSTRUCTOR_POINTS_COLUMN: &str = "predicted_constructorPoints";

/// Columns an accuracy input must carry
pub const SCORED_COLUMNS: [&str; 4] = ["raceId", "year", "positionOrder", "predicted_positionOrder"];

/// Output column of a target's raw regression value
///
/// `resultPoints` and `constructorPoints` share their `predicted_` name with
/// the points derived from the predicted rank, so their raw values get a
/// `_raw` suffix.
pub fn target_output_column(target: TargetColumn) -> String {
    match target {
        TargetColumn::ResultPoints | TargetColumn::ConstructorPoints => {
            format!("{}_raw", target.predicted_column_name())
        }
        _ => target.predicted_column_name(),
    }
}

/// Build the output table, one block of rows per target year in ascending order
pub fn predictions_frame(
    dataset: &Dataset,
    results: &[PredictionResult],
    targets: &[TargetColumn],
) -> Result<DataFrame> {
    let mut by_year: BTreeMap<i32, Vec<&PredictionResult>> = BTreeMap::new();
    for result in results {
        by_year.entry(result.year).or_default().push(result);
    }

    let mut combined: Option<DataFrame> = None;
    for rows in by_year.values() {
        let frame = year_frame(dataset, rows, targets)?;
        match combined.as_mut() {
            Some(acc) => {
                acc.vstack_mut(&frame)?;
            }
            None => combined = Some(frame),
        }
    }

    match combined {
        Some(frame) => Ok(frame),
        None => year_frame(dataset, &[], targets),
    }
}

/// Write the prediction table as CSV
pub fn write_predictions<P: AsRef<Path>>(
    dataset: &Dataset,
    results: &[PredictionResult],
    targets: &[TargetColumn],
    path: P,
) -> Result<()> {
    let path = path.as_ref();
    let mut frame = predictions_frame(dataset, results, targets)?;
    if frame.height() == 0 {
        warn!("No predictions to write; {:?} will only hold a header", path);
    }

    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut frame)?;

    info!("Wrote {} prediction rows to {:?}", frame.height(), path);
    Ok(())
}

/// Read a prediction table back as scored rows
///
/// Rows without a recorded finish or a prediction are skipped.
pub fn read_scored_rows<P: AsRef<Path>>(path: P) -> Result<Vec<ScoredRow>> {
    let path = path.as_ref();
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    require_columns(&frame, &SCORED_COLUMNS)?;

    let race_col = id_column(&frame, "raceId")?;
    let year_col = float_column(&frame, "year")?;
    let actual_col = float_column(&frame, "positionOrder")?;
    let predicted_col = float_column(&frame, "predicted_positionOrder")?;

    let rows: Vec<ScoredRow> = (0..frame.height())
        .filter_map(|i| {
            Some(ScoredRow {
                year: year_col[i]? as i32,
                race_id: race_col[i]?,
                actual: actual_col[i]?,
                predicted: predicted_col[i]?,
            })
        })
        .collect();

    info!("Read {} scored rows from {:?}", rows.len(), path);
    Ok(rows)
}

/// Input columns of one year's evaluated rows plus prediction columns
///
/// Observed rows come first in prediction order, then synthesized ones.
fn year_frame(
    dataset: &Dataset,
    rows: &[&PredictionResult],
    targets: &[TargetColumn],
) -> Result<DataFrame> {
    let source = dataset.frame();
    let (observed, synthesized): (Vec<&PredictionResult>, Vec<&PredictionResult>) =
        rows.iter().copied().partition(|r| r.record.row.is_some());

    let idx: Vec<IdxSize> = observed
        .iter()
        .filter_map(|r| r.record.row)
        .map(|i| i as IdxSize)
        .collect();
    let mut frame = source.take(&IdxCa::from_vec("row", idx))?;

    if !synthesized.is_empty() {
        let synthetic = synthetic_frame(source, &synthesized)?;
        frame.vstack_mut(&synthetic)?;
    }

    let ordered: Vec<&PredictionResult> = observed.into_iter().chain(synthesized).collect();

    for target in targets {
        let values: Vec<Option<f64>> = ordered
            .iter()
            .map(|r| r.predicted.get(target).copied())
            .collect();
        frame.with_column(Series::new(&target_output_column(*target), values))?;
    }

    let ranks: Vec<u32> = ordered.iter().map(|r| r.predicted_rank).collect();
    let points: Vec<u32> = ordered.iter().map(|r| r.predicted_points).collect();
    let constructor: Vec<f64> = ordered
        .iter()
        .map(|r| r.predicted_constructor_points)
        .collect();
    let years: Vec<i64> = ordered.iter().map(|r| r.year as i64).collect();

    frame.with_column(Series::new(PREDICTED_RANK_COLUMN, ranks))?;
    frame.with_column(Series::new(PREDICTED_POINTS_COLUMN, points))?;
    frame.with_column(Series::new(PREDICTED_CONSTRUCTOR_POINTS_COLUMN, constructor))?;
    frame.with_column(Series::new("year", years))?;

    Ok(frame)
}

/// Null rows in the input schema, with identity columns filled in
fn synthetic_frame(source: &DataFrame, rows: &[&PredictionResult]) -> PolarsResult<DataFrame> {
    let mut frame = DataFrame::new(
        source
            .get_columns()
            .iter()
            .map(|c| Series::full_null(c.name(), rows.len(), c.dtype()))
            .collect(),
    )?;

    let identity: [(&str, Vec<i64>); 4] = [
        ("raceId", rows.iter().map(|r| r.record.race_id as i64).collect()),
        ("year", rows.iter().map(|r| r.record.year as i64).collect()),
        ("driverId", rows.iter().map(|r| r.record.driver_id as i64).collect()),
        (
            "constructorId",
            rows.iter().map(|r| r.record.constructor_id as i64).collect(),
        ),
    ];

    for (name, values) in identity {
        let dtype = source.column(name)?.dtype().clone();
        frame.with_column(Series::new(name, values).cast(&dtype)?)?;
    }

    Ok(frame)
}
