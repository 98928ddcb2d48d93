//! CSV loading of the flat race-results table

use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::models::{RaceRecord, StandingsSnapshot};

/// Columns the pipeline cannot run without
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "driverId",
    "constructorId",
    "raceId",
    "circuitId",
    "year",
    "grid",
    "positionOrder",
    "laps",
    "resultPoints",
];

/// Historical race results, loaded once per run
///
/// Keeps the original frame so that output tables can carry every input
/// column, alongside typed records for feature computation.
#[derive(Debug, Clone)]
pub struct Dataset {
    frame: DataFrame,
    records: Vec<RaceRecord>,
    driver_names: HashMap<u32, String>,
}

impl Dataset {
    /// Load and validate a flat results CSV
    pub fn load<P: AsRef<Path>>(csv_path: P) -> Result<Self> {
        let csv_path = csv_path.as_ref();
        info!("Loading race results from {:?}", csv_path);

        let frame = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(None)
            .try_into_reader_with_file_path(Some(csv_path.to_path_buf()))?
            .finish()?;

        Self::from_frame(frame)
    }

    /// Build a dataset from an already loaded frame
    ///
    /// Fails before touching any row if a required column is absent.
    pub fn from_frame(frame: DataFrame) -> Result<Self> {
        require_columns(&frame, &REQUIRED_COLUMNS)?;

        let records = frame_to_records(&frame)?;
        let driver_names = driver_names(&frame)?;

        info!(
            "Loaded {} records ({} skipped) across {} seasons",
            records.len(),
            frame.height() - records.len(),
            count_by_year(&records).len()
        );

        Ok(Self {
            frame,
            records,
            driver_names,
        })
    }

    /// Build a dataset from typed records
    ///
    /// Row indices are reassigned to match the generated frame.
    pub fn from_records(mut records: Vec<RaceRecord>) -> Result<Self> {
        for (i, record) in records.iter_mut().enumerate() {
            record.row = Some(i);
        }
        let frame = records_to_frame(&records)?;
        Ok(Self {
            frame,
            records,
            driver_names: HashMap::new(),
        })
    }

    pub fn records(&self) -> &[RaceRecord] {
        &self.records
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Seasons present with their record counts, ascending
    pub fn years(&self) -> Vec<(i32, usize)> {
        count_by_year(&self.records).into_iter().collect()
    }

    pub fn driver_name(&self, driver_id: u32) -> Option<&str> {
        self.driver_names.get(&driver_id).map(String::as_str)
    }

    /// Resolve a roster entry given as a driver id or a "Forename Surname" name
    ///
    /// Ids must belong to a driver with at least one loaded record.
    pub fn resolve_driver(&self, entry: &str) -> Option<u32> {
        let entry = entry.trim();
        if let Ok(id) = entry.parse::<u32>() {
            return self.has_driver(id).then_some(id);
        }
        let wanted = entry.to_lowercase();
        let mut matches: Vec<u32> = self
            .driver_names
            .iter()
            .filter(|(_, name)| name.to_lowercase() == wanted)
            .map(|(id, _)| *id)
            .collect();
        matches.sort_unstable();
        matches.first().copied()
    }

    pub fn has_driver(&self, driver_id: u32) -> bool {
        self.records.iter().any(|r| r.driver_id == driver_id)
    }

    /// Constructor of the driver's most recent recorded race
    pub fn latest_constructor(&self, driver_id: u32) -> Option<u32> {
        self.records
            .iter()
            .filter(|r| r.driver_id == driver_id)
            .max_by_key(|r| r.race_key())
            .map(|r| r.constructor_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Fail with every absent column listed
pub(crate) fn require_columns(frame: &DataFrame, required: &[&str]) -> Result<()> {
    let names = frame.get_column_names();
    let missing: Vec<String> = required
        .iter()
        .filter(|col| !names.contains(*col))
        .map(|col| col.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::MissingColumns(missing))
    }
}

fn count_by_year(records: &[RaceRecord]) -> BTreeMap<i32, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.year).or_insert(0) += 1;
    }
    counts
}

/// Read a column as f64, whatever its inferred type
///
/// Unparseable values (e.g. `\N` markers) become None.
pub(crate) fn float_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    let values = series.f64()?;
    Ok(values
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect())
}

fn optional_float_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    if df.get_column_names().contains(&name) {
        float_column(df, name)
    } else {
        Ok(vec![None; df.height()])
    }
}

pub(crate) fn id_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<u32>>> {
    Ok(float_column(df, name)?
        .into_iter()
        .map(|v| v.filter(|x| *x >= 0.0).map(|x| x as u32))
        .collect())
}

fn optional_string_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    if !df.get_column_names().contains(&name) {
        return Ok(vec![None; df.height()]);
    }
    let series = df.column(name)?.cast(&DataType::String)?;
    let values = series.str()?;
    Ok(values.into_iter().map(|v| v.map(str::to_string)).collect())
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Convert the frame to typed records
///
/// Rows missing an identity column (driver, constructor, race, circuit, year)
/// cannot be placed in time and are skipped.
fn frame_to_records(df: &DataFrame) -> PolarsResult<Vec<RaceRecord>> {
    let driver_col = id_column(df, "driverId")?;
    let constructor_col = id_column(df, "constructorId")?;
    let race_col = id_column(df, "raceId")?;
    let circuit_col = id_column(df, "circuitId")?;
    let year_col = float_column(df, "year")?;
    let grid_col = float_column(df, "grid")?;
    let position_col = float_column(df, "positionOrder")?;
    let laps_col = float_column(df, "laps")?;
    let points_col = float_column(df, "resultPoints")?;
    let round_col = optional_float_column(df, "round")?;
    let date_col = optional_string_column(df, "date")?;
    let driver_points_col = optional_float_column(df, "driverPoints")?;
    let driver_position_col = optional_float_column(df, "driverPosition")?;
    let driver_wins_col = optional_float_column(df, "driverWins")?;
    let constructor_points_col = optional_float_column(df, "constructorPoints")?;
    let constructor_position_col = optional_float_column(df, "constructorPosition")?;
    let constructor_wins_col = optional_float_column(df, "constructorWins")?;

    let mut records = Vec::with_capacity(df.height());
    let mut skipped = 0usize;

    for i in 0..df.height() {
        let (Some(driver_id), Some(constructor_id), Some(race_id), Some(circuit_id), Some(year)) = (
            driver_col[i],
            constructor_col[i],
            race_col[i],
            circuit_col[i],
            year_col[i],
        ) else {
            skipped += 1;
            continue;
        };

        records.push(RaceRecord {
            row: Some(i),
            race_id,
            year: year as i32,
            round: round_col[i].map(|r| r as u32).unwrap_or(0),
            date: date_col[i].as_deref().and_then(parse_date),
            driver_id,
            constructor_id,
            circuit_id,
            grid: grid_col[i],
            position_order: position_col[i],
            laps: laps_col[i],
            result_points: points_col[i],
            standings: StandingsSnapshot {
                driver_points: driver_points_col[i],
                driver_position: driver_position_col[i],
                driver_wins: driver_wins_col[i],
                constructor_points: constructor_points_col[i],
                constructor_position: constructor_position_col[i],
                constructor_wins: constructor_wins_col[i],
            },
        });
    }

    if skipped > 0 {
        warn!("Skipped {} rows with missing identity columns", skipped);
    }

    Ok(records)
}

/// Map driver id -> "Forename Surname" when the name columns are present
fn driver_names(df: &DataFrame) -> PolarsResult<HashMap<u32, String>> {
    let forenames = optional_string_column(df, "driverForename")?;
    let surnames = optional_string_column(df, "driverSurname")?;
    let driver_col = id_column(df, "driverId")?;

    let mut names = HashMap::new();
    for i in 0..df.height() {
        if let (Some(id), Some(first), Some(last)) = (driver_col[i], &forenames[i], &surnames[i]) {
            names
                .entry(id)
                .or_insert_with(|| format!("{} {}", first.trim(), last.trim()));
        }
    }
    Ok(names)
}

/// Build a frame holding the typed columns of each record
pub(crate) fn records_to_frame(records: &[RaceRecord]) -> PolarsResult<DataFrame> {
    fn ints(records: &[RaceRecord], f: impl Fn(&RaceRecord) -> i64) -> Vec<i64> {
        records.iter().map(f).collect()
    }
    fn floats(records: &[RaceRecord], f: impl Fn(&RaceRecord) -> Option<f64>) -> Vec<Option<f64>> {
        records.iter().map(f).collect()
    }

    let dates: Vec<Option<String>> = records
        .iter()
        .map(|r| r.date.map(|d| d.format("%Y-%m-%d").to_string()))
        .collect();

    DataFrame::new(vec![
        Series::new("raceId", ints(records, |r| r.race_id as i64)),
        Series::new("year", ints(records, |r| r.year as i64)),
        Series::new("round", ints(records, |r| r.round as i64)),
        Series::new("date", dates),
        Series::new("circuitId", ints(records, |r| r.circuit_id as i64)),
        Series::new("driverId", ints(records, |r| r.driver_id as i64)),
        Series::new("constructorId", ints(records, |r| r.constructor_id as i64)),
        Series::new("grid", floats(records, |r| r.grid)),
        Series::new("positionOrder", floats(records, |r| r.position_order)),
        Series::new("laps", floats(records, |r| r.laps)),
        Series::new("resultPoints", floats(records, |r| r.result_points)),
        Series::new("driverPoints", floats(records, |r| r.standings.driver_points)),
        Series::new("driverPosition", floats(records, |r| r.standings.driver_position)),
        Series::new("driverWins", floats(records, |r| r.standings.driver_wins)),
        Series::new("constructorPoints", floats(records, |r| r.standings.constructor_points)),
        Series::new(
            "constructorPosition",
            floats(records, |r| r.standings.constructor_position),
        ),
        Series::new("constructorWins", floats(records, |r| r.standings.constructor_wins)),
    ])
}
