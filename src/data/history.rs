//! Driver History Index
//!
//! Per-driver and per-(driver, circuit) race sequences sorted by race order,
//! so historical features are answered with a binary search instead of
//! re-filtering the whole dataset for every record.

use std::collections::HashMap;

use crate::models::{RaceKey, RaceRecord, StandingsSnapshot};

/// Single historical race entry for a driver
#[derive(Debug, Clone)]
pub struct HistoricalRaceEntry {
    pub key: RaceKey,
    pub circuit_id: u32,
    pub grid: Option<f64>,
    pub position: f64,
    pub standings: StandingsSnapshot,
}

impl HistoricalRaceEntry {
    /// Grid slot minus finishing position (positive = places gained)
    pub fn positions_gained(&self) -> Option<f64> {
        self.grid.map(|g| g - self.position)
    }
}

/// Statistics of a driver at one circuit
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackRecord {
    pub races: usize,
    pub avg_position: Option<f64>,
    pub wins: usize,
    pub podiums: usize,
}

/// Historical results indexed by driver for O(log n) lookup
pub struct DriverHistoryIndex {
    /// driver_id -> past results, sorted by race order ascending
    history: HashMap<u32, Vec<HistoricalRaceEntry>>,
    /// (driver_id, circuit_id) -> past results, sorted by race order ascending
    track_history: HashMap<(u32, u32), Vec<HistoricalRaceEntry>>,
}

impl DriverHistoryIndex {
    /// Index every record with a recorded finishing position
    pub fn build(records: &[RaceRecord]) -> Self {
        let mut history: HashMap<u32, Vec<HistoricalRaceEntry>> = HashMap::new();
        let mut track_history: HashMap<(u32, u32), Vec<HistoricalRaceEntry>> = HashMap::new();

        for record in records {
            // Unclassified rows carry no position to learn from
            let Some(position) = record.position_order else {
                continue;
            };

            let entry = HistoricalRaceEntry {
                key: record.race_key(),
                circuit_id: record.circuit_id,
                grid: record.grid,
                position,
                standings: record.standings,
            };

            track_history
                .entry((record.driver_id, record.circuit_id))
                .or_default()
                .push(entry.clone());
            history.entry(record.driver_id).or_default().push(entry);
        }

        // Stable sort keeps input order for duplicate keys
        for entries in history.values_mut() {
            entries.sort_by_key(|e| e.key);
        }
        for entries in track_history.values_mut() {
            entries.sort_by_key(|e| e.key);
        }

        Self {
            history,
            track_history,
        }
    }

    /// All of a driver's races strictly before `before`, oldest first
    pub fn races_before(&self, driver_id: u32, before: &RaceKey) -> &[HistoricalRaceEntry] {
        self.history
            .get(&driver_id)
            .map(|entries| strictly_before(entries, before))
            .unwrap_or(&[])
    }

    /// The driver's last `limit` races strictly before `before`, oldest first
    pub fn recent_races(
        &self,
        driver_id: u32,
        before: &RaceKey,
        limit: usize,
    ) -> &[HistoricalRaceEntry] {
        let prior = self.races_before(driver_id, before);
        &prior[prior.len().saturating_sub(limit)..]
    }

    /// The driver's most recent race strictly before `before`
    pub fn previous_race(&self, driver_id: u32, before: &RaceKey) -> Option<&HistoricalRaceEntry> {
        self.races_before(driver_id, before).last()
    }

    /// Mean finishing position over the last `window` prior races
    pub fn rolling_avg_position(&self, driver_id: u32, before: &RaceKey, window: usize) -> Option<f64> {
        let recent = self.recent_races(driver_id, before, window);
        mean(recent.iter().map(|e| e.position))
    }

    /// Mean positions gained over the last `window` prior races
    ///
    /// Races without a recorded grid slot are left out of the mean.
    pub fn rolling_avg_gained(&self, driver_id: u32, before: &RaceKey, window: usize) -> Option<f64> {
        let recent = self.recent_races(driver_id, before, window);
        mean(recent.iter().filter_map(|e| e.positions_gained()))
    }

    /// The driver's record at a circuit over every strictly prior race
    pub fn track_record(&self, driver_id: u32, circuit_id: u32, before: &RaceKey) -> TrackRecord {
        let Some(entries) = self.track_history.get(&(driver_id, circuit_id)) else {
            return TrackRecord::default();
        };
        let prior = strictly_before(entries, before);

        TrackRecord {
            races: prior.len(),
            avg_position: mean(prior.iter().map(|e| e.position)),
            wins: prior.iter().filter(|e| e.position == 1.0).count(),
            podiums: prior.iter().filter(|e| e.position <= 3.0).count(),
        }
    }

    /// Number of unique drivers in the index
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

fn strictly_before<'a>(entries: &'a [HistoricalRaceEntry], before: &RaceKey) -> &'a [HistoricalRaceEntry] {
    let end = entries.partition_point(|e| e.key < *before);
    &entries[..end]
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(
        race_id: u32,
        year: i32,
        round: u32,
        driver_id: u32,
        circuit_id: u32,
        grid: f64,
        position: f64,
    ) -> RaceRecord {
        RaceRecord {
            row: None,
            race_id,
            year,
            round,
            date: None,
            driver_id,
            constructor_id: 1,
            circuit_id,
            grid: Some(grid),
            position_order: Some(position),
            laps: Some(50.0),
            result_points: Some(0.0),
            standings: StandingsSnapshot::default(),
        }
    }

    /// Driver 1 finishes 1..=12 in rounds 1..=12 of 2020, starting from grid 5
    fn season() -> Vec<RaceRecord> {
        (1..=12)
            .map(|round| result(100 + round, 2020, round, 1, round % 3, 5.0, round as f64))
            .collect()
    }

    fn key(race_id: u32, year: i32, round: u32) -> RaceKey {
        RaceKey {
            year,
            date: None,
            round,
            race_id,
        }
    }

    /// Naive O(n) definition used to check the indexed answers
    fn naive_rolling(
        records: &[RaceRecord],
        driver_id: u32,
        before: &RaceKey,
        window: usize,
    ) -> Option<f64> {
        let mut prior: Vec<&RaceRecord> = records
            .iter()
            .filter(|r| r.driver_id == driver_id && r.race_key() < *before)
            .collect();
        prior.sort_by_key(|r| r.race_key());
        let recent: Vec<f64> = prior
            .iter()
            .rev()
            .take(window)
            .filter_map(|r| r.position_order)
            .collect();
        if recent.is_empty() {
            None
        } else {
            Some(recent.iter().sum::<f64>() / recent.len() as f64)
        }
    }

    #[test]
    fn test_empty_history() {
        let index = DriverHistoryIndex::build(&[]);
        let k = key(1, 2020, 1);
        assert!(index.is_empty());
        assert!(index.previous_race(1, &k).is_none());
        assert_eq!(index.rolling_avg_position(1, &k, 10), None);
        assert_eq!(index.track_record(1, 1, &k), TrackRecord::default());
    }

    #[test]
    fn test_previous_race_is_strictly_before() {
        let index = DriverHistoryIndex::build(&season());
        let prev = index.previous_race(1, &key(105, 2020, 5)).unwrap();
        assert_eq!(prev.position, 4.0);
        assert!(index.previous_race(1, &key(101, 2020, 1)).is_none());
    }

    #[test]
    fn test_rolling_window_clipped_to_history() {
        let index = DriverHistoryIndex::build(&season());
        // Rounds 1..=3 before round 4
        let avg = index.rolling_avg_position(1, &key(104, 2020, 4), 10).unwrap();
        assert!((avg - 2.0).abs() < 1e-12);
        // Last 10 of rounds 1..=12 before a 2021 race: 3..=12
        let avg = index.rolling_avg_position(1, &key(1, 2021, 1), 10).unwrap();
        assert!((avg - 7.5).abs() < 1e-12);
    }

    #[test]
    fn test_rolling_matches_naive_definition() {
        let mut records = season();
        records.push(result(200, 2019, 4, 1, 2, 3.0, 7.0));
        records.push(result(201, 2019, 5, 2, 2, 3.0, 1.0));
        let index = DriverHistoryIndex::build(&records);

        for record in &records {
            let k = record.race_key();
            for window in [1, 3, 10] {
                assert_eq!(
                    index.rolling_avg_position(record.driver_id, &k, window),
                    naive_rolling(&records, record.driver_id, &k, window)
                );
            }
        }
    }

    #[test]
    fn test_rolling_avg_gained() {
        let index = DriverHistoryIndex::build(&season());
        // Grid 5, positions 1 and 2: gains 4 and 3
        let gained = index.rolling_avg_gained(1, &key(103, 2020, 3), 10).unwrap();
        assert!((gained - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_track_record() {
        let index = DriverHistoryIndex::build(&season());
        // Circuit 1 hosts rounds 1, 4, 7, 10 (round % 3 == 1)
        let track = index.track_record(1, 1, &key(110, 2020, 10));
        assert_eq!(track.races, 3);
        assert_eq!(track.wins, 1);
        assert_eq!(track.podiums, 1);
        assert!((track.avg_position.unwrap() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_undated_later_round_stays_in_the_future() {
        let mut dated = result(402, 2021, 2, 1, 1, 4.0, 3.0);
        dated.date = chrono::NaiveDate::from_ymd_opt(2021, 3, 28);
        // Round 5 with an unparseable date
        let undated = result(405, 2021, 5, 1, 1, 9.0, 17.0);
        let records = vec![dated.clone(), undated.clone()];
        let index = DriverHistoryIndex::build(&records);

        assert!(index.previous_race(1, &dated.race_key()).is_none());
        assert_eq!(index.rolling_avg_position(1, &dated.race_key(), 10), None);
        let prev = index.previous_race(1, &undated.race_key()).unwrap();
        assert_eq!(prev.position, 3.0);
    }

    #[test]
    fn test_same_race_not_visible() {
        let records = vec![
            result(300, 2021, 1, 1, 1, 1.0, 1.0),
            result(300, 2021, 1, 2, 1, 2.0, 2.0),
        ];
        let index = DriverHistoryIndex::build(&records);
        assert!(index.previous_race(1, &key(300, 2021, 1)).is_none());
        assert_eq!(index.len(), 2);
    }
}
