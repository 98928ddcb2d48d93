//! Rank conversion, points table and constructor aggregate

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::models::PredictionResult;

/// Championship points for finishing positions 1..=10
pub const POINTS_TABLE: [u32; 10] = [25, 18, 15, 12, 10, 8, 6, 4, 2, 1];

/// Points awarded for a finishing position (0 outside the top ten)
pub fn calculate_points(position: u32) -> u32 {
    match position {
        1..=10 => POINTS_TABLE[(position - 1) as usize],
        _ => 0,
    }
}

/// Rank values ascending within each race, 1-based
///
/// Ties keep input order ("first" method), so equal predictions never share
/// a rank.
pub fn rank_within_race(race_ids: &[u32], values: &[f64]) -> Vec<u32> {
    let mut by_race: HashMap<u32, Vec<usize>> = HashMap::new();
    for (i, race_id) in race_ids.iter().enumerate() {
        by_race.entry(*race_id).or_default().push(i);
    }

    let mut ranks = vec![0u32; race_ids.len()];
    for mut members in by_race.into_values() {
        // Stable sort: members are in input order already
        members.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        for (pos, idx) in members.into_iter().enumerate() {
            ranks[idx] = pos as u32 + 1;
        }
    }
    ranks
}

/// Grouping used for the predicted constructor points sum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructorScope {
    /// Sum over the constructor's drivers in the same race
    #[default]
    Race,
    /// Sum over the constructor's drivers across the whole evaluated season
    Season,
}

impl fmt::Display for ConstructorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructorScope::Race => write!(f, "race"),
            ConstructorScope::Season => write!(f, "season"),
        }
    }
}

impl FromStr for ConstructorScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "race" => Ok(ConstructorScope::Race),
            "season" | "year" => Ok(ConstructorScope::Season),
            other => Err(format!("Unknown constructor scope: {}", other)),
        }
    }
}

/// Sum of points per constructor group, aligned with the input rows
pub fn constructor_points(
    race_ids: &[u32],
    constructor_ids: &[u32],
    points: &[u32],
    scope: ConstructorScope,
) -> Vec<f64> {
    let group = |i: usize| match scope {
        ConstructorScope::Race => (Some(race_ids[i]), constructor_ids[i]),
        ConstructorScope::Season => (None, constructor_ids[i]),
    };

    let mut totals: HashMap<(Option<u32>, u32), u32> = HashMap::new();
    for (i, p) in points.iter().enumerate() {
        *totals.entry(group(i)).or_insert(0) += p;
    }

    (0..points.len())
        .map(|i| totals.get(&group(i)).copied().unwrap_or(0) as f64)
        .collect()
}

/// Fill rank, points and constructor points of one year's predictions
///
/// Rows without a `positionOrder` prediction are ranked last in their race.
pub fn score_predictions(results: &mut [PredictionResult], scope: ConstructorScope) {
    let race_ids: Vec<u32> = results.iter().map(|r| r.record.race_id).collect();
    let values: Vec<f64> = results
        .iter()
        .map(|r| r.predicted_position().unwrap_or(f64::INFINITY))
        .collect();

    let ranks = rank_within_race(&race_ids, &values);
    let points: Vec<u32> = ranks.iter().map(|&rank| calculate_points(rank)).collect();
    let constructor_ids: Vec<u32> = results.iter().map(|r| r.record.constructor_id).collect();
    let totals = constructor_points(&race_ids, &constructor_ids, &points, scope);

    for (i, result) in results.iter_mut().enumerate() {
        result.predicted_rank = ranks[i];
        result.predicted_points = points[i];
        result.predicted_constructor_points = totals[i];
    }
}
