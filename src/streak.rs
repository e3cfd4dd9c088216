use serde::{Deserialize, Serialize};

use crate::domain::TeamResult;

pub fn points_for(result: TeamResult) -> u32 {
    match result {
        TeamResult::Win => 3,
        TeamResult::Draw => 1,
        TeamResult::Loss => 0,
    }
}

/// Weight of the i-th most recent match (i = 0 is the latest).
pub fn recency_weight(i: usize) -> f64 {
    1.0 / (1.0 + i as f64)
}

/// Recency-weighted mean of `values`, ordered most recent first.
pub fn weighted_mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    for (i, v) in values.into_iter().enumerate() {
        let w = recency_weight(i);
        weighted += w * v;
        weight_sum += w;
    }
    if weight_sum <= 0.0 {
        return None;
    }
    Some(weighted / weight_sum)
}

/// Recency-weighted points per game over results ordered most recent first.
pub fn weighted_ppg(results: &[TeamResult]) -> f64 {
    weighted_mean(results.iter().map(|r| points_for(*r) as f64))
        .unwrap_or(0.0)
        .clamp(0.0, 3.0)
}

/// Weighted share of matches (0..=100) satisfying an indicator.
pub fn weighted_pct(flags: impl IntoIterator<Item = bool>) -> f64 {
    weighted_mean(flags.into_iter().map(|f| if f { 100.0 } else { 0.0 }))
        .unwrap_or(0.0)
        .clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak {
    pub result: TeamResult,
    pub length: usize,
}

impl Streak {
    pub fn label(&self) -> String {
        format!("{}{}", self.result.letter(), self.length)
    }
}

/// The run of identical results starting from the most recent match.
pub fn current_streak(results: &[TeamResult]) -> Option<Streak> {
    let first = *results.first()?;
    let length = results.iter().take_while(|r| **r == first).count();
    Some(Streak {
        result: first,
        length,
    })
}

/// Consecutive matches without a loss, counting back from the most recent.
pub fn unbeaten_run(results: &[TeamResult]) -> usize {
    results
        .iter()
        .take_while(|r| **r != TeamResult::Loss)
        .count()
}
