use serde::{Deserialize, Serialize};

pub const MAX_GOALS: usize = 10;
pub const TOP_SCORES: usize = 3;

/// P(k; λ) for k in 0..=max_k, built iteratively from P(0) = e^-λ.
pub fn poisson_pmf(lambda: f64, max_k: usize) -> Vec<f64> {
    let lambda = if lambda.is_finite() { lambda.max(0.0) } else { 0.0 };
    let mut out = vec![0.0; max_k + 1];
    out[0] = (-lambda).exp();
    for k in 1..=max_k {
        out[k] = out[k - 1] * lambda / k as f64;
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreProb {
    pub home: u8,
    pub away: u8,
    /// Percentage of the grid's mass, 0..=100.
    pub pct: f64,
}

impl ScoreProb {
    pub fn label(&self) -> String {
        format!("{}-{}", self.home, self.away)
    }
}

/// Outer product of two truncated pmfs, kept unnormalised; every query
/// divides by the grid's own total mass.
#[derive(Debug, Clone)]
pub struct ScoreGrid {
    cells: Vec<Vec<f64>>,
    mass: f64,
}

impl ScoreGrid {
    pub fn new(lambda_home: f64, lambda_away: f64) -> Self {
        Self::with_max_goals(lambda_home, lambda_away, MAX_GOALS)
    }

    pub fn with_max_goals(lambda_home: f64, lambda_away: f64, max_goals: usize) -> Self {
        let pmf_h = poisson_pmf(lambda_home, max_goals);
        let pmf_a = poisson_pmf(lambda_away, max_goals);
        let cells = pmf_h
            .iter()
            .map(|p_h| pmf_a.iter().map(|p_a| p_h * p_a).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let mass = cells.iter().flatten().sum::<f64>();
        Self { cells, mass }
    }

    /// Normalised probability of an exact score, 0..=1.
    pub fn prob(&self, home: usize, away: usize) -> f64 {
        if self.mass <= 0.0 {
            return 0.0;
        }
        self.cells
            .get(home)
            .and_then(|row| row.get(away))
            .map_or(0.0, |p| p / self.mass)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.cells.iter().enumerate().flat_map(move |(h, row)| {
            row.iter()
                .enumerate()
                .map(move |(a, p)| (h, a, if self.mass > 0.0 { p / self.mass } else { 0.0 }))
        })
    }

    /// Highest-probability scores, descending; ties broken by fewer total goals then home goals.
    pub fn top_scores(&self, n: usize) -> Vec<ScoreProb> {
        let mut all = self.iter().collect::<Vec<_>>();
        all.sort_by(|x, y| {
            y.2.total_cmp(&x.2)
                .then_with(|| (x.0 + x.1).cmp(&(y.0 + y.1)))
                .then_with(|| x.0.cmp(&y.0))
        });
        all.into_iter()
            .take(n)
            .map(|(h, a, p)| ScoreProb {
                home: h as u8,
                away: a as u8,
                pct: p * 100.0,
            })
            .collect()
    }

    /// P(total goals > line): one minus the mass of cells at or under the line.
    pub fn over(&self, line: f64) -> f64 {
        let under = self
            .iter()
            .filter(|(h, a, _)| ((h + a) as f64) <= line)
            .map(|(_, _, p)| p)
            .sum::<f64>();
        (1.0 - under).clamp(0.0, 1.0)
    }

    pub fn both_score(&self) -> f64 {
        self.iter()
            .filter(|(h, a, _)| *h > 0 && *a > 0)
            .map(|(_, _, p)| p)
            .sum()
    }

    /// (home win, draw, away win), each 0..=1.
    pub fn outcome_probs(&self) -> (f64, f64, f64) {
        let mut home = 0.0;
        let mut draw = 0.0;
        let mut away = 0.0;
        for (h, a, p) in self.iter() {
            if h > a {
                home += p;
            } else if h < a {
                away += p;
            } else {
                draw += p;
            }
        }
        (home, draw, away)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::*;

    #[test]
    fn pmf_matches_closed_form() {
        let pmf = poisson_pmf(1.0, 4);
        assert_float_relative_eq!(pmf[0], 0.36787944117144233);
        assert_float_relative_eq!(pmf[1], 0.36787944117144233);
        assert_float_relative_eq!(pmf[2], 0.18393972058572117);
        let pmf = poisson_pmf(2.5, 0);
        assert_float_relative_eq!(pmf[0], 0.0820849986238988);
    }

    #[test]
    fn grid_is_normalised() {
        let grid = ScoreGrid::new(1.7, 0.9);
        assert_eq!(grid.iter().count(), 121);
        let total = grid.iter().map(|(_, _, p)| p).sum::<f64>();
        assert_float_absolute_eq!(total, 1.0, 1e-12);
        let (h, d, a) = grid.outcome_probs();
        assert_float_absolute_eq!(h + d + a, 1.0, 1e-12);
        assert!(h > a);
    }

    #[test]
    fn top_scores_are_ranked() {
        let grid = ScoreGrid::new(1.5, 1.5);
        let top = grid.top_scores(TOP_SCORES);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].label(), "1-1");
        assert!(top[0].pct >= top[1].pct && top[1].pct >= top[2].pct);
        // 1-2 and 2-1 tie exactly; fewer home goals first.
        assert_eq!((top[1].home, top[1].away), (1, 2));
        assert_eq!((top[2].home, top[2].away), (2, 1));
    }

    #[test]
    fn over_lines_use_grid_mass() {
        let grid = ScoreGrid::new(1.5, 1.5);
        let over_2_5 = grid.over(2.5);
        // Total goals ~ Poisson(3): P(X <= 2) = e^-3 (1 + 3 + 4.5).
        let expected = 1.0 - (-3.0f64).exp() * 8.5;
        assert_float_absolute_eq!(over_2_5, expected, 1e-4);
        assert!(grid.over(1.5) > over_2_5);
        assert!(over_2_5 > grid.over(3.5));
    }

    #[test]
    fn zero_lambda_puts_all_mass_on_nil_nil() {
        let grid = ScoreGrid::new(0.0, 0.0);
        assert_float_absolute_eq!(grid.prob(0, 0), 1.0);
        assert_float_absolute_eq!(grid.over(0.5), 0.0);
    }
}
