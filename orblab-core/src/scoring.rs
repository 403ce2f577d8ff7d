//! Confluence scorer — weighted factor sum against a regime-dependent gate.

use crate::config::ScoringConfig;
use crate::domain::Direction;
use crate::factors::FactorSet;
use serde::{Deserialize, Serialize};

/// Scorer output for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreVerdict {
    pub direction: Direction,
    pub score: f64,
    pub required: f64,
    pub passes: bool,
}

impl ScoreVerdict {
    /// Headroom above the gate. Used for long/short tie-breaks.
    pub fn margin(&self) -> f64 {
        self.score - self.required
    }
}

/// Compute the confluence score for one direction.
///
/// The required threshold stiffens to `weak_trend_required` when ADX reads
/// the tape as weak; trend-less breakouts need more agreeing evidence.
pub fn compute_score(
    direction: Direction,
    factors: &FactorSet,
    trend_weak: bool,
    config: &ScoringConfig,
) -> ScoreVerdict {
    let weights = config.weights.as_array();
    let activations = factors.as_array();
    let score: f64 = weights
        .iter()
        .zip(activations.iter())
        .map(|(w, f)| w * f)
        .sum();

    let required = if trend_weak {
        config.weak_trend_required
    } else {
        config.base_required
    };

    ScoreVerdict {
        direction,
        score,
        required,
        passes: score >= required,
    }
}

/// Resolve a bar where both directions pass the gate.
///
/// Higher margin wins; a dead tie goes to the configured priority direction.
/// Returns None when neither side passes.
pub fn resolve_direction(
    long: &ScoreVerdict,
    short: &ScoreVerdict,
    priority: Direction,
) -> Option<Direction> {
    match (long.passes, short.passes) {
        (false, false) => None,
        (true, false) => Some(Direction::Long),
        (false, true) => Some(Direction::Short),
        (true, true) => {
            let diff = long.margin() - short.margin();
            if diff > 0.0 {
                Some(Direction::Long)
            } else if diff < 0.0 {
                Some(Direction::Short)
            } else {
                Some(priority)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FactorWeights;

    fn config_with_required(base: f64, weak: f64) -> ScoringConfig {
        ScoringConfig {
            base_required: base,
            weak_trend_required: weak,
            weights: FactorWeights::default(),
            priority: Direction::Long,
        }
    }

    fn factors(rel_vol: f64, price_action: f64, profile: f64) -> FactorSet {
        FactorSet {
            rel_vol,
            price_action,
            profile,
            vwap: 0.0,
            adx: 0.0,
        }
    }

    #[test]
    fn score_is_weighted_sum() {
        let mut config = config_with_required(2.0, 3.0);
        config.weights.rel_vol = 2.0;
        let verdict = compute_score(
            Direction::Long,
            &factors(1.0, 1.0, 0.0),
            false,
            &config,
        );
        assert!((verdict.score - 3.0).abs() < 1e-12);
        assert!(verdict.passes);
    }

    #[test]
    fn weak_trend_raises_the_gate() {
        let config = config_with_required(2.0, 3.0);
        let active = factors(1.0, 1.0, 0.0);

        let strong = compute_score(Direction::Long, &active, false, &config);
        assert!(strong.passes);

        let weak = compute_score(Direction::Long, &active, true, &config);
        assert_eq!(weak.required, 3.0);
        assert!(!weak.passes);
    }

    #[test]
    fn exact_threshold_passes() {
        let config = config_with_required(2.0, 3.0);
        let verdict = compute_score(Direction::Long, &factors(1.0, 1.0, 0.0), false, &config);
        assert_eq!(verdict.score, verdict.required);
        assert!(verdict.passes);
    }

    #[test]
    fn higher_margin_wins_tie() {
        let config = config_with_required(2.0, 3.0);
        let long = compute_score(Direction::Long, &factors(1.0, 1.0, 1.0), false, &config);
        let short = compute_score(Direction::Short, &factors(1.0, 1.0, 0.0), false, &config);
        assert_eq!(
            resolve_direction(&long, &short, Direction::Short),
            Some(Direction::Long)
        );
    }

    #[test]
    fn dead_tie_resolves_by_priority() {
        let config = config_with_required(2.0, 3.0);
        let active = factors(1.0, 1.0, 0.0);
        let long = compute_score(Direction::Long, &active, false, &config);
        let short = compute_score(Direction::Short, &active, false, &config);
        assert_eq!(
            resolve_direction(&long, &short, Direction::Long),
            Some(Direction::Long)
        );
        assert_eq!(
            resolve_direction(&long, &short, Direction::Short),
            Some(Direction::Short)
        );
    }

    #[test]
    fn neither_passing_yields_none() {
        let config = config_with_required(2.0, 3.0);
        let inactive = factors(0.0, 0.0, 0.0);
        let long = compute_score(Direction::Long, &inactive, false, &config);
        let short = compute_score(Direction::Short, &inactive, false, &config);
        assert_eq!(resolve_direction(&long, &short, Direction::Long), None);
    }
}
