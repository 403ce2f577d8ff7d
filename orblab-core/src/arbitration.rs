//! Signal arbitration — ranking concurrent playbook candidates.
//!
//! Priority is a weighted sum over five factors: regime alignment, hourly
//! expectancy, strength percentile, capital efficiency, and correlation
//! contribution. Ties break by raw strength, then by playbook registration
//! order (stable). An optional cross-entropy filter drops redundant
//! mean-reversion candidates before scoring; optional weight learning nudges
//! the factor weights after each completed arbitrated trade. With learning
//! off, the scoring path is identical to static weights.

use crate::config::{ArbitratorConfig, ArbitratorWeights};
use crate::playbooks::{CandidateSignal, PlaybookKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Factor scores for one candidate, before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityBreakdown {
    pub regime_alignment: f64,
    pub hourly_expectancy: f64,
    pub strength_percentile: f64,
    pub capital_efficiency: f64,
    pub correlation_contribution: f64,
}

impl PriorityBreakdown {
    pub fn weighted(&self, weights: &ArbitratorWeights) -> f64 {
        weights.regime_alignment * self.regime_alignment
            + weights.hourly_expectancy * self.hourly_expectancy
            + weights.strength_percentile * self.strength_percentile
            + weights.capital_efficiency * self.capital_efficiency
            + weights.correlation_contribution * self.correlation_contribution
    }
}

/// A candidate with its priority scoring attached.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: CandidateSignal,
    /// Registration index of the emitting playbook (stable tie-break).
    pub playbook_order: usize,
    pub priority: f64,
    pub breakdown: PriorityBreakdown,
}

/// Outcome of one arbitration round.
#[derive(Debug, Clone)]
pub struct ArbitrationDecision {
    /// Winners, at most `max_simultaneous_signals`, best first.
    pub selected: Vec<ScoredCandidate>,
    /// Losers, recorded but never executed.
    pub rejected: Vec<ScoredCandidate>,
}

/// Pairwise playbook correlations, symmetric lookup.
#[derive(Debug, Clone, Default)]
pub struct CorrelationMatrix {
    entries: BTreeMap<(String, String), f64>,
}

impl CorrelationMatrix {
    /// Estimated correlations between the built-in playbooks: the two
    /// mean-reversion books overlap heavily, momentum is near-orthogonal to
    /// both.
    pub fn with_defaults() -> Self {
        let mut matrix = Self::default();
        matrix.set("ib_fade", "vwap_magnet", 0.65);
        matrix.set("ib_fade", "momentum_continuation", 0.15);
        matrix.set("ib_fade", "opening_drive_reversal", 0.35);
        matrix.set("vwap_magnet", "momentum_continuation", 0.10);
        matrix.set("vwap_magnet", "opening_drive_reversal", 0.40);
        matrix.set("momentum_continuation", "opening_drive_reversal", 0.05);
        matrix
    }

    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    pub fn set(&mut self, a: &str, b: &str, correlation: f64) {
        self.entries.insert(Self::key(a, b), correlation);
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        self.entries.get(&Self::key(a, b)).copied()
    }
}

/// Expected holding time per playbook, for the capital-efficiency prior.
fn expected_bars(playbook: &str) -> f64 {
    match playbook {
        "ib_fade" => 30.0,
        "vwap_magnet" => 20.0,
        "momentum_continuation" => 50.0,
        "opening_drive_reversal" => 15.0,
        _ => 30.0,
    }
}

#[derive(Debug, Clone)]
pub struct Arbitrator {
    config: ArbitratorConfig,
    weights: ArbitratorWeights,
    /// (playbook, hour) → (sum of realized R, sample count).
    hour_stats: BTreeMap<(String, u32), (f64, u32)>,
    strength_history: BTreeMap<String, Vec<f64>>,
    weight_updates: u32,
}

impl Arbitrator {
    pub fn new(config: ArbitratorConfig) -> Self {
        let weights = config.weights;
        Self {
            config,
            weights,
            hour_stats: BTreeMap::new(),
            strength_history: BTreeMap::new(),
            weight_updates: 0,
        }
    }

    pub fn weights(&self) -> &ArbitratorWeights {
        &self.weights
    }

    pub fn weight_updates(&self) -> u32 {
        self.weight_updates
    }

    /// Rank candidates and pick the winners.
    ///
    /// `candidates` carry their playbook registration index; `open_playbooks`
    /// are the books behind currently open positions.
    pub fn arbitrate(
        &mut self,
        candidates: Vec<(usize, CandidateSignal)>,
        hour: u32,
        open_playbooks: &[String],
        correlations: &CorrelationMatrix,
    ) -> Option<ArbitrationDecision> {
        if candidates.is_empty() {
            return None;
        }

        let candidates = if self.config.cross_entropy_filter {
            self.filter_redundant(candidates)
        } else {
            candidates
        };

        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|(playbook_order, candidate)| {
                let breakdown = self.score(&candidate, hour, open_playbooks, correlations);
                let priority = breakdown.weighted(&self.weights);
                debug!(
                    playbook = candidate.playbook,
                    priority, "arbitration candidate scored"
                );
                ScoredCandidate {
                    candidate,
                    playbook_order,
                    priority,
                    breakdown,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .expect("priorities are finite")
                .then(
                    b.candidate
                        .strength
                        .partial_cmp(&a.candidate.strength)
                        .expect("strengths are finite"),
                )
                .then(a.playbook_order.cmp(&b.playbook_order))
        });

        let keep = self.config.max_simultaneous_signals.min(scored.len());
        let rejected = scored.split_off(keep);
        for winner in &scored {
            self.strength_history
                .entry(winner.candidate.playbook.to_string())
                .or_default()
                .push(winner.candidate.strength);
        }
        if !rejected.is_empty() {
            info!(
                winner = scored[0].candidate.playbook,
                rejected = rejected.len(),
                "arbitration resolved"
            );
        }

        Some(ArbitrationDecision {
            selected: scored,
            rejected,
        })
    }

    /// Drop redundant mean-reversion candidates: same-direction twins with
    /// near-identical entry and risk keep only the strongest.
    fn filter_redundant(
        &self,
        candidates: Vec<(usize, CandidateSignal)>,
    ) -> Vec<(usize, CandidateSignal)> {
        let mut kept: Vec<(usize, CandidateSignal)> = Vec::with_capacity(candidates.len());
        for (order, candidate) in candidates {
            let redundant = candidate.kind == PlaybookKind::MeanReversion
                && kept.iter().any(|(_, other)| {
                    other.kind == PlaybookKind::MeanReversion
                        && similarity(&candidate, other) > self.config.similarity_threshold
                        && candidate.strength <= other.strength
                });
            if redundant {
                debug!(playbook = candidate.playbook, "dropped as redundant exposure");
            } else {
                kept.push((order, candidate));
            }
        }
        kept
    }

    fn score(
        &self,
        candidate: &CandidateSignal,
        hour: u32,
        open_playbooks: &[String],
        correlations: &CorrelationMatrix,
    ) -> PriorityBreakdown {
        PriorityBreakdown {
            regime_alignment: candidate.regime_alignment,
            hourly_expectancy: self.hourly_expectancy(candidate.playbook, hour),
            strength_percentile: self.strength_percentile(candidate.playbook, candidate.strength),
            capital_efficiency: capital_efficiency(candidate),
            correlation_contribution: correlation_contribution(
                candidate,
                open_playbooks,
                correlations,
            ),
        }
    }

    /// Mean realized R for this playbook in this hour, mapped from the
    /// [-0.5, 0.5] expectancy band onto [0, 1]. Neutral until data exists.
    fn hourly_expectancy(&self, playbook: &str, hour: u32) -> f64 {
        match self.hour_stats.get(&(playbook.to_string(), hour)) {
            Some((sum, count)) if *count > 0 => {
                let mean = sum / *count as f64;
                (mean + 0.5).clamp(0.0, 1.0)
            }
            _ => 0.5,
        }
    }

    /// Empirical CDF position of `strength` in the playbook's own history.
    /// Neutral below ten samples.
    fn strength_percentile(&self, playbook: &str, strength: f64) -> f64 {
        match self.strength_history.get(playbook) {
            Some(history) if history.len() >= 10 => {
                let below = history.iter().filter(|s| **s <= strength).count();
                below as f64 / history.len() as f64
            }
            _ => 0.5,
        }
    }

    /// Feed a completed arbitrated trade back into the factor history and,
    /// when enabled, the weights.
    pub fn record_outcome(
        &mut self,
        playbook: &str,
        hour: u32,
        breakdown: &PriorityBreakdown,
        expected_r: f64,
        realized_r: f64,
    ) {
        let entry = self
            .hour_stats
            .entry((playbook.to_string(), hour))
            .or_insert((0.0, 0));
        entry.0 += realized_r;
        entry.1 += 1;

        if !self.config.weight_learning {
            return;
        }
        let error = realized_r - expected_r;
        if error.abs() <= 0.1 {
            return;
        }

        let rate = self.config.learning_rate;
        self.weights.regime_alignment += rate * error * breakdown.regime_alignment;
        self.weights.hourly_expectancy += rate * error * breakdown.hourly_expectancy;
        self.weights.strength_percentile += rate * error * breakdown.strength_percentile;
        self.weights.capital_efficiency += rate * error * breakdown.capital_efficiency;
        self.weights.correlation_contribution += rate * error * breakdown.correlation_contribution;

        // Weights stay a simplex: floor at zero, renormalize to sum 1.
        self.weights.regime_alignment = self.weights.regime_alignment.max(0.0);
        self.weights.hourly_expectancy = self.weights.hourly_expectancy.max(0.0);
        self.weights.strength_percentile = self.weights.strength_percentile.max(0.0);
        self.weights.capital_efficiency = self.weights.capital_efficiency.max(0.0);
        self.weights.correlation_contribution = self.weights.correlation_contribution.max(0.0);
        let total = self.weights.sum();
        if total > 0.0 {
            self.weights.regime_alignment /= total;
            self.weights.hourly_expectancy /= total;
            self.weights.strength_percentile /= total;
            self.weights.capital_efficiency /= total;
            self.weights.correlation_contribution /= total;
        } else {
            self.weights = self.config.weights;
        }
        self.weight_updates += 1;
        debug!(updates = self.weight_updates, "arbitrator weights adjusted");
    }
}

/// Expected R per bar from the first target, normalized against a 0.1 R/bar
/// ceiling.
fn capital_efficiency(candidate: &CandidateSignal) -> f64 {
    let bars = expected_bars(candidate.playbook);
    let r_per_bar = candidate.expected_r() / bars;
    (r_per_bar / 0.1).clamp(0.0, 1.0)
}

/// Diversification score against open positions: 1 with an empty book,
/// neutral 0.5 when correlations are unknown, otherwise the inverted mean
/// correlation mapped onto [0, 1].
fn correlation_contribution(
    candidate: &CandidateSignal,
    open_playbooks: &[String],
    correlations: &CorrelationMatrix,
) -> f64 {
    if open_playbooks.is_empty() {
        return 1.0;
    }
    let known: Vec<f64> = open_playbooks
        .iter()
        .filter_map(|open| correlations.get(candidate.playbook, open))
        .collect();
    if known.is_empty() {
        return 0.5;
    }
    let mean = known.iter().sum::<f64>() / known.len() as f64;
    (1.0 - (mean + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Structural similarity of two candidates: direction, entry proximity
/// (within 0.5%), and stop-distance proximity (within 30%).
fn similarity(a: &CandidateSignal, b: &CandidateSignal) -> f64 {
    let direction = if a.direction == b.direction { 1.0 } else { 0.0 };
    let price_diff = (a.entry_price - b.entry_price).abs() / a.entry_price.abs().max(1e-9);
    let price_sim = 1.0 - (price_diff / 0.005).min(1.0);
    let risk_a = a.initial_risk();
    let risk_b = b.initial_risk();
    let risk_diff = (risk_a - risk_b).abs() / risk_a.max(risk_b).max(1e-9);
    let risk_sim = 1.0 - (risk_diff / 0.3).min(1.0);
    0.5 * direction + 0.3 * price_sim + 0.2 * risk_sim
}
