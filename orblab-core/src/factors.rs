//! Factor evaluation — boolean/real activations from indicator state.
//!
//! The factor set is a closed enumeration; activations are 0/1 or [0, 1]
//! values keyed by `FactorName`. Evaluation is symmetric per direction, with
//! polarity-bearing factors (price action, profile, VWAP, ADX) inverted for
//! the short side.

use crate::config::FactorsConfig;
use crate::domain::{Bar, Direction};
use crate::indicators::{AdxState, RelVolumeState};
use serde::{Deserialize, Serialize};

/// The closed factor enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorName {
    RelVolume,
    PriceAction,
    Profile,
    Vwap,
    Adx,
}

impl FactorName {
    pub const ALL: [FactorName; 5] = [
        FactorName::RelVolume,
        FactorName::PriceAction,
        FactorName::Profile,
        FactorName::Vwap,
        FactorName::Adx,
    ];
}

/// Per-bar factor activations. Weights applied downstream by the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FactorSet {
    pub rel_vol: f64,
    pub price_action: f64,
    pub profile: f64,
    pub vwap: f64,
    pub adx: f64,
}

impl FactorSet {
    pub fn get(&self, name: FactorName) -> f64 {
        match name {
            FactorName::RelVolume => self.rel_vol,
            FactorName::PriceAction => self.price_action,
            FactorName::Profile => self.profile,
            FactorName::Vwap => self.vwap,
            FactorName::Adx => self.adx,
        }
    }

    pub fn as_array(&self) -> [f64; 5] {
        [
            self.rel_vol,
            self.price_action,
            self.profile,
            self.vwap,
            self.adx,
        ]
    }
}

/// Read-only indicator state handed to the evaluator each bar.
pub struct FactorInputs<'a> {
    /// Session bars, oldest first, including the current bar.
    pub session_bars: &'a [Bar],
    pub rel_vol: RelVolumeState,
    pub vwap: Option<f64>,
    pub adx: AdxState,
}

/// Evaluate all enabled factors for one direction.
pub fn evaluate_factors(
    direction: Direction,
    inputs: &FactorInputs<'_>,
    config: &FactorsConfig,
) -> FactorSet {
    let mut set = FactorSet::default();
    let bars = inputs.session_bars;
    let current = match bars.last() {
        Some(bar) => bar,
        None => return set,
    };

    if config.rel_volume.enabled && inputs.rel_vol.spike {
        set.rel_vol = 1.0;
    }

    if config.price_action.enabled {
        set.price_action = price_action_activation(direction, bars, config);
    }

    if config.profile.enabled {
        if let Some((val, vah)) =
            session_value_area(bars, config.profile.val_pct, config.profile.vah_pct)
        {
            let beyond = match direction {
                Direction::Long => current.close > vah,
                Direction::Short => current.close < val,
            };
            if beyond {
                set.profile = 1.0;
            }
        }
    }

    if config.vwap.enabled {
        if let Some(vwap) = inputs.vwap {
            let aligned = match direction {
                Direction::Long => current.close > vwap,
                Direction::Short => current.close < vwap,
            };
            if aligned {
                set.vwap = 1.0;
            }
        }
    }

    if config.adx.enabled {
        if let (Some(adx), Some(plus), Some(minus)) =
            (inputs.adx.adx, inputs.adx.plus_di, inputs.adx.minus_di)
        {
            let trending = adx >= config.adx.threshold;
            let aligned = match direction {
                Direction::Long => plus > minus,
                Direction::Short => minus > plus,
            };
            if trending && aligned {
                set.adx = 1.0;
            }
        }
    }

    set
}

fn price_action_activation(direction: Direction, bars: &[Bar], config: &FactorsConfig) -> f64 {
    let mut active = false;
    if config.price_action.engulfing && bars.len() >= 2 {
        let prev = &bars[bars.len() - 2];
        let curr = &bars[bars.len() - 1];
        active |= match direction {
            Direction::Long => bullish_engulfing(prev, curr),
            Direction::Short => bearish_engulfing(prev, curr),
        };
    }
    if !active && config.price_action.structure {
        active = structure_bias(bars, config.price_action.pivot_len) == Some(direction);
    }
    if active {
        1.0
    } else {
        0.0
    }
}

/// Current bullish body engulfs the prior bearish body.
fn bullish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    prev.is_bearish() && curr.is_bullish() && curr.open <= prev.close && curr.close >= prev.open
}

fn bearish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    prev.is_bullish() && curr.is_bearish() && curr.open >= prev.close && curr.close <= prev.open
}

/// Directional structure over the last `pivot_len + 1` bars: strictly higher
/// highs and higher lows reads long, lower lows and lower highs reads short.
fn structure_bias(bars: &[Bar], pivot_len: usize) -> Option<Direction> {
    if bars.len() < pivot_len + 1 {
        return None;
    }
    let window = &bars[bars.len() - pivot_len - 1..];
    let mut higher = true;
    let mut lower = true;
    for pair in window.windows(2) {
        higher &= pair[1].high > pair[0].high && pair[1].low > pair[0].low;
        lower &= pair[1].low < pair[0].low && pair[1].high < pair[0].high;
    }
    match (higher, lower) {
        (true, false) => Some(Direction::Long),
        (false, true) => Some(Direction::Short),
        _ => None,
    }
}

/// Volume-weighted value area over the session so far.
///
/// Bars are ranked by typical price; VAL/VAH are the prices where cumulative
/// volume crosses the configured percentiles. None until volume has traded.
pub fn session_value_area(bars: &[Bar], val_pct: f64, vah_pct: f64) -> Option<(f64, f64)> {
    let total: u64 = bars.iter().map(|b| b.volume).sum();
    if total == 0 || bars.is_empty() {
        return None;
    }
    let mut ranked: Vec<(f64, u64)> = bars.iter().map(|b| (b.typical_price(), b.volume)).collect();
    ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("typical prices are finite"));

    let mut cum: u64 = 0;
    let mut val = ranked[0].0;
    let mut vah = ranked[ranked.len() - 1].0;
    let mut val_set = false;
    let mut vah_set = false;
    for (price, volume) in &ranked {
        cum += volume;
        let frac = cum as f64 / total as f64;
        if !val_set && frac >= val_pct {
            val = *price;
            val_set = true;
        }
        if !vah_set && frac >= vah_pct {
            vah = *price;
            vah_set = true;
        }
    }
    Some((val, vah))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn make_bar(min: i64, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Bar {
        Bar {
            ts: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap() + Duration::minutes(min),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn default_inputs(bars: &[Bar]) -> FactorInputs<'_> {
        FactorInputs {
            session_bars: bars,
            rel_vol: RelVolumeState::default(),
            vwap: None,
            adx: AdxState::default(),
        }
    }

    #[test]
    fn factor_names_index_the_set() {
        let set = FactorSet {
            rel_vol: 0.1,
            price_action: 0.2,
            profile: 0.3,
            vwap: 0.4,
            adx: 0.5,
        };
        let by_name: Vec<f64> = FactorName::ALL.iter().map(|n| set.get(*n)).collect();
        assert_eq!(by_name, set.as_array().to_vec());
    }

    #[test]
    fn empty_session_is_all_zero() {
        let bars: Vec<Bar> = vec![];
        let set = evaluate_factors(
            Direction::Long,
            &default_inputs(&bars),
            &FactorsConfig::default(),
        );
        assert_eq!(set, FactorSet::default());
    }

    #[test]
    fn rel_volume_spike_activates_both_directions() {
        let bars = vec![make_bar(0, 100.0, 100.5, 99.5, 100.2, 5000)];
        let mut inputs = default_inputs(&bars);
        inputs.rel_vol = RelVolumeState {
            rel_vol: Some(2.0),
            spike: true,
        };
        let long = evaluate_factors(Direction::Long, &inputs, &FactorsConfig::default());
        let short = evaluate_factors(Direction::Short, &inputs, &FactorsConfig::default());
        assert_eq!(long.rel_vol, 1.0);
        assert_eq!(short.rel_vol, 1.0);
    }

    #[test]
    fn bullish_engulfing_reads_long_only() {
        let bars = vec![
            make_bar(0, 100.4, 100.5, 99.9, 100.0, 1000), // bearish
            make_bar(1, 99.9, 100.7, 99.8, 100.6, 1000),  // engulfing bullish
        ];
        let inputs = default_inputs(&bars);
        let config = FactorsConfig::default();
        let long = evaluate_factors(Direction::Long, &inputs, &config);
        let short = evaluate_factors(Direction::Short, &inputs, &config);
        assert_eq!(long.price_action, 1.0);
        assert_eq!(short.price_action, 0.0);
    }

    #[test]
    fn structure_higher_highs_and_lows_reads_long() {
        let mut config = FactorsConfig::default();
        config.price_action.engulfing = false;
        let bars: Vec<Bar> = (0..5)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.3;
                make_bar(i, base, base + 0.2, base - 0.2, base + 0.1, 1000)
            })
            .collect();
        let inputs = default_inputs(&bars);
        assert_eq!(
            evaluate_factors(Direction::Long, &inputs, &config).price_action,
            1.0
        );
        assert_eq!(
            evaluate_factors(Direction::Short, &inputs, &config).price_action,
            0.0
        );
    }

    #[test]
    fn vwap_polarity_inverts_for_shorts() {
        let bars = vec![make_bar(0, 100.0, 100.5, 99.5, 100.4, 1000)];
        let mut inputs = default_inputs(&bars);
        inputs.vwap = Some(100.0);
        let mut config = FactorsConfig::default();
        config.vwap.enabled = true;
        assert_eq!(evaluate_factors(Direction::Long, &inputs, &config).vwap, 1.0);
        assert_eq!(evaluate_factors(Direction::Short, &inputs, &config).vwap, 0.0);
    }

    #[test]
    fn adx_requires_trend_and_di_alignment() {
        let bars = vec![make_bar(0, 100.0, 100.5, 99.5, 100.4, 1000)];
        let mut inputs = default_inputs(&bars);
        inputs.adx = AdxState {
            adx: Some(25.0),
            plus_di: Some(30.0),
            minus_di: Some(10.0),
            trend_weak: false,
        };
        let mut config = FactorsConfig::default();
        config.adx.enabled = true;
        assert_eq!(evaluate_factors(Direction::Long, &inputs, &config).adx, 1.0);
        assert_eq!(evaluate_factors(Direction::Short, &inputs, &config).adx, 0.0);

        // Weak ADX never activates even when DI is aligned
        inputs.adx.adx = Some(10.0);
        assert_eq!(evaluate_factors(Direction::Long, &inputs, &config).adx, 0.0);
    }

    #[test]
    fn value_area_brackets_volume_mass() {
        // Heavy volume at 100, light wings at 98 and 102
        let bars = vec![
            make_bar(0, 98.0, 98.1, 97.9, 98.0, 100),
            make_bar(1, 100.0, 100.1, 99.9, 100.0, 10_000),
            make_bar(2, 102.0, 102.1, 101.9, 102.0, 100),
        ];
        let (val, vah) = session_value_area(&bars, 0.25, 0.75).unwrap();
        // Both percentiles land inside the heavy node near 100
        assert!(val > 99.0 && val < 101.0, "VAL {val}");
        assert!(vah > 99.0 && vah < 101.0, "VAH {vah}");
        assert!(val <= vah);
    }

    #[test]
    fn profile_activates_beyond_value_area() {
        let mut bars = vec![
            make_bar(0, 99.9, 100.1, 99.8, 100.0, 10_000),
            make_bar(1, 100.0, 100.2, 99.9, 100.1, 10_000),
        ];
        // Close far above the value area
        bars.push(make_bar(2, 103.0, 103.2, 102.9, 103.1, 500));
        let inputs = default_inputs(&bars);
        let config = FactorsConfig::default();
        assert_eq!(evaluate_factors(Direction::Long, &inputs, &config).profile, 1.0);
        assert_eq!(evaluate_factors(Direction::Short, &inputs, &config).profile, 0.0);
    }
}
