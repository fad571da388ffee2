//! # Load-Aware Calculator
//!
//! Deterministic cost rewriter. Shifts the RTT-based cost upward by a
//! weighted blend of three components, each normalized to `[0, 1]`:
//!
//! - **rtt** — the average RTT level against a 200 ms ceiling
//! - **load** — queueing inflation: how far the average RTT sits above the
//!   window minimum, which approximates the propagation floor
//! - **stability** — coefficient of variation of its own bounded history
//!
//! `final = rtt_based_cost × (1 + w_r·r + w_l·l + w_s·s)`, never below the
//! originally configured cost. The calculator keeps a small per-neighbor
//! RTT history of its own for the load and stability components; it holds
//! no other state and ignores feedback.

use std::collections::{HashMap, VecDeque};

use crate::calculator::{AdaptiveCalculator, TickContext};
use crate::config::LoadAwareWeights;
use crate::name::NeighborName;
use crate::store::LinkSnapshot;

const MAX_RTT_HISTORY: usize = 10;
/// RTT at or above this saturates the rtt component.
const RTT_CEILING_MS: f64 = 200.0;

pub struct LoadAwareCalculator {
    weights: LoadAwareWeights,
    rtt_history: HashMap<NeighborName, VecDeque<f64>>,
    calculation_count: u64,
}

impl LoadAwareCalculator {
    pub fn new(weights: LoadAwareWeights) -> Self {
        LoadAwareCalculator {
            weights,
            rtt_history: HashMap::new(),
            calculation_count: 0,
        }
    }

    pub fn calculation_count(&self) -> u64 {
        self.calculation_count
    }

    fn push_rtt(&mut self, neighbor: &NeighborName, rtt_ms: f64) {
        let history = self.rtt_history.entry(neighbor.clone()).or_default();
        if history.len() == MAX_RTT_HISTORY {
            history.pop_front();
        }
        history.push_back(rtt_ms);
    }

    fn rtt_component(avg_rtt_ms: Option<f64>) -> f64 {
        match avg_rtt_ms {
            Some(ms) => (ms / RTT_CEILING_MS).clamp(0.0, 1.0),
            None => 0.0,
        }
    }

    /// Queueing inflation above the window minimum.
    fn load_component(&self, neighbor: &NeighborName) -> f64 {
        let Some(history) = self.rtt_history.get(neighbor) else {
            return 0.0;
        };
        if history.len() < 2 {
            return 0.0;
        }
        let min = history.iter().copied().fold(f64::INFINITY, f64::min);
        let avg = history.iter().sum::<f64>() / history.len() as f64;
        if min <= 0.0 {
            return 0.0;
        }
        (avg / min - 1.0).clamp(0.0, 1.0)
    }

    /// Coefficient of variation of the internal history, capped at 1.
    fn stability_component(&self, neighbor: &NeighborName) -> f64 {
        let Some(history) = self.rtt_history.get(neighbor) else {
            return 0.0;
        };
        if history.len() < 3 {
            return 0.0;
        }
        let mean = history.iter().sum::<f64>() / history.len() as f64;
        if mean <= 0.0 {
            return 1.0;
        }
        let variance =
            history.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / history.len() as f64;
        (variance.sqrt() / mean).min(1.0)
    }
}

impl AdaptiveCalculator for LoadAwareCalculator {
    fn name(&self) -> &'static str {
        "load-aware"
    }

    fn adjust(
        &mut self,
        neighbor: &NeighborName,
        rtt_based_cost: f64,
        snapshot: &LinkSnapshot,
        _ctx: &TickContext,
    ) -> f64 {
        self.calculation_count += 1;
        if let Some(avg) = snapshot.average_rtt_ms {
            self.push_rtt(neighbor, avg);
        }

        let r = Self::rtt_component(snapshot.average_rtt_ms);
        let l = self.load_component(neighbor);
        let s = self.stability_component(neighbor);

        let shift = self.weights.rtt * r + self.weights.load * l + self.weights.stability * s;
        let adjusted = rtt_based_cost * (1.0 + shift);
        tracing::trace!(%neighbor, r, l, s, rtt_based_cost, adjusted, "load-aware adjustment");

        adjusted.max(snapshot.original_cost as f64)
    }

    fn observe(&mut self, neighbor: &NeighborName, performance: f64, _ctx: &TickContext) {
        // Deterministic calculator: nothing to learn.
        tracing::trace!(%neighbor, performance, "load-aware calculator ignoring feedback");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LinkSnapshot, NeighborStatus};
    use quanta::Clock;

    fn snapshot(avg_rtt_ms: Option<f64>, original_cost: u64) -> LinkSnapshot {
        LinkSnapshot {
            neighbor: NeighborName::new("/r/a"),
            status: NeighborStatus::Active,
            original_cost,
            current_cost: original_cost as f64,
            timeout_count: 0,
            average_rtt_ms: avg_rtt_ms,
            rtt_history_ms: Vec::new(),
            last_success_age_ms: 0,
            external: None,
        }
    }

    fn ctx() -> TickContext {
        TickContext::new(Clock::mock().0.now(), 0)
    }

    // ─── Components ─────────────────────────────────────────────────────

    #[test]
    fn no_rtt_data_returns_candidate_unshifted() {
        let mut calc = LoadAwareCalculator::new(LoadAwareWeights::default());
        let n = NeighborName::new("/r/a");
        let out = calc.adjust(&n, 10.0, &snapshot(None, 10), &ctx());
        assert_eq!(out, 10.0);
    }

    #[test]
    fn steady_low_rtt_shifts_little() {
        let mut calc = LoadAwareCalculator::new(LoadAwareWeights::default());
        let n = NeighborName::new("/r/a");
        let mut out = 0.0;
        for _ in 0..5 {
            out = calc.adjust(&n, 20.0, &snapshot(Some(10.0), 10), &ctx());
        }
        // r = 0.05, l = 0, s = 0 → shift = 0.015
        assert!((out - 20.0 * 1.015).abs() < 1e-9, "got {out}");
    }

    #[test]
    fn rising_rtt_increases_load_component() {
        let mut calc = LoadAwareCalculator::new(LoadAwareWeights::default());
        let n = NeighborName::new("/r/a");
        // Feed a growing average: the window minimum stays at the floor
        // while the mean climbs, so the load component rises.
        for avg in [20.0, 40.0, 80.0, 120.0] {
            calc.adjust(&n, 30.0, &snapshot(Some(avg), 10), &ctx());
        }
        assert!(calc.load_component(&n) > 0.5);
        assert!(calc.stability_component(&n) > 0.0);
    }

    #[test]
    fn saturated_rtt_component_caps_at_one() {
        assert_eq!(LoadAwareCalculator::rtt_component(Some(10_000.0)), 1.0);
        assert_eq!(LoadAwareCalculator::rtt_component(None), 0.0);
    }

    // ─── Floor ──────────────────────────────────────────────────────────

    #[test]
    fn never_returns_below_original_cost() {
        let mut calc = LoadAwareCalculator::new(LoadAwareWeights::default());
        let n = NeighborName::new("/r/a");
        let out = calc.adjust(&n, 3.0, &snapshot(Some(5.0), 10), &ctx());
        assert!(out >= 10.0);
    }

    #[test]
    fn maximum_shift_is_bounded() {
        // All components at 1 → shift = w_r + w_l + w_s = 1 → at most ×2.
        let mut calc = LoadAwareCalculator::new(LoadAwareWeights::default());
        let n = NeighborName::new("/r/a");
        for avg in [1.0, 500.0, 1.0, 800.0, 2.0, 900.0] {
            calc.adjust(&n, 26.0, &snapshot(Some(avg), 10), &ctx());
        }
        let out = calc.adjust(&n, 26.0, &snapshot(Some(1000.0), 10), &ctx());
        assert!(out <= 26.0 * 2.0 + 1e-9, "got {out}");
    }

    #[test]
    fn history_is_bounded_per_neighbor() {
        let mut calc = LoadAwareCalculator::new(LoadAwareWeights::default());
        let n = NeighborName::new("/r/a");
        for i in 0..50 {
            calc.adjust(&n, 10.0, &snapshot(Some(10.0 + i as f64), 10), &ctx());
        }
        assert_eq!(calc.rtt_history.get(&n).unwrap().len(), MAX_RTT_HISTORY);
        assert_eq!(calc.calculation_count(), 50);
    }
}
