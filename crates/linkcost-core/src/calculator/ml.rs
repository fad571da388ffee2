//! # ML Adaptive Calculator
//!
//! Online-learning cost rewriter. A small linear model with a sigmoid
//! output predicts a link-badness score `ŷ ∈ (0, 1)` from five features,
//! and the final cost is `original_cost × (1 + ŷ)`.
//!
//! Features:
//! 1. RTT trend — last five samples against the five before them
//! 2. RTT coefficient of variation
//! 3. success-rate proxy — fraction of recent samples under 500 ms
//! 4. load indicator — discrete second difference of the last three samples
//! 5. temporal feature — learned mean performance for the current
//!    10-minute time-of-day slot
//!
//! Until the first feedback arrives the model falls back to fixed weights
//! over the first four features, so behaviour is defined from the first
//! call. Feedback drives stochastic gradient updates with a
//! multiplicatively adapted learning rate. Nothing is persisted.

use quanta::Instant;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::calculator::{AdaptiveCalculator, TickContext};
use crate::name::NeighborName;
use crate::store::LinkSnapshot;

pub const FEATURE_COUNT: usize = 5;

/// Fallback weights over the first four features while the model is cold.
const FIXED_WEIGHTS: [f64; 4] = [0.4, 0.3, 0.2, 0.1];

const MAX_RTT_HISTORY: usize = 20;
/// Samples under this RTT count as successes for the success-rate proxy.
const SUCCESS_RTT_MS: f64 = 500.0;
/// A model update happens at least this often while feedback flows.
const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(30);
/// Smoothing for the EMA of |prediction error|.
const ERROR_EMA_ALPHA: f64 = 0.1;
/// Smoothing for temporal pattern means.
const PATTERN_EMA_ALPHA: f64 = 0.1;

const INITIAL_LEARNING_RATE: f64 = 0.01;
const MAX_LEARNING_RATE: f64 = 0.05;
const MIN_LEARNING_RATE: f64 = 0.001;
const ADAPTATION_THRESHOLD: f64 = 0.2;

/// Minutes per time-of-day slot; 144 slots per day.
pub const SLOT_MINUTES: u32 = 10;
pub const SLOTS_PER_DAY: u16 = (24 * 60 / SLOT_MINUTES) as u16;

/// Bucket a minute-of-day into its 10-minute slot.
pub fn slot_of(minute_of_day: u32) -> u16 {
    ((minute_of_day % (24 * 60)) / SLOT_MINUTES) as u16
}

// ─── Linear model ───────────────────────────────────────────────────────────

/// `ŷ = σ(b + Σ wᵢ·xᵢ)` with online gradient-descent updates.
#[derive(Debug, Clone)]
struct LinearModel {
    weights: [f64; FEATURE_COUNT],
    bias: f64,
    update_count: u64,
}

impl LinearModel {
    /// Prior emphasising RTT trend and stability.
    fn new() -> Self {
        LinearModel {
            weights: [0.4, 0.3, 0.2, 0.1, 0.15],
            bias: 0.0,
            update_count: 0,
        }
    }

    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> f64 {
        let z = self.bias
            + self
                .weights
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }

    fn update_online(&mut self, features: &[f64; FEATURE_COUNT], target: f64, learning_rate: f64) {
        let error = target - self.predict(features);
        self.bias += learning_rate * error;
        for (w, x) in self.weights.iter_mut().zip(features) {
            *w += learning_rate * error * x;
        }
        self.update_count += 1;
    }
}

// ─── Temporal pattern table ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct SlotStats {
    mean_performance: f64,
    sample_count: u64,
    last_update: Instant,
}

/// Learned mean performance per `(neighbor, time-of-day slot)`.
#[derive(Debug, Default)]
pub struct TemporalPatternTable {
    slots: HashMap<(NeighborName, u16), SlotStats>,
}

impl TemporalPatternTable {
    fn update(&mut self, neighbor: &NeighborName, slot: u16, performance: f64, now: Instant) {
        match self.slots.get_mut(&(neighbor.clone(), slot)) {
            Some(stats) => {
                stats.mean_performance = PATTERN_EMA_ALPHA * performance
                    + (1.0 - PATTERN_EMA_ALPHA) * stats.mean_performance;
                stats.sample_count += 1;
                stats.last_update = now;
            }
            None => {
                self.slots.insert(
                    (neighbor.clone(), slot),
                    SlotStats {
                        mean_performance: performance,
                        sample_count: 1,
                        last_update: now,
                    },
                );
            }
        }
    }

    /// Mean performance for the slot, or a neutral 0.5 when unseen.
    pub fn time_feature(&self, neighbor: &NeighborName, slot: u16) -> f64 {
        self.slots
            .get(&(neighbor.clone(), slot))
            .map(|s| s.mean_performance)
            .unwrap_or(0.5)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ─── Statistics ─────────────────────────────────────────────────────────────

/// Running counters exposed for the status report.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlStats {
    pub prediction_count: u64,
    pub model_update_count: u64,
    /// Exponential moving average of |prediction error|.
    pub ema_prediction_error: f64,
}

// ─── Calculator ─────────────────────────────────────────────────────────────

pub struct MlAdaptiveCalculator {
    model: LinearModel,
    pattern: TemporalPatternTable,
    rtt_history: HashMap<NeighborName, VecDeque<f64>>,
    learning_rate: f64,
    adaptation_threshold: f64,
    model_ready: bool,
    last_model_update: Option<Instant>,
    error_ema: Option<f64>,
    stats: MlStats,
}

impl MlAdaptiveCalculator {
    pub fn new() -> Self {
        MlAdaptiveCalculator {
            model: LinearModel::new(),
            pattern: TemporalPatternTable::default(),
            rtt_history: HashMap::new(),
            learning_rate: INITIAL_LEARNING_RATE,
            adaptation_threshold: ADAPTATION_THRESHOLD,
            model_ready: false,
            last_model_update: None,
            error_ema: None,
            stats: MlStats::default(),
        }
    }

    pub fn stats(&self) -> MlStats {
        self.stats
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn pattern_table(&self) -> &TemporalPatternTable {
        &self.pattern
    }

    fn push_rtt(&mut self, neighbor: &NeighborName, rtt_ms: f64) {
        let history = self.rtt_history.entry(neighbor.clone()).or_default();
        if history.len() == MAX_RTT_HISTORY {
            history.pop_front();
        }
        history.push_back(rtt_ms);
    }

    // ── Feature extraction ──────────────────────────────────────────────

    fn rtt_trend(&self, neighbor: &NeighborName) -> f64 {
        let Some(history) = self.rtt_history.get(neighbor) else {
            return 0.0;
        };
        let len = history.len();
        if len < 10 {
            return 0.0;
        }
        let recent: f64 = history.iter().skip(len - 5).sum::<f64>() / 5.0;
        let older: f64 = history.iter().skip(len - 10).take(5).sum::<f64>() / 5.0;
        if older <= 0.0 {
            return 0.0;
        }
        (recent / older - 1.0).clamp(-1.0, 1.0)
    }

    fn variation_coefficient(&self, neighbor: &NeighborName) -> f64 {
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

    fn success_rate(&self, neighbor: &NeighborName) -> f64 {
        let Some(history) = self.rtt_history.get(neighbor) else {
            return 0.5;
        };
        if history.is_empty() {
            return 0.5;
        }
        let successes = history.iter().filter(|&&rtt| rtt < SUCCESS_RTT_MS).count();
        successes as f64 / history.len() as f64
    }

    /// Discrete second difference of the last three samples: positive when
    /// RTT growth is accelerating.
    fn load_indicator(&self, neighbor: &NeighborName) -> f64 {
        let Some(history) = self.rtt_history.get(neighbor) else {
            return 0.0;
        };
        let len = history.len();
        if len < 5 {
            return 0.0;
        }
        let newest = history[len - 1];
        let middle = history[len - 2];
        let oldest = history[len - 3];
        let acceleration = (newest - middle) - (middle - oldest);
        (acceleration / 100.0).clamp(-1.0, 1.0)
    }

    fn extract_features(&self, neighbor: &NeighborName, slot: u16) -> [f64; FEATURE_COUNT] {
        [
            self.rtt_trend(neighbor),
            self.variation_coefficient(neighbor),
            self.success_rate(neighbor),
            self.load_indicator(neighbor),
            self.pattern.time_feature(neighbor, slot),
        ]
    }

    fn predict_with_fixed_weights(features: &[f64; FEATURE_COUNT]) -> f64 {
        let score: f64 = FIXED_WEIGHTS
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum();
        score.clamp(0.0, 1.0)
    }

    // ── Online learning ─────────────────────────────────────────────────

    fn update_due(&self, error_abs: f64, now: Instant) -> bool {
        if error_abs > self.adaptation_threshold {
            return true;
        }
        match self.last_model_update {
            None => true,
            Some(last) => now.duration_since(last) >= MIN_UPDATE_INTERVAL,
        }
    }

    fn adapt_learning_rate(&mut self) {
        let ema = self.error_ema.unwrap_or(0.0);
        if ema > 0.3 {
            self.learning_rate = (self.learning_rate * 1.1).min(MAX_LEARNING_RATE);
        } else if ema < 0.1 {
            self.learning_rate = (self.learning_rate * 0.9).max(MIN_LEARNING_RATE);
        }
    }
}

impl Default for MlAdaptiveCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveCalculator for MlAdaptiveCalculator {
    fn name(&self) -> &'static str {
        "ml-adaptive"
    }

    fn adjust(
        &mut self,
        neighbor: &NeighborName,
        rtt_based_cost: f64,
        snapshot: &LinkSnapshot,
        ctx: &TickContext,
    ) -> f64 {
        self.stats.prediction_count += 1;
        let features = self.extract_features(neighbor, slot_of(ctx.minute_of_day));

        let score = if self.model_ready {
            self.model.predict(&features)
        } else {
            Self::predict_with_fixed_weights(&features)
        };

        if let Some(avg) = snapshot.average_rtt_ms {
            self.push_rtt(neighbor, avg);
        }

        let final_cost = snapshot.original_cost as f64 * (1.0 + score);
        tracing::trace!(
            %neighbor,
            ?features,
            score,
            final_cost,
            "ml prediction"
        );

        if !final_cost.is_finite() || final_cost <= 0.0 {
            return rtt_based_cost;
        }
        final_cost
    }

    fn observe(&mut self, neighbor: &NeighborName, performance: f64, ctx: &TickContext) {
        let slot = slot_of(ctx.minute_of_day);
        let features = self.extract_features(neighbor, slot);

        self.pattern.update(neighbor, slot, performance, ctx.now);

        let prediction = self.model.predict(&features);
        let error_abs = (performance - prediction).abs();
        let ema = match self.error_ema {
            Some(prev) => ERROR_EMA_ALPHA * error_abs + (1.0 - ERROR_EMA_ALPHA) * prev,
            None => error_abs,
        };
        self.error_ema = Some(ema);
        self.stats.ema_prediction_error = ema;

        if self.update_due(error_abs, ctx.now) {
            self.adapt_learning_rate();
            self.model.update_online(&features, performance, self.learning_rate);
            self.model_ready = true;
            self.last_model_update = Some(ctx.now);
            self.stats.model_update_count += 1;
            tracing::debug!(
                %neighbor,
                error = error_abs,
                learning_rate = self.learning_rate,
                "model updated"
            );
        }
    }
}
