//! Boot-time configuration.
//!
//! Configuration is read once at daemon startup and immutable thereafter.
//! The raw TOML shape ([`LinkCostConfigInput`]) is resolved into a validated
//! [`LinkCostConfig`]; every weight group must sum to 1 and every fraction
//! must lie in `[0, 1]`, so the rest of the crate never re-validates.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::calculator::RoutingMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

// ─── Weight groups ──────────────────────────────────────────────────────────

/// Weights for the link-performance feedback score.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackWeights {
    /// Weight for the RTT level score (default 0.4).
    pub rtt: f64,
    /// Weight for the stability (coefficient-of-variation) score (default 0.2).
    pub stability: f64,
    /// Weight for the reliability (timeout-count) score (default 0.3).
    pub reliability: f64,
    /// Weight for the RTT trend score (default 0.1).
    pub trend: f64,
}

impl Default for FeedbackWeights {
    fn default() -> Self {
        FeedbackWeights {
            rtt: 0.4,
            stability: 0.2,
            reliability: 0.3,
            trend: 0.1,
        }
    }
}

/// Weights for the multi-dimensional preview cost.
#[derive(Debug, Clone, Copy)]
pub struct PreviewWeights {
    /// Weight for the RTT factor (default 0.4).
    pub rtt: f64,
    /// Weight for the bandwidth-utilization factor (default 0.3).
    pub bandwidth: f64,
    /// Weight for the packet-loss factor (default 0.2).
    pub loss: f64,
    /// Weight for the spectrum-strength factor (default 0.1).
    pub spectrum: f64,
}

impl Default for PreviewWeights {
    fn default() -> Self {
        PreviewWeights {
            rtt: 0.4,
            bandwidth: 0.3,
            loss: 0.2,
            spectrum: 0.1,
        }
    }
}

/// Weights for the load-aware calculator's cost shift.
#[derive(Debug, Clone, Copy)]
pub struct LoadAwareWeights {
    /// Weight for the RTT component (default 0.3).
    pub rtt: f64,
    /// Weight for the load component (default 0.4).
    pub load: f64,
    /// Weight for the stability component (default 0.3).
    pub stability: f64,
}

impl Default for LoadAwareWeights {
    fn default() -> Self {
        LoadAwareWeights {
            rtt: 0.3,
            load: 0.4,
            stability: 0.3,
        }
    }
}

// ─── Resolved configuration ─────────────────────────────────────────────────

/// Validated subsystem configuration.
#[derive(Debug, Clone)]
pub struct LinkCostConfig {
    /// Base interval between RTT probes per neighbor.
    pub measurement_interval: Duration,
    /// Probe lifetime; a probe unanswered past this is a timeout.
    pub measurement_timeout: Duration,
    /// Upper bound on `current_cost` as a multiple of the original cost.
    pub max_cost_multiplier: f64,
    /// Relative change required before a cost update is considered.
    pub cost_change_threshold: f64,
    /// Consecutive hello timeouts before a neighbor is declared INACTIVE.
    /// Mirrored from the host's hello configuration.
    pub retry_limit: u32,
    /// One-shot delay between `start()` and the first probe.
    pub warmup: Duration,
    /// Interval of the recurring status-report tick.
    pub status_report_interval: Duration,
    /// Upper bound (exclusive) of the uniform probe jitter.
    pub probe_jitter_max: Duration,
    /// Bounded RTT history capacity per neighbor.
    pub rtt_history_capacity: usize,
    /// Minimum spacing between LSA rebuild requests per neighbor.
    pub min_rebuild_interval: Duration,
    /// Which route-cost calculator to run.
    pub mode: RoutingMode,
    pub feedback_weights: FeedbackWeights,
    pub preview_weights: PreviewWeights,
    pub load_aware_weights: LoadAwareWeights,
}

impl Default for LinkCostConfig {
    fn default() -> Self {
        LinkCostConfig {
            measurement_interval: Duration::from_secs(60),
            measurement_timeout: Duration::from_secs(2),
            max_cost_multiplier: 5.0,
            cost_change_threshold: 0.05,
            retry_limit: 3,
            warmup: Duration::from_secs(30),
            status_report_interval: Duration::from_secs(600),
            probe_jitter_max: Duration::from_millis(5000),
            rtt_history_capacity: 10,
            min_rebuild_interval: Duration::from_secs(10),
            mode: RoutingMode::Standard,
            feedback_weights: FeedbackWeights::default(),
            preview_weights: PreviewWeights::default(),
            load_aware_weights: LoadAwareWeights::default(),
        }
    }
}

// ─── TOML input ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkCostConfigInput {
    pub measurement_interval_secs: Option<u64>,
    pub measurement_timeout_ms: Option<u64>,
    pub max_cost_multiplier: Option<f64>,
    pub cost_change_threshold: Option<f64>,
    pub retry_limit: Option<u32>,
    pub warmup_secs: Option<u64>,
    pub status_report_interval_secs: Option<u64>,
    pub probe_jitter_max_ms: Option<u64>,
    pub rtt_history_capacity: Option<usize>,
    pub min_rebuild_interval_secs: Option<u64>,
    pub mode: Option<String>,
    pub feedback_weights: Option<WeightsInput>,
    pub preview_weights: Option<WeightsInput>,
    pub load_aware_weights: Option<WeightsInput>,
}

/// A loose bag of named weights; each group picks the names it understands.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WeightsInput {
    pub rtt: Option<f64>,
    pub stability: Option<f64>,
    pub reliability: Option<f64>,
    pub trend: Option<f64>,
    pub bandwidth: Option<f64>,
    pub loss: Option<f64>,
    pub spectrum: Option<f64>,
    pub load: Option<f64>,
}

fn check_unit(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if !(0.0..=1.0).contains(&value) || !value.is_finite() {
        return Err(ConfigError::InvalidArgument {
            field,
            reason: format!("{value} is outside [0, 1]"),
        });
    }
    Ok(value)
}

fn check_sum(field: &'static str, weights: &[f64]) -> Result<(), ConfigError> {
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > 1e-6 {
        return Err(ConfigError::InvalidArgument {
            field,
            reason: format!("weights sum to {sum}, expected 1"),
        });
    }
    Ok(())
}

impl LinkCostConfigInput {
    pub fn resolve(self) -> Result<LinkCostConfig, ConfigError> {
        let defaults = LinkCostConfig::default();

        let mode = match self.mode.as_deref() {
            None => defaults.mode,
            Some(s) => RoutingMode::parse(s).ok_or_else(|| ConfigError::InvalidArgument {
                field: "mode",
                reason: format!("unknown routing mode {s:?}"),
            })?,
        };

        let max_cost_multiplier = self.max_cost_multiplier.unwrap_or(defaults.max_cost_multiplier);
        if !max_cost_multiplier.is_finite() || max_cost_multiplier < 1.0 {
            return Err(ConfigError::InvalidArgument {
                field: "max_cost_multiplier",
                reason: format!("{max_cost_multiplier} must be >= 1"),
            });
        }

        let cost_change_threshold = match self.cost_change_threshold {
            Some(t) => check_unit("cost_change_threshold", t)?,
            None => defaults.cost_change_threshold,
        };

        let feedback_weights = match self.feedback_weights {
            None => defaults.feedback_weights,
            Some(w) => {
                let d = FeedbackWeights::default();
                let fw = FeedbackWeights {
                    rtt: check_unit("feedback_weights.rtt", w.rtt.unwrap_or(d.rtt))?,
                    stability: check_unit(
                        "feedback_weights.stability",
                        w.stability.unwrap_or(d.stability),
                    )?,
                    reliability: check_unit(
                        "feedback_weights.reliability",
                        w.reliability.unwrap_or(d.reliability),
                    )?,
                    trend: check_unit("feedback_weights.trend", w.trend.unwrap_or(d.trend))?,
                };
                check_sum(
                    "feedback_weights",
                    &[fw.rtt, fw.stability, fw.reliability, fw.trend],
                )?;
                fw
            }
        };

        let preview_weights = match self.preview_weights {
            None => defaults.preview_weights,
            Some(w) => {
                let d = PreviewWeights::default();
                let pw = PreviewWeights {
                    rtt: check_unit("preview_weights.rtt", w.rtt.unwrap_or(d.rtt))?,
                    bandwidth: check_unit(
                        "preview_weights.bandwidth",
                        w.bandwidth.unwrap_or(d.bandwidth),
                    )?,
                    loss: check_unit("preview_weights.loss", w.loss.unwrap_or(d.loss))?,
                    spectrum: check_unit(
                        "preview_weights.spectrum",
                        w.spectrum.unwrap_or(d.spectrum),
                    )?,
                };
                check_sum(
                    "preview_weights",
                    &[pw.rtt, pw.bandwidth, pw.loss, pw.spectrum],
                )?;
                pw
            }
        };

        let load_aware_weights = match self.load_aware_weights {
            None => defaults.load_aware_weights,
            Some(w) => {
                let d = LoadAwareWeights::default();
                let lw = LoadAwareWeights {
                    rtt: check_unit("load_aware_weights.rtt", w.rtt.unwrap_or(d.rtt))?,
                    load: check_unit("load_aware_weights.load", w.load.unwrap_or(d.load))?,
                    stability: check_unit(
                        "load_aware_weights.stability",
                        w.stability.unwrap_or(d.stability),
                    )?,
                };
                check_sum("load_aware_weights", &[lw.rtt, lw.load, lw.stability])?;
                lw
            }
        };

        Ok(LinkCostConfig {
            measurement_interval: self
                .measurement_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.measurement_interval),
            measurement_timeout: self
                .measurement_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.measurement_timeout),
            max_cost_multiplier,
            cost_change_threshold,
            retry_limit: self.retry_limit.unwrap_or(defaults.retry_limit).max(1),
            warmup: self
                .warmup_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.warmup),
            status_report_interval: self
                .status_report_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.status_report_interval),
            probe_jitter_max: self
                .probe_jitter_max_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_jitter_max),
            rtt_history_capacity: self
                .rtt_history_capacity
                .unwrap_or(defaults.rtt_history_capacity)
                .max(10),
            min_rebuild_interval: self
                .min_rebuild_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.min_rebuild_interval),
            mode,
            feedback_weights,
            preview_weights,
            load_aware_weights,
        })
    }
}

impl LinkCostConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(LinkCostConfig::default());
        }
        let parsed: LinkCostConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }
}
