//! # Link Performance Feedback
//!
//! After each accepted measurement the manager publishes a scalar
//! performance signal to the registered adaptive calculator, closing the
//! learning loop. The signal is a weighted blend of four scores, each in
//! `[0, 1]` with **lower meaning better**:
//!
//! - RTT level — piecewise-linear over the 10/50/100/200 ms experience bands
//! - stability — coefficient of variation over the last five samples
//! - reliability — consecutive hello timeouts
//! - trend — last three samples against the three before them

use crate::config::FeedbackWeights;
use crate::store::LinkState;

/// RTT below this is imperceptible.
const RTT_EXCELLENT_MS: f64 = 10.0;
const RTT_GOOD_MS: f64 = 50.0;
const RTT_FAIR_MS: f64 = 100.0;
const RTT_POOR_MS: f64 = 200.0;

/// Samples considered by the stability score.
const STABILITY_WINDOW: usize = 5;
/// Samples required for a trend comparison (3 recent vs 3 prior).
const TREND_WINDOW: usize = 6;

/// Map an RTT level to a badness score.
pub fn rtt_score(rtt_ms: f64) -> f64 {
    if rtt_ms <= RTT_EXCELLENT_MS {
        0.0
    } else if rtt_ms <= RTT_GOOD_MS {
        (rtt_ms - RTT_EXCELLENT_MS) / (RTT_GOOD_MS - RTT_EXCELLENT_MS) * 0.3
    } else if rtt_ms <= RTT_FAIR_MS {
        0.3 + (rtt_ms - RTT_GOOD_MS) / (RTT_FAIR_MS - RTT_GOOD_MS) * 0.3
    } else if rtt_ms <= RTT_POOR_MS {
        0.6 + (rtt_ms - RTT_FAIR_MS) / (RTT_POOR_MS - RTT_FAIR_MS) * 0.3
    } else {
        0.9 + ((rtt_ms - RTT_POOR_MS) / 800.0 * 0.1).min(0.1)
    }
}

/// Coefficient of variation over the most recent samples, mapped to a
/// badness score. Fewer than three samples scores a neutral 0.5.
pub fn stability_score(link: &LinkState) -> f64 {
    if link.rtt_history.len() < 3 {
        return 0.5;
    }
    let window = link.rtt_history.len().min(STABILITY_WINDOW);
    let recent = link.rtt_history.iter().rev().take(window);

    let mut sum = 0.0;
    let mut sum_squares = 0.0;
    for sample in recent {
        let ms = sample.rtt.as_millis() as f64;
        sum += ms;
        sum_squares += ms * ms;
    }
    let mean = sum / window as f64;
    let variance = (sum_squares / window as f64 - mean * mean).max(0.0);
    let cv = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };

    if cv <= 0.1 {
        0.0
    } else if cv <= 0.3 {
        cv / 0.3 * 0.4
    } else {
        0.4 + ((cv - 0.3) / 0.7 * 0.6).min(0.6)
    }
}

/// Badness from consecutive hello timeouts.
pub fn reliability_score(timeout_count: u32) -> f64 {
    match timeout_count {
        0 => 0.0,
        1..=2 => 0.2,
        3..=5 => 0.5,
        _ => 0.8,
    }
}

/// Compare the mean of the last three samples against the prior three.
/// Needs six samples; anything less scores 0 (no evidence of degradation).
pub fn trend_score(link: &LinkState) -> f64 {
    let len = link.rtt_history.len();
    if len < TREND_WINDOW {
        return 0.0;
    }

    let ms = |i: usize| link.rtt_history[i].rtt.as_millis() as f64;
    let recent: f64 = (len - 3..len).map(ms).sum::<f64>() / 3.0;
    let previous: f64 = (len - 6..len - 3).map(ms).sum::<f64>() / 3.0;

    if previous <= 0.0 {
        return 0.0;
    }
    let change = (recent - previous) / previous;
    if change <= -0.1 {
        0.0
    } else if change <= 0.1 {
        0.2
    } else if change <= 0.3 {
        0.5
    } else {
        0.8
    }
}

/// Weighted overall performance for a link, given the RTT of the
/// just-accepted measurement. Clamped to `[0, 1]`; lower is better.
pub fn evaluate(weights: &FeedbackWeights, link: &LinkState, current_rtt_ms: f64) -> f64 {
    let total = weights.rtt * rtt_score(current_rtt_ms)
        + weights.stability * stability_score(link)
        + weights.reliability * reliability_score(link.timeout_count)
        + weights.trend * trend_score(link);
    total.clamp(0.0, 1.0)
}
