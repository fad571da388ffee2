//! # Metrics Control Channel
//!
//! Request/response handlers under `<own-router>/link-cost/metrics`:
//!
//! - **set** — upsert operator-supplied link metrics after range validation
//! - **get** — snapshot a neighbor plus its multi-dimensional preview cost
//!
//! The preview cost fuses measured RTT with the external metrics into a
//! single diagnostic number. It never enters the routing table; the channel
//! is read-only with respect to actual routing costs.
//!
//! Each factor maps its input into `[1.0, 2.0]` and the composite is a
//! weighted sum of the four factors, so the preview always lands in
//! `[original_cost, 2 × original_cost]`.

use quanta::Instant;
use serde::Serialize;
use thiserror::Error;

use crate::config::PreviewWeights;
use crate::name::NeighborName;
use crate::store::{ExternalMetrics, ExternalMetricsPatch, LinkSnapshot, LinkStateStore};

/// Defaults substituted for absent inputs when computing factors.
const DEFAULT_RTT_MS: f64 = 20.0;
const DEFAULT_UTILIZATION: f64 = 0.30;
const DEFAULT_PACKET_LOSS: f64 = 0.01;
const DEFAULT_SPECTRUM_DBM: f64 = -50.0;

#[derive(Debug, Error, PartialEq)]
pub enum ChannelError {
    #[error("unknown neighbor {0}")]
    NotFound(NeighborName),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

// ─── Requests & replies ─────────────────────────────────────────────────────

/// A control-channel request.
#[derive(Debug, Clone)]
pub enum MetricsRequest {
    Set {
        neighbor: NeighborName,
        patch: ExternalMetricsPatch,
    },
    Get {
        neighbor: NeighborName,
    },
}

/// Acknowledgement for `set`, echoing the merged values.
#[derive(Debug, Clone)]
pub struct SetReply {
    pub neighbor: NeighborName,
    pub bandwidth_mbps: Option<f64>,
    pub utilization: Option<f64>,
    pub packet_loss: Option<f64>,
    pub spectrum_dbm: Option<f64>,
}

/// The four preview factors, each in `[1.0, 2.0]`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PreviewFactors {
    pub rtt: f64,
    pub bandwidth: f64,
    pub loss: f64,
    pub spectrum: f64,
}

/// The multi-dimensional preview cost. Diagnostic only.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PreviewCost {
    pub cost: u64,
    pub composite: f64,
    pub factors: PreviewFactors,
}

/// Reply for `get`. Serialized verbatim into the response message when the
/// operator asks for machine-readable output (`link-metrics show --json`).
#[derive(Debug, Clone, Serialize)]
pub struct GetReply {
    pub snapshot: LinkSnapshot,
    pub preview: PreviewCost,
}

#[derive(Debug, Clone)]
pub enum MetricsReply {
    Set(SetReply),
    Get(Box<GetReply>),
}

// ─── Factors ────────────────────────────────────────────────────────────────

/// RTT factor: 20 ms when unmeasured, saturating at 200 ms.
pub fn rtt_factor(avg_rtt_ms: Option<f64>) -> f64 {
    let v = avg_rtt_ms.unwrap_or(DEFAULT_RTT_MS);
    if v <= 0.0 {
        1.0
    } else if v >= 200.0 {
        2.0
    } else {
        1.0 + v / 200.0
    }
}

/// Bandwidth-utilization factor: 0.30 when unset.
pub fn bandwidth_factor(utilization: Option<f64>) -> f64 {
    let u = utilization.unwrap_or(DEFAULT_UTILIZATION);
    if u <= 0.0 {
        1.0
    } else if u >= 1.0 {
        2.0
    } else {
        1.0 + u
    }
}

/// Packet-loss factor: 0.01 when unset, saturating at 50% loss.
pub fn loss_factor(packet_loss: Option<f64>) -> f64 {
    let l = packet_loss.unwrap_or(DEFAULT_PACKET_LOSS);
    if l <= 0.0 {
        1.0
    } else if l >= 0.5 {
        2.0
    } else {
        1.0 + 2.0 * l
    }
}

/// Spectrum-strength factor: −50 dBm when unset; −30 dBm or better is
/// perfect, −80 dBm or worse is the ceiling.
pub fn spectrum_factor(spectrum_dbm: Option<f64>) -> f64 {
    let s = spectrum_dbm.unwrap_or(DEFAULT_SPECTRUM_DBM);
    if s >= -30.0 {
        1.0
    } else if s <= -80.0 {
        2.0
    } else {
        1.0 + (-30.0 - s) / 50.0
    }
}

/// Compute the preview cost for a link.
pub fn preview_cost(
    weights: &PreviewWeights,
    original_cost: u64,
    avg_rtt_ms: Option<f64>,
    external: Option<&ExternalMetrics>,
) -> PreviewCost {
    let factors = PreviewFactors {
        rtt: rtt_factor(avg_rtt_ms),
        bandwidth: bandwidth_factor(external.and_then(|m| m.utilization)),
        loss: loss_factor(external.and_then(|m| m.packet_loss)),
        spectrum: spectrum_factor(external.and_then(|m| m.spectrum_dbm)),
    };
    let composite = weights.rtt * factors.rtt
        + weights.bandwidth * factors.bandwidth
        + weights.loss * factors.loss
        + weights.spectrum * factors.spectrum;
    PreviewCost {
        cost: (original_cost as f64 * composite).round() as u64,
        composite,
        factors,
    }
}

// ─── Validation ─────────────────────────────────────────────────────────────

fn validate_patch(patch: &ExternalMetricsPatch) -> Result<(), ChannelError> {
    if let Some(bw) = patch.bandwidth_mbps {
        if !bw.is_finite() || bw < 0.0 {
            return Err(ChannelError::InvalidArgument(format!(
                "bandwidth must be a non-negative number of Mbps, got {bw}"
            )));
        }
    }
    if let Some(u) = patch.utilization {
        if !u.is_finite() || !(0.0..=1.0).contains(&u) {
            return Err(ChannelError::InvalidArgument(format!(
                "utilization must be within [0, 1], got {u}"
            )));
        }
    }
    if let Some(l) = patch.packet_loss {
        if !l.is_finite() || !(0.0..=1.0).contains(&l) {
            return Err(ChannelError::InvalidArgument(format!(
                "packet loss must be within [0, 1], got {l}"
            )));
        }
    }
    if let Some(s) = patch.spectrum_dbm {
        if !s.is_finite() {
            return Err(ChannelError::InvalidArgument(format!(
                "spectrum strength must be a finite dBm value, got {s}"
            )));
        }
        if !(-100.0..=-20.0).contains(&s) {
            tracing::debug!(spectrum_dbm = s, "spectrum outside the meaningful -100..-20 dBm range");
        }
    }
    Ok(())
}

// ─── Dispatch ───────────────────────────────────────────────────────────────

/// Handle one control-channel request against the store.
pub fn dispatch(
    store: &mut LinkStateStore,
    weights: &PreviewWeights,
    request: MetricsRequest,
    now: Instant,
) -> Result<MetricsReply, ChannelError> {
    match request {
        MetricsRequest::Set { neighbor, patch } => {
            validate_patch(&patch)?;
            let merged = store
                .apply_external_metrics(&neighbor, patch, now)
                .ok_or_else(|| ChannelError::NotFound(neighbor.clone()))?;
            tracing::info!(%neighbor, "external link metrics updated");
            Ok(MetricsReply::Set(SetReply {
                neighbor,
                bandwidth_mbps: merged.bandwidth_mbps,
                utilization: merged.utilization,
                packet_loss: merged.packet_loss,
                spectrum_dbm: merged.spectrum_dbm,
            }))
        }
        MetricsRequest::Get { neighbor } => {
            let snapshot = store
                .snapshot(&neighbor, now)
                .ok_or_else(|| ChannelError::NotFound(neighbor.clone()))?;
            let external = store.get(&neighbor).and_then(|link| link.external_metrics);
            let preview = preview_cost(
                weights,
                snapshot.original_cost,
                snapshot.average_rtt_ms,
                external.as_ref(),
            );
            Ok(MetricsReply::Get(Box::new(GetReply { snapshot, preview })))
        }
    }
}
