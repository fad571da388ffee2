//! # RTT Probes
//!
//! Probe naming, the pending-measurement map, and the probe responder.
//!
//! An outbound probe is addressed to `<neighbor>/link-cost/rtt-probe/<seq>`
//! with a lifetime equal to the configured measurement timeout. The sequence
//! number is the measurement token: the pending map keys on it, so
//! out-of-order responses resolve to the right send time and duplicate or
//! stale responses fall through harmlessly.
//!
//! The responder side answers probes addressed to this router with a fixed
//! payload, a 1 s freshness period, and a fresh signature from the host's
//! keychain. No per-response state is kept.

use quanta::Instant;
use std::collections::HashMap;
use std::time::Duration;

use crate::host::Signer;
use crate::name::NeighborName;

/// First name component of the subsystem's namespace.
pub const SUBSYSTEM_COMPONENT: &str = "link-cost";
/// Second name component of the RTT probe namespace.
pub const RTT_PROBE_COMPONENT: &str = "rtt-probe";

/// Freshness period of probe responses.
pub const RESPONSE_FRESHNESS: Duration = Duration::from_millis(1000);
/// Fixed probe response payload.
pub const RESPONSE_PAYLOAD: &[u8] = b"rtt-response";

/// `<router>/link-cost/rtt-probe` — the reception filter for `router`.
pub fn probe_prefix(router: &NeighborName) -> NeighborName {
    router.append(SUBSYSTEM_COMPONENT).append(RTT_PROBE_COMPONENT)
}

// ─── Outbound probes ────────────────────────────────────────────────────────

/// An outbound RTT probe, handed to the host face.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    /// Full probe name: `<neighbor>/link-cost/rtt-probe/<seq>`.
    pub name: NeighborName,
    /// The probed neighbor.
    pub neighbor: NeighborName,
    /// Measurement token.
    pub seq: u32,
    /// Probe lifetime; expiry converges with nack and network timeout.
    pub lifetime: Duration,
}

impl ProbeRequest {
    pub fn new(neighbor: &NeighborName, seq: u32, lifetime: Duration) -> Self {
        ProbeRequest {
            name: probe_prefix(neighbor).append(&seq.to_string()),
            neighbor: neighbor.clone(),
            seq,
            lifetime,
        }
    }
}

// ─── Responder ──────────────────────────────────────────────────────────────

/// A signed probe response.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    /// Echoes the probe name.
    pub name: NeighborName,
    pub payload: Vec<u8>,
    pub freshness: Duration,
    pub signature: Vec<u8>,
}

/// Answers probes addressed to this router. Stateless.
#[derive(Debug, Clone)]
pub struct ProbeResponder {
    prefix: NeighborName,
}

impl ProbeResponder {
    pub fn new(own_router: &NeighborName) -> Self {
        let prefix = probe_prefix(own_router);
        tracing::debug!(%prefix, "registering RTT probe prefix");
        ProbeResponder { prefix }
    }

    /// The name prefix the host should register a reception filter on.
    pub fn prefix(&self) -> &NeighborName {
        &self.prefix
    }

    /// Answer a probe. Returns `None` for names outside our prefix.
    pub fn respond(&self, request_name: &NeighborName, signer: &dyn Signer) -> Option<ProbeResponse> {
        if !self.prefix.is_prefix_of(request_name) {
            return None;
        }
        let signature = signer.sign(RESPONSE_PAYLOAD);
        tracing::trace!(name = %request_name, "RTT response sent");
        Some(ProbeResponse {
            name: request_name.clone(),
            payload: RESPONSE_PAYLOAD.to_vec(),
            freshness: RESPONSE_FRESHNESS,
            signature,
        })
    }
}

// ─── Pending measurements ───────────────────────────────────────────────────

/// In-flight probes keyed by sequence number.
#[derive(Debug, Default)]
pub struct PendingMeasurements {
    pending: HashMap<u32, (NeighborName, Instant)>,
    next_seq: u32,
}

impl PendingMeasurements {
    pub fn new() -> Self {
        PendingMeasurements {
            pending: HashMap::new(),
            next_seq: 1,
        }
    }

    /// Allocate the next measurement token.
    pub fn next_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    pub fn insert(&mut self, seq: u32, neighbor: NeighborName, sent_at: Instant) {
        self.pending.insert(seq, (neighbor, sent_at));
    }

    /// Resolve a token; removal makes duplicate responses no-ops.
    pub fn take(&mut self, seq: u32) -> Option<(NeighborName, Instant)> {
        self.pending.remove(&seq)
    }

    /// Drop every in-flight probe for `neighbor` (decline path).
    pub fn drop_neighbor(&mut self, neighbor: &NeighborName) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, (n, _)| n != neighbor);
        before - self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quanta::Clock;

    struct NullSigner;
    impl Signer for NullSigner {
        fn sign(&self, _payload: &[u8]) -> Vec<u8> {
            vec![0xAB; 32]
        }
    }

    // ─── Naming ─────────────────────────────────────────────────────────

    #[test]
    fn probe_name_layout() {
        let neighbor = NeighborName::new("/nd/router-b");
        let probe = ProbeRequest::new(&neighbor, 42, Duration::from_secs(2));
        assert_eq!(probe.name.to_string(), "/nd/router-b/link-cost/rtt-probe/42");
        assert_eq!(probe.seq, 42);
        assert_eq!(probe.lifetime, Duration::from_secs(2));
    }

    // ─── Responder ──────────────────────────────────────────────────────

    #[test]
    fn responder_answers_own_prefix() {
        let own = NeighborName::new("/nd/router-a");
        let responder = ProbeResponder::new(&own);
        let request = probe_prefix(&own).append("7");

        let response = responder.respond(&request, &NullSigner).unwrap();
        assert_eq!(response.name, request);
        assert_eq!(response.payload, RESPONSE_PAYLOAD);
        assert_eq!(response.freshness, Duration::from_millis(1000));
        assert!(!response.signature.is_empty());
    }

    #[test]
    fn responder_ignores_foreign_names() {
        let responder = ProbeResponder::new(&NeighborName::new("/nd/router-a"));
        let foreign = probe_prefix(&NeighborName::new("/nd/router-b")).append("7");
        assert!(responder.respond(&foreign, &NullSigner).is_none());
    }

    // ─── Pending map ────────────────────────────────────────────────────

    #[test]
    fn sequence_numbers_are_monotonic() {
        let mut pending = PendingMeasurements::new();
        let first = pending.next_seq();
        let second = pending.next_seq();
        assert_eq!(second, first + 1);
    }

    #[test]
    fn take_resolves_once() {
        let (clock, _mock) = Clock::mock();
        let mut pending = PendingMeasurements::new();
        let n = NeighborName::new("/r/a");
        pending.insert(5, n.clone(), clock.now());

        assert_eq!(pending.take(5).unwrap().0, n);
        assert!(pending.take(5).is_none(), "duplicate response is a no-op");
    }

    #[test]
    fn drop_neighbor_removes_only_its_probes() {
        let (clock, _mock) = Clock::mock();
        let mut pending = PendingMeasurements::new();
        let a = NeighborName::new("/r/a");
        let b = NeighborName::new("/r/b");
        pending.insert(1, a.clone(), clock.now());
        pending.insert(2, a.clone(), clock.now());
        pending.insert(3, b.clone(), clock.now());

        assert_eq!(pending.drop_neighbor(&a), 2);
        assert_eq!(pending.len(), 1);
        assert!(pending.take(3).is_some());
    }
}
