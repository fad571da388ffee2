//! Boundary traits to the host routing daemon.
//!
//! The subsystem never talks to the network or the LSDB directly; everything
//! crosses these traits. The host treats the advertised link cost as
//! advisory and re-reads it on each LSA build, so `update_link_cost` is a
//! plain write-through into the adjacency entry.

use crate::name::NeighborName;
use crate::probe::ProbeRequest;

/// Services the host daemon provides to the subsystem.
pub trait HostServices {
    /// Ask the LSDB to rebuild this router's adjacency LSA. Requests are
    /// coalesced by the LSDB; the engine additionally promises at most one
    /// request per neighbor per rebuild interval.
    fn schedule_adj_lsa_build(&mut self);

    /// Ask for a routing-table recalculation.
    fn schedule_routing_table_calculation(&mut self);

    /// Write `cost` into the neighbor's adjacency entry. Returns `false`
    /// when the neighbor is not in the adjacency list.
    fn update_link_cost(&mut self, neighbor: &NeighborName, cost: f64) -> bool;

    /// Read the neighbor's currently stored adjacency cost, for post-update
    /// verification. `None` when the neighbor is unknown.
    fn link_cost(&self, neighbor: &NeighborName) -> Option<f64>;
}

/// The host's forwarding face, as far as this subsystem needs it.
pub trait ProbeFace {
    /// Express an RTT probe. Responses, nacks, and timeouts are routed back
    /// through the manager's `handle_probe_response` / `handle_probe_timeout`.
    fn send_probe(&mut self, probe: &ProbeRequest);
}

/// Signing hook into the host keychain.
pub trait Signer {
    fn sign(&self, payload: &[u8]) -> Vec<u8>;
}
