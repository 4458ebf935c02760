//! Drivers move packets between one component and its rings, once per
//! timeslot.

use std::sync::Arc;

use tracing::trace;

use crate::config::Backpressure;
use crate::endpoint_group::EndpointGroup;
use crate::output::EmulationOutput;
use crate::packet::{PacketId, PacketPool};
use crate::ring::{send_packets, Ring, SendOutcome};
use crate::router::Router;
use crate::stats::CoreStats;
use crate::types::{EndpointId, PortId, Timeslot};

fn record_send(stats: &CoreStats, outcome: &SendOutcome) {
    if outcome.failures > 0 {
        stats.send_failed(outcome.failures as u64);
    }
    if outcome.lost > 0 {
        stats.packets_lost(outcome.lost as u64);
    }
}

/// Rings an endpoint driver is wired to.
pub struct EndpointRings {
    /// Backlog from the admission side.
    pub new_packets: Arc<Ring<PacketId>>,
    /// Packets arriving from the fabric for this rack.
    pub ingress: Arc<Ring<PacketId>>,
    /// Towards the rack's top-of-rack router.
    pub to_router: Arc<Ring<PacketId>>,
    /// Endpoint ids whose queued backlog should be discarded.
    pub resets: Arc<Ring<EndpointId>>,
}

pub struct EndpointDriver {
    group: EndpointGroup,
    rings: EndpointRings,
    policy: Backpressure,
    burst: usize,
    buf: Vec<PacketId>,
}

impl EndpointDriver {
    pub fn new(group: EndpointGroup, rings: EndpointRings, policy: Backpressure) -> Self {
        let burst = group.num_endpoints() as usize;
        Self {
            group,
            rings,
            policy,
            burst,
            buf: Vec::with_capacity(burst * 2),
        }
    }

    pub fn group(&self) -> &EndpointGroup {
        &self.group
    }

    /// Resets, then delivery from the fabric, then sending, then new backlog.
    /// Backlog processed at `now` is first sent at `now + 1`.
    pub fn step(&mut self, now: Timeslot, out: &mut EmulationOutput) {
        while let Some(endpoint) = self.rings.resets.dequeue() {
            let freed = self.group.reset(endpoint, out);
            out.stats().reset_applied(freed as u64);
        }

        // the router sends at most one packet per endpoint per timeslot, but
        // another core may be a timeslot ahead
        let pushed = self.rings.ingress.dequeue_burst(&mut self.buf, self.burst * 2);
        self.group.push_batch(&mut self.buf, out);
        out.stats().driver_pushed(pushed as u64);

        let pulled = self.group.pull_batch(&mut self.buf, self.burst, now, out);
        let outcome = send_packets(&self.rings.to_router, &mut self.buf, self.policy, out.pool());
        out.stats().driver_pulled(pulled as u64);
        out.stats().endpoint_sent(outcome.sent as u64);
        record_send(out.stats(), &outcome);

        let fresh = self.rings.new_packets.dequeue_burst(&mut self.buf, self.burst);
        self.group.new_packets(&mut self.buf, now, out);
        out.stats().driver_processed_new(fresh as u64);

        trace!(
            first = self.group.first_endpoint(),
            now,
            pushed,
            pulled,
            fresh,
            "endpoint driver step"
        );
    }

    /// Release everything this driver owns or consumes. Returns the number of
    /// packets reclaimed.
    pub fn cleanup(&mut self, pool: &PacketPool) -> usize {
        let mut freed = 0;
        for pkt in self.group.drain() {
            pool.release(pkt);
            freed += 1;
        }
        for ring in [&self.rings.ingress, &self.rings.new_packets] {
            while let Some(pkt) = ring.dequeue() {
                pool.release(pkt);
                freed += 1;
            }
        }
        while self.rings.resets.dequeue().is_some() {}
        freed
    }
}

/// Rings a router driver is wired to.
pub struct RouterRings {
    pub ingress: Arc<Ring<PacketId>>,
    /// Distinct next-hop rings.
    pub egress: Vec<Arc<Ring<PacketId>>>,
    /// `port_to_egress[port]` indexes `egress`.
    pub port_to_egress: Vec<usize>,
}

pub struct RouterDriver {
    router: Router,
    rings: RouterRings,
    policy: Backpressure,
    ingress_burst: usize,
    pulled: Vec<(PortId, PacketId)>,
    batches: Vec<Vec<PacketId>>,
    buf: Vec<PacketId>,
}

impl RouterDriver {
    pub fn new(router: Router, rings: RouterRings, policy: Backpressure, ingress_burst: usize) -> Self {
        debug_assert_eq!(rings.port_to_egress.len(), router.num_ports());
        let batches = rings.egress.iter().map(|_| Vec::new()).collect();
        Self {
            pulled: Vec::with_capacity(router.num_ports()),
            router,
            rings,
            policy,
            ingress_burst,
            batches,
            buf: Vec::with_capacity(ingress_burst),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Pull before push: a packet arriving at `now` leaves at `now + 1` at
    /// the earliest.
    pub fn step(&mut self, now: Timeslot, out: &mut EmulationOutput) {
        let max = self.router.num_ports();
        let pulled = self.router.pull_batch(&mut self.pulled, max, now, out);
        for (port, pkt) in self.pulled.drain(..) {
            self.batches[self.rings.port_to_egress[port as usize]].push(pkt);
        }
        for (ring, batch) in self.rings.egress.iter().zip(self.batches.iter_mut()) {
            let outcome = send_packets(ring, batch, self.policy, out.pool());
            out.stats().router_sent(outcome.sent as u64);
            record_send(out.stats(), &outcome);
        }
        out.stats().driver_pulled(pulled as u64);

        let pushed = self.rings.ingress.dequeue_burst(&mut self.buf, self.ingress_burst);
        self.router.push_batch(&mut self.buf, now, out);
        out.stats().driver_pushed(pushed as u64);

        trace!(router = self.router.id(), now, pulled, pushed, "router driver step");
    }

    pub fn cleanup(&mut self, pool: &PacketPool) -> usize {
        let mut freed = 0;
        for pkt in self.router.drain() {
            pool.release(pkt);
            freed += 1;
        }
        while let Some(pkt) = self.rings.ingress.dequeue() {
            pool.release(pkt);
            freed += 1;
        }
        freed
    }
}

/// Any driver an emulation core can own.
pub enum Driver {
    Endpoint(EndpointDriver),
    Router(RouterDriver),
}

impl Driver {
    pub fn step(&mut self, now: Timeslot, out: &mut EmulationOutput) {
        match self {
            Driver::Endpoint(d) => d.step(now, out),
            Driver::Router(d) => d.step(now, out),
        }
    }

    pub fn cleanup(&mut self, pool: &PacketPool) -> usize {
        match self {
            Driver::Endpoint(d) => d.cleanup(pool),
            Driver::Router(d) => d.cleanup(pool),
        }
    }
}
