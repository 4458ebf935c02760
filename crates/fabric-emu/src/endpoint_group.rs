//! A rack's worth of emulated endpoints.
//!
//! Outbound, each endpoint has a queue of backlog waiting to be sent and
//! sends at most one MTU per timeslot. Inbound, the group is the sink: every
//! packet it receives has reached its destination and is admitted.

use std::sync::Arc;

use tracing::trace;

use crate::classifier::Classifier;
use crate::output::EmulationOutput;
use crate::packet::PacketId;
use crate::queue_bank::{QueueBank, QueueBankStats};
use crate::queue_manager::QueueManager;
use crate::scheduler::Scheduler;
use crate::types::{EndpointId, PortId, Timeslot, Verdict};

pub struct EndpointGroup {
    first: EndpointId,
    count: u16,
    bank: QueueBank,
    classifier: Classifier,
    qm: QueueManager,
    scheduler: Scheduler,
}

impl EndpointGroup {
    /// Endpoints `first..first + count`, each with a drop-tail send queue of
    /// `queue_capacity` packets.
    pub fn new(first: EndpointId, count: u16, queue_capacity: u32) -> Self {
        Self {
            first,
            count,
            bank: QueueBank::new(count as usize),
            classifier: Classifier::BySource { first, count },
            qm: QueueManager::drop_tail(queue_capacity),
            scheduler: Scheduler::Fifo,
        }
    }

    pub fn first_endpoint(&self) -> EndpointId {
        self.first
    }

    pub fn num_endpoints(&self) -> u16 {
        self.count
    }

    pub fn contains(&self, endpoint: EndpointId) -> bool {
        endpoint >= self.first && endpoint - self.first < self.count
    }

    pub fn bank(&self) -> &QueueBank {
        &self.bank
    }

    pub fn stats(&self) -> Arc<QueueBankStats> {
        self.bank.stats().clone()
    }

    /// Queue freshly admitted backlog at its source endpoint.
    pub fn new_packets(
        &mut self,
        pkts: &mut Vec<PacketId>,
        now: Timeslot,
        out: &mut EmulationOutput,
    ) -> usize {
        let mut queued = 0;
        for pkt in pkts.drain(..) {
            let hdr = out.pool().header(&pkt);
            let port = self.classifier.classify(&hdr);
            if self.qm.enqueue(&mut self.bank, port, pkt, now, out) != Verdict::Dropped {
                queued += 1;
            }
        }
        queued
    }

    /// Packets arriving from the network: deliver to the sink.
    pub fn push_batch(&mut self, pkts: &mut Vec<PacketId>, out: &mut EmulationOutput) -> usize {
        let n = pkts.len();
        for pkt in pkts.drain(..) {
            debug_assert!(
                self.contains(out.pool().header(&pkt).dst),
                "packet delivered to the wrong endpoint group"
            );
            out.admit(pkt);
        }
        n
    }

    /// Let each endpoint send at most one packet, up to `max` in total.
    pub fn pull_batch(
        &mut self,
        sent: &mut Vec<PacketId>,
        max: usize,
        now: Timeslot,
        out: &mut EmulationOutput,
    ) -> usize {
        let mut n = 0;
        for port in 0..self.count {
            if n == max {
                break;
            }
            if let Some(pkt) = self.scheduler.schedule(&mut self.bank, port, now, out) {
                sent.push(pkt);
                n += 1;
            }
        }
        n
    }

    /// Discard everything `endpoint` still has queued. Returns how many
    /// packets were released.
    pub fn reset(&mut self, endpoint: EndpointId, out: &EmulationOutput) -> usize {
        assert!(self.contains(endpoint), "reset for endpoint {endpoint} outside group");
        let port = (endpoint - self.first) as PortId;
        let mut freed = 0;
        for pkt in self.bank.drain(port) {
            out.free_packet(pkt);
            freed += 1;
        }
        trace!(endpoint, freed, "endpoint reset");
        freed
    }

    /// Remove every queued packet, for teardown.
    pub fn drain(&mut self) -> Vec<PacketId> {
        self.bank.drain_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmulationConfig;
    use crate::packet::PacketHeader;
    use crate::state::EmulationState;
    use crate::stats::CoreStats;

    fn output() -> EmulationOutput {
        let cfg = EmulationConfig::default().with_packet_pool_size(64);
        let state = Arc::new(EmulationState::new(&cfg).unwrap());
        EmulationOutput::new(0, state, Arc::new(CoreStats::default()))
    }

    fn backlog(out: &EmulationOutput, src: EndpointId, dst: EndpointId, n: u16) -> Vec<PacketId> {
        (0..n)
            .map(|i| out.pool().create(PacketHeader::new(src, dst, 0, i), &[]))
            .collect()
    }

    #[test]
    fn each_endpoint_sends_one_packet_per_timeslot() {
        let mut out = output();
        let mut group = EndpointGroup::new(8, 8, 16);
        let mut pkts = backlog(&out, 8, 1, 3);
        pkts.extend(backlog(&out, 10, 1, 2));
        assert_eq!(group.new_packets(&mut pkts, 0, &mut out), 5);

        let mut sent = Vec::new();
        assert_eq!(group.pull_batch(&mut sent, 64, 0, &mut out), 2);
        assert_eq!(group.pull_batch(&mut sent, 64, 1, &mut out), 2);
        assert_eq!(group.pull_batch(&mut sent, 64, 2, &mut out), 1);
        assert_eq!(group.pull_batch(&mut sent, 64, 3, &mut out), 0);
        let srcs: Vec<_> = sent.iter().map(|p| out.pool().header(p).src).collect();
        assert_eq!(srcs, vec![8, 10, 8, 10, 8]);
    }

    #[test]
    fn reset_drains_and_releases_only_that_endpoint() {
        let mut out = output();
        let mut group = EndpointGroup::new(0, 4, 16);
        let mut pkts = backlog(&out, 2, 0, 5);
        pkts.extend(backlog(&out, 3, 0, 2));
        group.new_packets(&mut pkts, 0, &mut out);
        assert_eq!(out.pool().in_use(), 7);

        assert_eq!(group.reset(2, &out), 5);
        assert_eq!(out.pool().in_use(), 2);
        assert!(group.bank().is_empty(2));
        assert_eq!(group.bank().len(3), 2);
        // resetting an idle endpoint is a no-op
        assert_eq!(group.reset(2, &out), 0);
    }

    #[test]
    fn sink_admits_and_frees() {
        let mut out = output();
        let mut group = EndpointGroup::new(0, 4, 16);
        let mut pkts = backlog(&out, 6, 3, 2);
        assert_eq!(group.push_batch(&mut pkts, &mut out), 2);
        assert_eq!(out.pool().in_use(), 0);
        assert_eq!(out.stats().snapshot().delivered, 2);
    }

    #[test]
    fn full_send_queue_drops_backlog() {
        let mut out = output();
        let mut group = EndpointGroup::new(0, 2, 3);
        let mut pkts = backlog(&out, 1, 0, 5);
        assert_eq!(group.new_packets(&mut pkts, 0, &mut out), 3);
        assert_eq!(out.pool().in_use(), 3);
    }
}
