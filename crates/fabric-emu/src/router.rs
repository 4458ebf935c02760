//! Emulated router: classifier, queue manager and scheduler over a queue bank.
//!
//! A router is driven once per timeslot. `push` classifies arriving packets
//! to an output port and runs the admission policy; `pull` lets every
//! non-empty port send one MTU (the link rate is one MTU per timeslot).

use std::sync::Arc;

use tracing::trace;

use crate::classifier::Classifier;
use crate::config::RouterPolicy;
use crate::output::EmulationOutput;
use crate::packet::PacketId;
use crate::queue_bank::{QueueBank, QueueBankStats};
use crate::queue_manager::QueueManager;
use crate::scheduler::Scheduler;
use crate::types::{Error, PortId, Result, Timeslot, Verdict};

pub struct Router {
    id: u16,
    policy: &'static str,
    bank: QueueBank,
    classifier: Classifier,
    qm: QueueManager,
    scheduler: Scheduler,
    /// First port visited by the next `pull_batch`, rotated for fairness when
    /// `max` is smaller than the number of busy ports.
    next_port: usize,
}

impl Router {
    pub fn new(id: u16, classifier: Classifier, policy: &RouterPolicy, seed: u64) -> Result<Self> {
        let num_ports = classifier.num_ports();
        if num_ports == 0 {
            return Err(Error::Topology(format!("router {id} has no ports")));
        }
        Ok(Self {
            id,
            policy: policy.name(),
            bank: QueueBank::new(num_ports),
            qm: QueueManager::for_policy(policy, num_ports, seed),
            scheduler: Scheduler::for_policy(policy, num_ports),
            classifier,
            next_port: 0,
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy
    }

    pub fn num_ports(&self) -> usize {
        self.bank.num_ports()
    }

    pub fn bank(&self) -> &QueueBank {
        &self.bank
    }

    pub fn stats(&self) -> Arc<QueueBankStats> {
        self.bank.stats().clone()
    }

    /// Classify `pkt` and hand it to the queue manager.
    pub fn push(&mut self, pkt: PacketId, now: Timeslot, out: &mut EmulationOutput) -> Verdict {
        let hdr = out.pool().header(&pkt);
        let port = self.classifier.classify(&hdr);
        self.qm.enqueue(&mut self.bank, port, pkt, now, out)
    }

    /// Push every packet in `pkts`, leaving it empty. Returns how many were
    /// queued (marked packets included).
    pub fn push_batch(
        &mut self,
        pkts: &mut Vec<PacketId>,
        now: Timeslot,
        out: &mut EmulationOutput,
    ) -> usize {
        let mut queued = 0;
        for pkt in pkts.drain(..) {
            if self.push(pkt, now, out) != Verdict::Dropped {
                queued += 1;
            }
        }
        queued
    }

    /// Schedule one packet from `port`.
    pub fn pull(&mut self, port: PortId, now: Timeslot, out: &mut EmulationOutput) -> Option<PacketId> {
        self.scheduler.schedule(&mut self.bank, port, now, out)
    }

    /// Pull at most one packet from each non-empty port, up to `max` in
    /// total, appending `(port, packet)` pairs to `sent`.
    pub fn pull_batch(
        &mut self,
        sent: &mut Vec<(PortId, PacketId)>,
        max: usize,
        now: Timeslot,
        out: &mut EmulationOutput,
    ) -> usize {
        let num_ports = self.num_ports();
        let start = self.next_port;
        let mut n = 0;
        for i in 0..num_ports {
            if n == max {
                break;
            }
            let port = ((start + i) % num_ports) as PortId;
            if let Some(pkt) = self.pull(port, now, out) {
                sent.push((port, pkt));
                n += 1;
            }
        }
        self.next_port = (start + 1) % num_ports;
        if n > 0 {
            trace!(router = self.id, now, pulled = n, "router pull");
        }
        n
    }

    /// Remove every queued packet, for teardown.
    pub fn drain(&mut self) -> Vec<PacketId> {
        self.bank.drain_all()
    }
}
