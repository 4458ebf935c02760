//! Per-port packet FIFOs.
//!
//! The bank owns every packet queued at a router or endpoint group and is the
//! single source of truth for occupancy. Occupancy and totals are mirrored into
//! a shared [`QueueBankStats`] so they can be read from other threads while the
//! owning driver keeps running.

use std::collections::vec_deque::Drain;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::packet::PacketId;
use crate::stats::PortSnapshot;
use crate::types::PortId;

#[derive(Debug, Default)]
struct PortCounters {
    occupancy: AtomicU32,
    peak: AtomicU32,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
    marked: AtomicU64,
}

/// Write-only counters for every port of one bank.
#[derive(Debug)]
pub struct QueueBankStats {
    ports: Box<[PortCounters]>,
}

impl QueueBankStats {
    fn new(num_ports: usize) -> Self {
        Self {
            ports: (0..num_ports).map(|_| PortCounters::default()).collect(),
        }
    }

    pub fn num_ports(&self) -> usize {
        self.ports.len()
    }

    /// Count a packet the queue manager refused at `port`.
    pub fn dropped(&self, port: PortId) {
        self.ports[port as usize].dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a packet ECN-marked at `port`.
    pub fn marked(&self, port: PortId) {
        self.ports[port as usize].marked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Vec<PortSnapshot> {
        self.ports
            .iter()
            .map(|p| PortSnapshot {
                occupancy: p.occupancy.load(Ordering::Relaxed),
                peak_occupancy: p.peak.load(Ordering::Relaxed),
                enqueued: p.enqueued.load(Ordering::Relaxed),
                dequeued: p.dequeued.load(Ordering::Relaxed),
                dropped: p.dropped.load(Ordering::Relaxed),
                marked: p.marked.load(Ordering::Relaxed),
            })
            .collect()
    }
}

pub struct QueueBank {
    queues: Vec<VecDeque<PacketId>>,
    stats: Arc<QueueBankStats>,
}

impl QueueBank {
    pub fn new(num_ports: usize) -> Self {
        Self {
            queues: (0..num_ports).map(|_| VecDeque::new()).collect(),
            stats: Arc::new(QueueBankStats::new(num_ports)),
        }
    }

    pub fn num_ports(&self) -> usize {
        self.queues.len()
    }

    pub fn stats(&self) -> &Arc<QueueBankStats> {
        &self.stats
    }

    pub fn enqueue(&mut self, port: PortId, pkt: PacketId) {
        let queue = &mut self.queues[port as usize];
        queue.push_back(pkt);
        let len = queue.len() as u32;
        let counters = &self.stats.ports[port as usize];
        counters.occupancy.store(len, Ordering::Relaxed);
        counters.peak.fetch_max(len, Ordering::Relaxed);
        counters.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dequeue(&mut self, port: PortId) -> Option<PacketId> {
        let queue = &mut self.queues[port as usize];
        let pkt = queue.pop_front()?;
        let counters = &self.stats.ports[port as usize];
        counters.occupancy.store(queue.len() as u32, Ordering::Relaxed);
        counters.dequeued.fetch_add(1, Ordering::Relaxed);
        Some(pkt)
    }

    pub fn len(&self, port: PortId) -> u32 {
        self.queues[port as usize].len() as u32
    }

    pub fn is_empty(&self, port: PortId) -> bool {
        self.queues[port as usize].is_empty()
    }

    /// Packets queued across all ports.
    pub fn total_len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Remove every packet queued at `port`. Drained packets are not counted
    /// as dequeued.
    pub fn drain(&mut self, port: PortId) -> Drain<'_, PacketId> {
        self.stats.ports[port as usize]
            .occupancy
            .store(0, Ordering::Relaxed);
        self.queues[port as usize].drain(..)
    }

    /// Remove every packet from every port.
    pub fn drain_all(&mut self) -> Vec<PacketId> {
        let mut out = Vec::with_capacity(self.total_len());
        for port in 0..self.queues.len() {
            out.extend(self.drain(port as PortId));
        }
        out
    }
}
