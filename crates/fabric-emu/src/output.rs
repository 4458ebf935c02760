//! Admitted-traffic reporting.
//!
//! Every core keeps one in-progress [`AdmittedTraffic`] record. Packets that
//! reach their destination sink, and packets the fabric drops, are appended
//! to it and released to the pool. At the end of the core's timeslot the
//! record is published on the output ring and a fresh one is taken from the
//! admitted pool.

use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use tracing::debug;

use crate::packet::{PacketId, PacketPool, FLAG_DROPPED, FLAG_ECN_MARK};
use crate::state::EmulationState;
use crate::stats::CoreStats;
use crate::types::{EndpointId, FlowId, RingFull, Timeslot};

/// One delivered (or dropped) MTU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admit {
    pub src: EndpointId,
    pub dst: EndpointId,
    pub flow: FlowId,
    pub id: u16,
    /// Packet flags at delivery: ECN mark and/or `FLAG_DROPPED`.
    pub flags: u16,
}

impl Admit {
    pub fn is_dropped(&self) -> bool {
        self.flags & FLAG_DROPPED != 0
    }

    pub fn is_marked(&self) -> bool {
        self.flags & FLAG_ECN_MARK != 0
    }
}

/// What one core admitted during one timeslot.
#[derive(Debug, Default)]
pub struct AdmittedTraffic {
    pub core: u16,
    pub timeslot: Timeslot,
    pub entries: Vec<Admit>,
}

impl AdmittedTraffic {
    pub fn delivered(&self) -> impl Iterator<Item = &Admit> {
        self.entries.iter().filter(|a| !a.is_dropped())
    }

    pub fn dropped(&self) -> impl Iterator<Item = &Admit> {
        self.entries.iter().filter(|a| a.is_dropped())
    }
}

/// Fixed pool of reusable admitted-traffic records.
pub struct AdmittedPool {
    free: ArrayQueue<Box<AdmittedTraffic>>,
}

impl AdmittedPool {
    pub fn new(size: usize) -> Self {
        let free = ArrayQueue::new(size.max(1));
        while free.push(Box::default()).is_ok() {}
        Self { free }
    }

    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn acquire(&self) -> Option<Box<AdmittedTraffic>> {
        self.free.pop()
    }

    pub fn release(&self, mut record: Box<AdmittedTraffic>) {
        record.entries.clear();
        let returned = self.free.push(record).is_ok();
        debug_assert!(returned, "admitted record released twice");
    }
}

/// Per-core sink for delivered, dropped and marked packets.
pub struct EmulationOutput {
    core: u16,
    state: Arc<EmulationState>,
    stats: Arc<CoreStats>,
    current: Option<Box<AdmittedTraffic>>,
}

impl EmulationOutput {
    pub fn new(core: u16, state: Arc<EmulationState>, stats: Arc<CoreStats>) -> Self {
        Self {
            core,
            state,
            stats,
            current: None,
        }
    }

    pub fn pool(&self) -> &PacketPool {
        &self.state.packets
    }

    pub fn state(&self) -> &Arc<EmulationState> {
        &self.state
    }

    pub fn stats(&self) -> &CoreStats {
        &self.stats
    }

    /// Packet reached its destination: record it and free it.
    pub fn admit(&mut self, pkt: PacketId) {
        let hdr = self.state.packets.header(&pkt);
        self.record().entries.push(Admit {
            src: hdr.src,
            dst: hdr.dst,
            flow: hdr.flow,
            id: hdr.id,
            flags: hdr.flags,
        });
        self.stats.delivered();
        self.state.packets.release(pkt);
    }

    /// Packet was dropped by a queue manager: report it and free it.
    pub fn drop_packet(&mut self, pkt: PacketId) {
        let hdr = self.state.packets.header(&pkt);
        self.record().entries.push(Admit {
            src: hdr.src,
            dst: hdr.dst,
            flow: hdr.flow,
            id: hdr.id,
            flags: hdr.flags | FLAG_DROPPED,
        });
        self.stats.dropped();
        self.state.packets.release(pkt);
    }

    pub fn mark_ecn(&self, pkt: &PacketId) {
        self.state.packets.mark_ecn(pkt);
        self.stats.marked();
    }

    /// Release without reporting (resets, teardown).
    pub fn free_packet(&self, pkt: PacketId) {
        self.state.packets.release(pkt);
    }

    /// Publish this timeslot's record and take the next one.
    pub fn flush(&mut self, now: Timeslot) {
        let mut record = match self.current.take() {
            Some(record) => record,
            None => acquire_record(&self.state, &self.stats),
        };
        record.core = self.core;
        record.timeslot = now;

        loop {
            match self.state.admitted_out.enqueue(record) {
                Ok(()) => break,
                Err(RingFull(back)) => {
                    self.stats.wait_for_admitted_enqueue();
                    debug!(core = self.core, now, "admitted output ring full, retrying");
                    record = back;
                    std::hint::spin_loop();
                }
            }
        }

        self.current = Some(acquire_record(&self.state, &self.stats));
    }

    /// Return the in-progress record to the admitted pool.
    pub fn cleanup(&mut self) {
        if let Some(record) = self.current.take() {
            self.state.admitted.release(record);
        }
    }

    fn record(&mut self) -> &mut AdmittedTraffic {
        let (state, stats) = (&self.state, &self.stats);
        self.current.get_or_insert_with(|| acquire_record(state, stats))
    }
}

fn acquire_record(state: &EmulationState, stats: &CoreStats) -> Box<AdmittedTraffic> {
    loop {
        if let Some(record) = state.admitted.acquire() {
            return record;
        }
        stats.admitted_alloc_failed();
        debug!("admitted pool exhausted, retrying");
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmulationConfig;
    use crate::packet::PacketHeader;

    fn output() -> EmulationOutput {
        let cfg = EmulationConfig::default()
            .with_packet_pool_size(16)
            .with_admitted_pool_size(4)
            .with_admitted_ring_size(4);
        let state = Arc::new(EmulationState::new(&cfg).unwrap());
        EmulationOutput::new(0, state, Arc::new(CoreStats::default()))
    }

    #[test]
    fn admitted_and_dropped_packets_are_reported_and_freed() {
        let mut out = output();
        let a = out.pool().create(PacketHeader::new(1, 2, 0, 7), &[]);
        let b = out.pool().create(PacketHeader::new(3, 2, 1, 8), &[]);
        out.mark_ecn(&a);
        out.admit(a);
        out.drop_packet(b);
        assert_eq!(out.pool().available(), 16);

        out.flush(5);
        let record = out.state().admitted_out.dequeue().unwrap();
        assert_eq!(record.timeslot, 5);
        assert_eq!(record.entries.len(), 2);
        assert_eq!(record.entries[0].flags, FLAG_ECN_MARK);
        assert!(record.entries[1].is_dropped());
        assert_eq!(record.delivered().count(), 1);

        let stats = out.stats().snapshot();
        assert_eq!((stats.delivered, stats.dropped, stats.marked), (1, 1, 1));
        out.state().admitted.release(record);
    }

    #[test]
    fn flush_publishes_empty_record_every_timeslot() {
        let mut out = output();
        out.flush(0);
        out.flush(1);
        assert_eq!(out.state().admitted_out.len(), 2);
        // two published, one in progress
        assert_eq!(out.state().admitted.available(), 1);

        while let Some(r) = out.state().admitted_out.dequeue() {
            assert!(r.entries.is_empty());
            out.state().admitted.release(r);
        }
        out.cleanup();
        assert_eq!(out.state().admitted.available(), 4);
    }
}
