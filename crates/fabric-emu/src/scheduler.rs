//! Output scheduling: which packet leaves a port.

use crate::config::{HullConfig, RouterPolicy};
use crate::output::EmulationOutput;
use crate::packet::PacketId;
use crate::queue_bank::QueueBank;
use crate::types::{PortId, Timeslot};

pub enum Scheduler {
    Fifo,
    Hull(HullScheduler),
}

impl Scheduler {
    pub fn for_policy(policy: &RouterPolicy, num_ports: usize) -> Self {
        match policy {
            RouterPolicy::Hull(cfg) => Scheduler::Hull(HullScheduler::new(cfg, num_ports)),
            RouterPolicy::DropTail(_) | RouterPolicy::Red(_) => Scheduler::Fifo,
        }
    }

    /// Dequeue the head of `port`, if any. `now` must not go backwards.
    pub fn schedule(
        &mut self,
        bank: &mut QueueBank,
        port: PortId,
        now: Timeslot,
        out: &mut EmulationOutput,
    ) -> Option<PacketId> {
        let pkt = bank.dequeue(port)?;
        if let Scheduler::Hull(hull) = self {
            if hull.on_departure(port, now) {
                out.mark_ecn(&pkt);
                bank.stats().marked(port);
            }
        }
        Some(pkt)
    }
}

/// HULL phantom queues: a virtual queue per port drained slightly slower than
/// the link. Packets leaving while the phantom is over threshold get marked,
/// signalling congestion before the real queue builds.
pub struct HullScheduler {
    gamma: f64,
    mark_threshold: f64,
    mtu: f64,
    phantom_len: Vec<f64>,
    last_update: Vec<Timeslot>,
}

impl HullScheduler {
    pub fn new(cfg: &HullConfig, num_ports: usize) -> Self {
        Self {
            gamma: cfg.gamma,
            mark_threshold: cfg.mark_threshold as f64,
            mtu: cfg.mtu_size as f64,
            phantom_len: vec![0.0; num_ports],
            last_update: vec![0; num_ports],
        }
    }

    /// Phantom queue length at `port`, in bytes.
    pub fn phantom_len(&self, port: PortId) -> f64 {
        self.phantom_len[port as usize]
    }

    /// Drain the phantom for the time since its last update (the link sends
    /// one MTU per timeslot), add the departing MTU, and report whether the
    /// departing packet should be marked.
    fn on_departure(&mut self, port: PortId, now: Timeslot) -> bool {
        let port = port as usize;
        let elapsed = now.saturating_sub(self.last_update[port]) as f64;
        let drained = self.gamma * self.mtu * elapsed;
        let len = (self.phantom_len[port] - drained).max(0.0) + self.mtu;
        self.phantom_len[port] = len;
        self.last_update[port] = now;
        len > self.mark_threshold
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::EmulationConfig;
    use crate::packet::PacketHeader;
    use crate::state::EmulationState;
    use crate::stats::CoreStats;

    fn setup() -> (QueueBank, EmulationOutput) {
        let cfg = EmulationConfig::default().with_packet_pool_size(64);
        let state = Arc::new(EmulationState::new(&cfg).unwrap());
        (
            QueueBank::new(1),
            EmulationOutput::new(0, state, Arc::new(CoreStats::default())),
        )
    }

    fn hull() -> Scheduler {
        Scheduler::for_policy(&RouterPolicy::Hull(HullConfig::default()), 1)
    }

    #[test]
    fn fifo_returns_head() {
        let (mut bank, mut out) = setup();
        for i in 0..2 {
            bank.enqueue(0, out.pool().create(PacketHeader::new(0, 1, 0, i), &[]));
        }
        let mut sched = Scheduler::Fifo;
        let first = sched.schedule(&mut bank, 0, 0, &mut out).unwrap();
        assert_eq!(out.pool().header(&first).id, 0);
        out.free_packet(first);
        let second = sched.schedule(&mut bank, 0, 0, &mut out).unwrap();
        out.free_packet(second);
        assert!(sched.schedule(&mut bank, 0, 1, &mut out).is_none());
    }

    #[test]
    fn phantom_grows_at_line_rate_and_marks_over_threshold() {
        let (mut bank, mut out) = setup();
        let mut sched = hull();
        // one departure per timeslot: the phantom gains (1 - gamma) * MTU = 75
        // bytes per slot and first exceeds 3000 bytes at t = 21
        for now in 0..=21u64 {
            bank.enqueue(0, out.pool().create(PacketHeader::new(0, 1, 0, now as u16), &[]));
            let pkt = sched.schedule(&mut bank, 0, now, &mut out).unwrap();
            let marked = out.pool().header(&pkt).is_marked();
            assert_eq!(marked, now == 21, "timeslot {now}");
            out.free_packet(pkt);
        }
        let Scheduler::Hull(h) = &sched else { unreachable!() };
        assert!((h.phantom_len(0) - 3075.0).abs() < 1e-6);
    }

    #[test]
    fn phantom_decays_when_idle_and_floors_at_zero() {
        let mut h = HullScheduler::new(&HullConfig::default(), 1);
        assert!(!h.on_departure(0, 0));
        assert!(!h.on_departure(0, 0));
        assert!(h.on_departure(0, 0));
        assert_eq!(h.phantom_len(0), 4500.0);
        // 4500 - 0.95 * 1500 * 3 = 225, plus one MTU
        assert!(!h.on_departure(0, 3));
        assert!((h.phantom_len(0) - 1725.0).abs() < 1e-6);
        // a long idle gap drains it completely
        h.on_departure(0, 1000);
        assert_eq!(h.phantom_len(0), 1500.0);
    }
}
