//! Admission policies applied when a packet arrives at a port.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::config::{RedConfig, RouterPolicy};
use crate::output::EmulationOutput;
use crate::packet::PacketId;
use crate::queue_bank::QueueBank;
use crate::types::{PortId, Timeslot, Verdict};

/// Per-instance admission policy. Every port of a router shares one.
pub enum QueueManager {
    DropTail { capacity: u32 },
    Red(RedManager),
}

impl QueueManager {
    pub fn drop_tail(capacity: u32) -> Self {
        QueueManager::DropTail { capacity }
    }

    /// Admission policy for a router running `policy`. HULL admits drop-tail;
    /// its marking happens in the scheduler.
    pub fn for_policy(policy: &RouterPolicy, num_ports: usize, seed: u64) -> Self {
        match policy {
            RouterPolicy::DropTail(cfg) => Self::drop_tail(cfg.capacity),
            RouterPolicy::Red(cfg) => QueueManager::Red(RedManager::new(cfg.clone(), num_ports, seed)),
            RouterPolicy::Hull(cfg) => Self::drop_tail(cfg.capacity),
        }
    }

    /// Admit `pkt` at `port` or drop it. Dropped packets go to `out`, which
    /// reports and releases them.
    pub fn enqueue(
        &mut self,
        bank: &mut QueueBank,
        port: PortId,
        pkt: PacketId,
        now: Timeslot,
        out: &mut EmulationOutput,
    ) -> Verdict {
        let verdict = match self {
            QueueManager::DropTail { capacity } => {
                if bank.len(port) >= *capacity {
                    Verdict::Dropped
                } else {
                    Verdict::Enqueued
                }
            }
            QueueManager::Red(red) => red.decide(bank.len(port), port),
        };

        match verdict {
            Verdict::Enqueued => bank.enqueue(port, pkt),
            Verdict::Marked => {
                out.mark_ecn(&pkt);
                bank.stats().marked(port);
                bank.enqueue(port, pkt);
            }
            Verdict::Dropped => {
                trace!(port, now, "queue manager dropped packet");
                bank.stats().dropped(port);
                out.drop_packet(pkt);
            }
        }
        verdict
    }
}

/// Random Early Detection.
///
/// The average is kept in fixed point, scaled by `2^wq_shift`, so the EWMA
/// `avg += (len - avg) / 2^wq_shift` runs in integer arithmetic.
pub struct RedManager {
    cfg: RedConfig,
    avg_scaled: Vec<u64>,
    rng: StdRng,
}

impl RedManager {
    pub fn new(cfg: RedConfig, num_ports: usize, seed: u64) -> Self {
        Self {
            cfg,
            avg_scaled: vec![0; num_ports],
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Current average queue length at `port`, in packets.
    pub fn avg(&self, port: PortId) -> f64 {
        self.avg_scaled[port as usize] as f64 / (1u64 << self.cfg.wq_shift) as f64
    }

    #[cfg(test)]
    fn set_avg(&mut self, port: PortId, avg: u64) {
        self.avg_scaled[port as usize] = avg << self.cfg.wq_shift;
    }

    fn decide(&mut self, len: u32, port: PortId) -> Verdict {
        let scaled = &mut self.avg_scaled[port as usize];
        *scaled = *scaled + len as u64 - (*scaled >> self.cfg.wq_shift);
        let avg = self.avg(port);

        // hard capacity always applies
        if len >= self.cfg.capacity {
            return Verdict::Dropped;
        }
        let (min_th, max_th) = (self.cfg.min_th as f64, self.cfg.max_th as f64);
        if avg < min_th {
            return Verdict::Enqueued;
        }
        let congested = if avg >= max_th {
            true
        } else {
            let p = self.cfg.max_p * (avg - min_th) / (max_th - min_th);
            self.rng.gen::<f64>() < p
        };
        match (congested, self.cfg.ecn) {
            (false, _) => Verdict::Enqueued,
            (true, true) => Verdict::Marked,
            (true, false) => Verdict::Dropped,
        }
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

    fn output(pool_size: u32) -> EmulationOutput {
        let cfg = EmulationConfig::default().with_packet_pool_size(pool_size);
        let state = Arc::new(EmulationState::new(&cfg).unwrap());
        EmulationOutput::new(0, state, Arc::new(CoreStats::default()))
    }

    fn packet(out: &EmulationOutput, i: u16) -> PacketId {
        out.pool().create(PacketHeader::new(0, 1, 0, i), &[])
    }

    fn red_config(ecn: bool) -> RedConfig {
        RedConfig {
            capacity: 400,
            min_th: 20,
            max_th: 200,
            max_p: 0.05,
            wq_shift: 0,
            ecn,
        }
    }

    /// Fill `port` to exactly `len` packets.
    fn fill(bank: &mut QueueBank, out: &EmulationOutput, port: PortId, len: u16) {
        for i in 0..len {
            bank.enqueue(port, packet(out, i));
        }
    }

    #[test]
    fn drop_tail_admits_exactly_capacity() {
        let mut out = output(64);
        let mut bank = QueueBank::new(1);
        let mut qm = QueueManager::drop_tail(5);

        let verdicts: Vec<_> = (0..8)
            .map(|i| {
                let pkt = packet(&out, i);
                qm.enqueue(&mut bank, 0, pkt, 0, &mut out)
            })
            .collect();
        assert_eq!(verdicts.iter().filter(|v| **v == Verdict::Enqueued).count(), 5);
        assert_eq!(verdicts[5..], [Verdict::Dropped; 3]);
        assert_eq!(bank.len(0), 5);
        assert_eq!(bank.stats().snapshot()[0].dropped, 3);
        // dropped packets went straight back
        assert_eq!(out.pool().available(), 64 - 5);
    }

    #[test]
    fn red_below_min_threshold_never_drops() {
        let mut out = output(512);
        let mut bank = QueueBank::new(1);
        let mut qm = QueueManager::Red(RedManager::new(red_config(false), 1, 1));
        for i in 0..19 {
            let pkt = packet(&out, i);
            assert_eq!(qm.enqueue(&mut bank, 0, pkt, 0, &mut out), Verdict::Enqueued);
        }
    }

    #[test]
    fn red_drops_at_max_threshold_inclusive() {
        let mut out = output(512);
        let mut bank = QueueBank::new(1);
        fill(&mut bank, &out, 0, 200);
        let mut qm = QueueManager::Red(RedManager::new(red_config(false), 1, 1));
        for i in 0..10 {
            let pkt = packet(&out, i);
            assert_eq!(qm.enqueue(&mut bank, 0, pkt, 0, &mut out), Verdict::Dropped);
        }
        assert_eq!(bank.len(0), 200);
    }

    #[test]
    fn red_with_ecn_marks_instead_of_dropping() {
        let mut out = output(512);
        let mut bank = QueueBank::new(1);
        fill(&mut bank, &out, 0, 250);
        let mut qm = QueueManager::Red(RedManager::new(red_config(true), 1, 1));
        let pkt = packet(&out, 0);
        assert_eq!(qm.enqueue(&mut bank, 0, pkt, 0, &mut out), Verdict::Marked);
        assert_eq!(bank.len(0), 251);
        assert_eq!(bank.stats().snapshot()[0].marked, 1);
    }

    #[test]
    fn red_tail_drops_at_capacity_even_with_ecn() {
        let mut out = output(512);
        let mut bank = QueueBank::new(1);
        fill(&mut bank, &out, 0, 400);
        let mut qm = QueueManager::Red(RedManager::new(red_config(true), 1, 1));
        let pkt = packet(&out, 0);
        assert_eq!(qm.enqueue(&mut bank, 0, pkt, 0, &mut out), Verdict::Dropped);
    }

    #[test]
    fn red_between_thresholds_drops_with_linear_probability() {
        let mut out = output(512);
        let mut bank = QueueBank::new(1);
        fill(&mut bank, &out, 0, 100);
        let mut qm = QueueManager::Red(RedManager::new(red_config(false), 1, 42));

        let trials = 20_000;
        let mut drops = 0;
        for i in 0..trials {
            let pkt = packet(&out, i as u16);
            match qm.enqueue(&mut bank, 0, pkt, 0, &mut out) {
                Verdict::Dropped => drops += 1,
                _ => {
                    let p = bank.dequeue(0).unwrap();
                    out.free_packet(p);
                }
            }
        }
        // p = 0.05 * 80 / 180
        let expected = trials as f64 * 0.05 * 80.0 / 180.0;
        assert!(
            (drops as f64 - expected).abs() < expected * 0.25,
            "{drops} drops, expected about {expected}"
        );
    }

    #[test]
    fn red_average_moves_by_weight() {
        let mut red = RedManager::new(
            RedConfig {
                wq_shift: 2,
                ..red_config(false)
            },
            1,
            0,
        );
        red.set_avg(0, 100);
        // len 20 against avg 100 with weight 1/4: 100 + (20 - 100) / 4 = 80
        red.decide(20, 0);
        assert_eq!(red.avg(0), 80.0);
    }
}
