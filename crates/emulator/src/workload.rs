//! Stress-test traffic generator.

use std::collections::VecDeque;

use fabric_emu::{EndpointId, EmulationHandle, FlowId, Timeslot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::WorkloadConfig;

/// One backlog request: `amount` MTUs from `src` to `dst`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    pub src: EndpointId,
    pub dst: EndpointId,
    pub flow: FlowId,
    pub amount: u32,
    pub start_id: u16,
}

pub struct Workload {
    cfg: WorkloadConfig,
    rng: StdRng,
    num_endpoints: u16,
    mean_gap: f64,
    next_increase: Timeslot,
    /// Time of each endpoint's next request, in fractional timeslots.
    next_arrival: Vec<f64>,
    /// Next packet id per source.
    next_id: Vec<u16>,
    /// Requests waiting for room in the emulation, at most `max_pending`.
    pending: VecDeque<Request>,
    generated: u64,
    issued: u64,
    refused: u64,
}

impl Workload {
    pub fn new(cfg: &WorkloadConfig, num_endpoints: u16) -> Self {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mean_gap = cfg.mean_gap;
        let next_arrival = (0..num_endpoints)
            .map(|_| exponential(&mut rng, mean_gap))
            .collect();
        Self {
            cfg: cfg.clone(),
            rng,
            num_endpoints,
            mean_gap,
            next_increase: cfg.rate_increase_gap,
            next_arrival,
            next_id: vec![0; num_endpoints as usize],
            pending: VecDeque::new(),
            generated: 0,
            issued: 0,
            refused: 0,
        }
    }

    pub fn mean_gap(&self) -> f64 {
        self.mean_gap
    }

    /// Requests generated so far.
    pub fn generated(&self) -> u64 {
        self.generated
    }

    /// Requests handed to the emulation so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Requests discarded because the pending queue was full.
    pub fn refused(&self) -> u64 {
        self.refused
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Generate the requests arriving before the end of timeslot `now`.
    pub fn generate(&mut self, now: Timeslot) -> usize {
        if self.cfg.rate_increase_gap > 0 && now >= self.next_increase {
            self.next_increase += self.cfg.rate_increase_gap;
            let gap = (self.mean_gap / self.cfg.rate_increase_factor).max(self.cfg.min_mean_gap);
            if gap != self.mean_gap {
                self.mean_gap = gap;
                info!(now, mean_gap = gap, "request rate increased");
            }
        }

        let horizon = (now + 1) as f64;
        let mut n = 0;
        let refused_before = self.refused;
        for src in 0..self.num_endpoints {
            while self.next_arrival[src as usize] < horizon {
                let gap = exponential(&mut self.rng, self.mean_gap);
                self.next_arrival[src as usize] += gap;

                // uniform over the other endpoints
                let mut dst = self.rng.gen_range(0..self.num_endpoints - 1);
                if dst >= src {
                    dst += 1;
                }
                n += 1;
                if self.pending.len() >= self.cfg.max_pending {
                    self.refused += 1;
                    continue;
                }
                let start_id = self.next_id[src as usize];
                self.next_id[src as usize] = start_id.wrapping_add(self.cfg.flow_size as u16);
                self.pending.push_back(Request {
                    src,
                    dst,
                    flow: 0,
                    amount: self.cfg.flow_size,
                    start_id,
                });
            }
        }
        self.generated += n as u64;
        if self.refused > refused_before {
            debug!(now, refused = self.refused - refused_before, "pending requests full");
        }
        n
    }

    /// Hand pending requests to the emulation, in arrival order, stopping at
    /// the first one it cannot take without blocking.
    pub fn issue(&mut self, handle: &EmulationHandle) -> usize {
        let mut n = 0;
        while let Some(req) = self.pending.front() {
            if handle
                .try_add_backlog(req.src, req.dst, req.flow, req.amount, req.start_id, &[])
                .is_err()
            {
                break;
            }
            self.pending.pop_front();
            n += 1;
        }
        self.issued += n as u64;
        n
    }
}

/// Exponentially distributed sample with the given mean.
fn exponential(rng: &mut StdRng, mean: f64) -> f64 {
    let u: f64 = rng.gen();
    -mean * (1.0 - u).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mean_gap: f64) -> WorkloadConfig {
        WorkloadConfig {
            mean_gap,
            rate_increase_gap: 0,
            ..WorkloadConfig::default()
        }
    }

    #[test]
    fn arrival_rate_matches_mean_gap() {
        let mut w = Workload::new(&config(20.0), 16);
        for now in 0..10_000 {
            w.generate(now);
        }
        // 16 endpoints * 10000 / 20
        let expected = 8000.0;
        let got = w.generated() as f64;
        assert!((got - expected).abs() < expected * 0.05, "{got} requests");
    }

    #[test]
    fn never_targets_the_source() {
        let mut w = Workload::new(&config(1.0), 4);
        for now in 0..200 {
            w.generate(now);
        }
        assert!(w.pending.iter().all(|r| r.src != r.dst && r.dst < 4));
        assert!(w.pending.iter().any(|r| r.dst == 3));
    }

    #[test]
    fn same_seed_same_requests() {
        let run = || {
            let mut w = Workload::new(&config(5.0), 8);
            for now in 0..100 {
                w.generate(now);
            }
            w.pending.into_iter().collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn rate_increases_until_floor() {
        let cfg = WorkloadConfig {
            mean_gap: 64.0,
            rate_increase_factor: 2.0,
            rate_increase_gap: 10,
            min_mean_gap: 16.0,
            ..WorkloadConfig::default()
        };
        let mut w = Workload::new(&cfg, 2);
        w.generate(9);
        assert_eq!(w.mean_gap(), 64.0);
        w.generate(10);
        assert_eq!(w.mean_gap(), 32.0);
        w.generate(20);
        w.generate(30);
        assert_eq!(w.mean_gap(), 16.0);
    }

    #[test]
    fn pending_queue_is_capped() {
        let cfg = WorkloadConfig {
            max_pending: 10,
            ..config(1.0)
        };
        let mut w = Workload::new(&cfg, 4);
        for now in 0..100 {
            w.generate(now);
        }
        assert_eq!(w.pending(), 10);
        assert!(w.refused() > 0);
        assert_eq!(w.generated(), w.refused() + 10);
    }

    #[test]
    fn issue_stops_when_the_pool_is_short() {
        use fabric_emu::{Emulation, EmulationConfig};

        let emu = Emulation::new(
            EmulationConfig::default()
                .with_endpoints_per_rack(4)
                .with_packet_pool_size(25),
        )
        .unwrap();
        let mut w = Workload::new(&config(1.0), 4);
        w.generate(5);
        assert!(w.pending() > 3);

        // flows of 10: two fit in 25 packets
        assert_eq!(w.issue(emu.handle()), 2);
        assert_eq!(w.issued(), 2);
        assert_eq!(emu.stats().admission.backlog_rejected, 1);
        assert_eq!(emu.stats().pool.available, 5);
    }

    #[test]
    fn packet_ids_continue_per_source() {
        let mut w = Workload::new(&config(1.0), 2);
        w.generate(10);
        let ids: Vec<_> = w.pending.iter().filter(|r| r.src == 0).map(|r| r.start_id).collect();
        assert!(ids.len() > 1);
        assert!(ids.windows(2).all(|p| p[1] == p[0].wrapping_add(10)));
    }
}
