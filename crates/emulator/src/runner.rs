//! Drives an emulation with the stress workload until it runs out of
//! timeslots or is cancelled.

use std::ops::ControlFlow;
use std::time::Instant;

use fabric_emu::{Emulation, StatsSnapshot};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::workload::Workload;

/// Timeslots between two progress lines.
const PROGRESS_INTERVAL: u64 = 10_000;

/// What the admission side saw come out of the emulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub records: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub marked: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub timeslots: u64,
    pub cancelled: bool,
    pub elapsed_ms: u128,
    pub requests_generated: u64,
    pub requests_issued: u64,
    pub requests_pending: usize,
    /// Requests dropped because too many were already waiting.
    pub requests_refused: u64,
    pub final_mean_gap: f64,
    pub totals: Totals,
    /// Packets still inside the fabric when the run ended.
    pub reclaimed: usize,
    pub stats: StatsSnapshot,
}

impl RunSummary {
    /// Delivered MTUs per emulated timeslot, across the whole fabric.
    pub fn throughput(&self) -> f64 {
        if self.timeslots == 0 {
            0.0
        } else {
            self.totals.delivered as f64 / self.timeslots as f64
        }
    }

    /// Emulated timeslots per wall-clock second.
    pub fn timeslots_per_sec(&self) -> f64 {
        if self.elapsed_ms == 0 {
            0.0
        } else {
            self.timeslots as f64 * 1000.0 / self.elapsed_ms as f64
        }
    }
}

/// Run `config.timeslots` timeslots, one thread per emulation core, with the
/// calling thread generating traffic and consuming admitted records.
pub fn run(config: &Config, cancel: &CancellationToken) -> Result<RunSummary, fabric_emu::Error> {
    let mut emulation = Emulation::new(config.emulation.clone())?;
    let mut workload = Workload::new(&config.workload, config.emulation.num_endpoints() as u16);
    let mut totals = Totals::default();
    let mut cancelled = false;
    let started = Instant::now();

    let ran = emulation.run_parallel(config.timeslots, |now, handle| {
        if cancel.is_cancelled() {
            cancelled = true;
            return ControlFlow::Break(());
        }
        workload.generate(now);
        workload.issue(handle);
        handle.drain_admitted(|record| totals.add(record));

        if now > 0 && now % PROGRESS_INTERVAL == 0 {
            info!(
                now,
                delivered = totals.delivered,
                dropped = totals.dropped,
                marked = totals.marked,
                pending = workload.pending(),
                refused = workload.refused(),
                "progress"
            );
        }
        ControlFlow::Continue(())
    });

    // records published during the last timeslot
    emulation
        .handle()
        .drain_admitted(|record| totals.add(record));
    let stats = emulation.stats();
    let reclaimed = emulation.cleanup();
    let elapsed_ms = started.elapsed().as_millis();
    debug!(reclaimed, "run finished");

    Ok(RunSummary {
        timeslots: ran,
        cancelled,
        elapsed_ms,
        requests_generated: workload.generated(),
        requests_issued: workload.issued(),
        requests_pending: workload.pending(),
        requests_refused: workload.refused(),
        final_mean_gap: workload.mean_gap(),
        totals,
        reclaimed,
        stats,
    })
}

impl Totals {
    fn add(&mut self, record: &fabric_emu::AdmittedTraffic) {
        self.records += 1;
        for entry in &record.entries {
            if entry.is_dropped() {
                self.dropped += 1;
            } else {
                self.delivered += 1;
                if entry.is_marked() {
                    self.marked += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkloadConfig;
    use fabric_emu::{DropTailConfig, EmulationConfig, RouterPolicy};

    fn small(cores: u16) -> Config {
        Config {
            timeslots: 2_000,
            emulation: EmulationConfig::default()
                .with_racks(2)
                .with_endpoints_per_rack(4)
                .with_cores(cores)
                .with_packet_pool_size(4096)
                .with_router(RouterPolicy::DropTail(DropTailConfig { capacity: 256 })),
            workload: WorkloadConfig {
                mean_gap: 100.0,
                rate_increase_gap: 0,
                ..WorkloadConfig::default()
            },
        }
    }

    #[test]
    fn light_load_is_delivered() {
        let summary = run(&small(1), &CancellationToken::new()).unwrap();
        assert_eq!(summary.timeslots, 2_000);
        assert!(!summary.cancelled);
        assert!(summary.requests_generated > 0);
        assert_eq!(summary.requests_pending, 0);
        assert_eq!(summary.requests_refused, 0);
        assert_eq!(summary.totals.delivered, summary.stats.total.delivered);
        assert_eq!(summary.totals.dropped, summary.stats.total.dropped);
        // whatever did not make it out was still in flight
        assert_eq!(
            summary.totals.delivered + summary.totals.dropped + summary.reclaimed as u64,
            summary.stats.admission.backlog_packets
        );
    }

    #[test]
    fn parallel_run_matches_admission_counters() {
        let summary = run(&small(3), &CancellationToken::new()).unwrap();
        assert_eq!(summary.stats.cores.len(), 3);
        assert_eq!(summary.totals.delivered, summary.stats.total.delivered);
        assert_eq!(summary.totals.records, summary.stats.admission.admitted_received);
    }

    #[test]
    fn overload_with_a_small_pool_finishes() {
        // far more offered load than 64 packets can carry
        let mut config = small(2);
        config.timeslots = 500;
        config.emulation = config.emulation.with_packet_pool_size(64);
        config.workload.mean_gap = 2.0;
        config.workload.max_pending = 32;
        let summary = run(&config, &CancellationToken::new()).unwrap();
        assert_eq!(summary.timeslots, 500);
        assert!(summary.requests_refused > 0);
        assert!(summary.requests_pending <= 32);
        assert!(summary.stats.admission.backlog_rejected > 0);
        assert!(summary.totals.delivered > 0);
    }

    #[test]
    fn cancelled_before_start_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = run(&small(1), &cancel).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.timeslots, 0);
        assert_eq!(summary.totals, Totals::default());
    }
}
