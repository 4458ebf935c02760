//! Emulation core: one thread's share of the fabric.
//!
//! A core owns a disjoint set of drivers and its own admitted-traffic output.
//! Each `step` runs every driver once for the core's current timeslot, in
//! assignment order (endpoint groups before routers), publishes the admitted
//! record and advances the clock.

use std::sync::Arc;

use tracing::trace;

use crate::driver::Driver;
use crate::output::EmulationOutput;
use crate::state::EmulationState;
use crate::stats::CoreStats;
use crate::types::Timeslot;

pub struct EmulationCore {
    id: u16,
    drivers: Vec<Driver>,
    out: EmulationOutput,
    stats: Arc<CoreStats>,
    cur_time: Timeslot,
}

impl EmulationCore {
    pub fn new(id: u16, drivers: Vec<Driver>, state: Arc<EmulationState>) -> Self {
        let stats = Arc::new(CoreStats::default());
        Self {
            id,
            drivers,
            out: EmulationOutput::new(id, state, stats.clone()),
            stats,
            cur_time: 0,
        }
    }

    /// The timeslot the next `step` will emulate.
    pub fn now(&self) -> Timeslot {
        self.cur_time
    }

    pub fn stats(&self) -> &Arc<CoreStats> {
        &self.stats
    }

    /// Emulate one timeslot.
    pub fn step(&mut self) {
        let now = self.cur_time;
        for driver in &mut self.drivers {
            driver.step(now, &mut self.out);
        }
        self.out.flush(now);
        self.stats.timeslot();
        trace!(core = self.id, now, "core timeslot done");
        self.cur_time += 1;
    }

    /// Return every packet this core's drivers hold or consume, and the
    /// in-progress admitted record. Returns the number of packets reclaimed.
    pub fn cleanup(&mut self) -> usize {
        let pool = &self.out.state().packets;
        let freed: usize = self.drivers.iter_mut().map(|d| d.cleanup(pool)).sum();
        self.out.cleanup();
        freed
    }
}
