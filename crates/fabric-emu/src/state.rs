use crate::config::EmulationConfig;
use crate::output::{AdmittedPool, AdmittedTraffic};
use crate::packet::PacketPool;
use crate::ring::Ring;
use crate::stats::AdmissionStats;
use crate::types::Result;

/// Resources shared by every core of one emulation.
///
/// Created once per emulation and passed around explicitly (behind an `Arc`)
/// instead of living in a global.
pub struct EmulationState {
    pub packets: PacketPool,
    pub admitted: AdmittedPool,
    /// Admitted-traffic records, one per core per timeslot.
    pub admitted_out: Ring<Box<AdmittedTraffic>>,
    pub stats: AdmissionStats,
}

impl EmulationState {
    pub fn new(config: &EmulationConfig) -> Result<Self> {
        Ok(Self {
            packets: PacketPool::new(config.packet_pool_size)?,
            admitted: AdmittedPool::new(config.admitted_pool_size as usize),
            admitted_out: Ring::new("admitted_out", config.admitted_ring_size as usize),
            stats: AdmissionStats::default(),
        })
    }
}
