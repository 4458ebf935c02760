pub mod types;
pub mod config;
pub mod stats;
pub mod packet;
pub mod ring;
pub mod output;
pub mod state;

pub mod queue_bank;
pub mod classifier;
pub mod queue_manager;
pub mod scheduler;
pub mod router;
pub mod endpoint_group;

pub(crate) mod driver;
pub(crate) mod topology;
pub(crate) mod core;
pub mod emulation;

// Re-export primary public API
pub use crate::config::{
    Backpressure, DropTailConfig, EmulationConfig, HullConfig, RedConfig, RingPolicies, RouterPolicy,
    DEFAULT_MTU_SIZE,
};
pub use crate::core::EmulationCore;
pub use crate::emulation::{Emulation, EmulationHandle};
pub use crate::output::{Admit, AdmittedTraffic};
pub use crate::packet::{PacketHeader, PacketId, PacketPool, FLAG_DROPPED, FLAG_ECN_MARK};
pub use crate::stats::{AdmissionSnapshot, CoreSnapshot, PoolSnapshot, PortSnapshot, RouterSnapshot, StatsSnapshot};
pub use crate::types::{EndpointId, Error, FlowId, NoRoom, PortId, Result, Timeslot, Verdict};
