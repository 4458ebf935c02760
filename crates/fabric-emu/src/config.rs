use serde::{Deserialize, Serialize};

use crate::types::{Error, Result};

/// Size of one emulated MTU in bytes. One MTU crosses a link per timeslot.
pub const DEFAULT_MTU_SIZE: u32 = 1500;

/// What a caller does when a ring enqueue reports full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Spin until the ring accepts the entries. No loss, may stall.
    Retry,
    /// Release the rejected packets to the pool and move on. May lose packets.
    Drop,
}

/// Backpressure policy for each class of packet ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingPolicies {
    /// Admission ring carrying freshly generated backlog to an endpoint group.
    pub new_packets: Backpressure,
    /// Endpoint group egress towards its top-of-rack router.
    pub to_router: Backpressure,
    /// Router egress towards the next hop.
    pub from_router: Backpressure,
}

impl Default for RingPolicies {
    fn default() -> Self {
        Self {
            new_packets: Backpressure::Retry,
            to_router: Backpressure::Retry,
            from_router: Backpressure::Drop,
        }
    }
}

impl RingPolicies {
    pub fn uniform(policy: Backpressure) -> Self {
        Self {
            new_packets: policy,
            to_router: policy,
            from_router: policy,
        }
    }
}

/// Drop-tail queue manager parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropTailConfig {
    /// Maximum queued packets per port.
    pub capacity: u32,
}

impl Default for DropTailConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Random Early Detection parameters. Thresholds are in packets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedConfig {
    pub capacity: u32,
    pub min_th: u32,
    pub max_th: u32,
    pub max_p: f64,
    /// EWMA weight is `2^-wq_shift`.
    pub wq_shift: u32,
    /// Mark instead of drop when the average is above `min_th`.
    pub ecn: bool,
}

impl Default for RedConfig {
    fn default() -> Self {
        Self {
            capacity: 400,
            min_th: 20,
            max_th: 200,
            max_p: 0.05,
            wq_shift: 8,
            ecn: false,
        }
    }
}

/// HULL phantom queue parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HullConfig {
    /// Real queue capacity (drop-tail) in packets.
    pub capacity: u32,
    /// Phantom drain rate as a fraction of the link rate.
    pub gamma: f64,
    /// Phantom length in bytes above which scheduled packets get marked.
    pub mark_threshold: u64,
    pub mtu_size: u32,
}

impl Default for HullConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            gamma: 0.95,
            mark_threshold: 3000,
            mtu_size: DEFAULT_MTU_SIZE,
        }
    }
}

/// AQM policy shared by every port of every router in the emulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RouterPolicy {
    DropTail(DropTailConfig),
    Red(RedConfig),
    Hull(HullConfig),
}

impl Default for RouterPolicy {
    fn default() -> Self {
        RouterPolicy::DropTail(DropTailConfig::default())
    }
}

impl RouterPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            RouterPolicy::DropTail(_) => "drop_tail",
            RouterPolicy::Red(_) => "red",
            RouterPolicy::Hull(_) => "hull",
        }
    }
}

/// Construction-time configuration of an emulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulationConfig {
    /// Number of racks. More than one adds a core router joining the racks.
    pub racks: u16,
    pub endpoints_per_rack: u16,
    /// Number of emulation cores the drivers are spread over.
    pub cores: u16,
    pub packet_pool_size: u32,
    pub admitted_pool_size: u32,
    pub admitted_ring_size: u32,
    /// Capacity of every packet ring (one per directed hop).
    pub packet_ring_size: u32,
    pub reset_ring_size: u32,
    /// Per-endpoint queue capacity for backlog waiting to be sent.
    pub endpoint_queue_capacity: u32,
    pub router: RouterPolicy,
    pub rings: RingPolicies,
    /// Seed for the RED drop decisions.
    pub seed: u64,
}

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            racks: 1,
            endpoints_per_rack: 32,
            cores: 1,
            packet_pool_size: 1 << 16,
            admitted_pool_size: 128,
            admitted_ring_size: 16,
            packet_ring_size: 1 << 14,
            reset_ring_size: 1024,
            endpoint_queue_capacity: 4096,
            router: RouterPolicy::default(),
            rings: RingPolicies::default(),
            seed: 0x5eed,
        }
    }
}

impl EmulationConfig {
    pub fn with_racks(mut self, racks: u16) -> Self {
        self.racks = racks;
        self
    }

    pub fn with_endpoints_per_rack(mut self, n: u16) -> Self {
        self.endpoints_per_rack = n;
        self
    }

    pub fn with_cores(mut self, cores: u16) -> Self {
        self.cores = cores;
        self
    }

    pub fn with_packet_pool_size(mut self, size: u32) -> Self {
        self.packet_pool_size = size;
        self
    }

    pub fn with_admitted_pool_size(mut self, size: u32) -> Self {
        self.admitted_pool_size = size;
        self
    }

    pub fn with_admitted_ring_size(mut self, size: u32) -> Self {
        self.admitted_ring_size = size;
        self
    }

    pub fn with_packet_ring_size(mut self, size: u32) -> Self {
        self.packet_ring_size = size;
        self
    }

    pub fn with_endpoint_queue_capacity(mut self, capacity: u32) -> Self {
        self.endpoint_queue_capacity = capacity;
        self
    }

    pub fn with_router(mut self, policy: RouterPolicy) -> Self {
        self.router = policy;
        self
    }

    pub fn with_rings(mut self, rings: RingPolicies) -> Self {
        self.rings = rings;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Total number of endpoints across all racks.
    pub fn num_endpoints(&self) -> u32 {
        self.racks as u32 * self.endpoints_per_rack as u32
    }

    /// Number of routers the composition rules produce.
    pub fn num_routers(&self) -> u32 {
        if self.racks > 1 {
            self.racks as u32 + 1
        } else {
            1
        }
    }

    /// Number of drivers (one per router, one per endpoint group).
    pub fn num_drivers(&self) -> u32 {
        self.num_routers() + self.racks as u32
    }

    /// Most packets one timeslot can put on a single inter-driver ring: a ToR
    /// ingress takes a whole rack plus one packet from the core router, the
    /// core ingress one packet per rack.
    pub fn max_hop_burst(&self) -> u32 {
        if self.racks > 1 {
            (self.endpoints_per_rack as u32 + 1).max(self.racks as u32)
        } else {
            self.endpoints_per_rack as u32
        }
    }

    /// Check the configuration before any resources are allocated.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if self.racks == 0 {
            return invalid("racks must be at least 1".into());
        }
        if self.endpoints_per_rack == 0 {
            return invalid("endpoints_per_rack must be at least 1".into());
        }
        if self.num_endpoints() > u16::MAX as u32 {
            return invalid(format!(
                "{} endpoints do not fit 16-bit endpoint ids",
                self.num_endpoints()
            ));
        }
        if self.cores == 0 {
            return invalid("cores must be at least 1".into());
        }
        if self.cores as u32 > self.num_drivers() {
            return invalid(format!(
                "{} cores requested but the topology only has {} drivers",
                self.cores,
                self.num_drivers()
            ));
        }
        for (name, size) in [
            ("packet_pool_size", self.packet_pool_size),
            ("admitted_pool_size", self.admitted_pool_size),
            ("admitted_ring_size", self.admitted_ring_size),
            ("packet_ring_size", self.packet_ring_size),
            ("reset_ring_size", self.reset_ring_size),
            ("endpoint_queue_capacity", self.endpoint_queue_capacity),
        ] {
            if size == 0 {
                return invalid(format!("{name} must be non-zero"));
            }
        }
        // A retrying producer spins until the consumer runs, which is a later
        // phase or timeslot. Under lockstep the consumer may run before the
        // producer in one timeslot and after it in the next.
        let retries = self.rings.to_router == Backpressure::Retry
            || self.rings.from_router == Backpressure::Retry;
        if retries && self.packet_ring_size < 2 * self.max_hop_burst() {
            return invalid(format!(
                "packet_ring_size {} cannot hold two timeslots of {} packets with retrying rings",
                self.packet_ring_size,
                self.max_hop_burst()
            ));
        }
        if self.admitted_ring_size < self.cores as u32 {
            return invalid(format!(
                "admitted_ring_size {} cannot hold one record per core ({} cores)",
                self.admitted_ring_size, self.cores
            ));
        }
        // Every core holds one admitted record while another may be in flight.
        if self.admitted_pool_size < self.cores as u32 * 2 {
            return invalid(format!(
                "admitted_pool_size {} too small for {} cores",
                self.admitted_pool_size, self.cores
            ));
        }

        match &self.router {
            RouterPolicy::DropTail(dt) => {
                if dt.capacity == 0 {
                    return invalid("drop_tail capacity must be non-zero".into());
                }
            }
            RouterPolicy::Red(red) => {
                if red.capacity == 0 {
                    return invalid("red capacity must be non-zero".into());
                }
                if red.min_th >= red.max_th {
                    return invalid(format!(
                        "red min_th ({}) must be below max_th ({})",
                        red.min_th, red.max_th
                    ));
                }
                if !(red.max_p > 0.0 && red.max_p <= 1.0) {
                    return invalid(format!("red max_p {} outside (0, 1]", red.max_p));
                }
                if red.wq_shift > 31 {
                    return invalid(format!("red wq_shift {} exceeds 31", red.wq_shift));
                }
            }
            RouterPolicy::Hull(hull) => {
                if hull.capacity == 0 {
                    return invalid("hull capacity must be non-zero".into());
                }
                if !(hull.gamma > 0.0 && hull.gamma <= 1.0) {
                    return invalid(format!("hull gamma {} outside (0, 1]", hull.gamma));
                }
                if hull.mtu_size == 0 {
                    return invalid("hull mtu_size must be non-zero".into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EmulationConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_red_thresholds() {
        let cfg = EmulationConfig::default().with_router(RouterPolicy::Red(RedConfig {
            min_th: 200,
            max_th: 20,
            ..RedConfig::default()
        }));
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_more_cores_than_drivers() {
        // One rack: one router and one endpoint group.
        let cfg = EmulationConfig::default().with_cores(3);
        assert!(cfg.validate().is_err());
        let cfg = EmulationConfig::default().with_racks(2).with_cores(5);
        cfg.validate().unwrap();
    }

    #[test]
    fn multi_rack_adds_core_router() {
        let cfg = EmulationConfig::default().with_racks(3);
        assert_eq!(cfg.num_routers(), 4);
        assert_eq!(cfg.num_drivers(), 7);
        assert_eq!(EmulationConfig::default().num_routers(), 1);
    }

    #[test]
    fn retrying_rings_must_hold_two_timeslots_of_burst() {
        let cfg = EmulationConfig::default()
            .with_endpoints_per_rack(16)
            .with_packet_ring_size(8);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));

        // dropping rings never wait, so any size goes
        let cfg = cfg.with_rings(RingPolicies::uniform(Backpressure::Drop));
        cfg.validate().unwrap();

        let cfg = EmulationConfig::default()
            .with_racks(2)
            .with_endpoints_per_rack(4)
            .with_packet_ring_size(9);
        assert_eq!(cfg.max_hop_burst(), 5);
        assert!(cfg.validate().is_err());
        cfg.with_packet_ring_size(10).validate().unwrap();

        let cfg = EmulationConfig::default().with_racks(12).with_endpoints_per_rack(2);
        assert_eq!(cfg.max_hop_burst(), 12);
    }

    #[test]
    fn rejects_zero_sizes() {
        let cfg = EmulationConfig::default().with_packet_ring_size(0);
        assert!(cfg.validate().is_err());
    }
}
