//! Fabric composition.
//!
//! One rack is a single top-of-rack (ToR) router with one port per endpoint,
//! wired to one endpoint group. With several racks every ToR gets an extra
//! uplink port to a core router, and the core router has one port per rack.
//! Every directed hop is one ring, created here and never changed afterwards.
//!
//! Ring names: `epg{r}_new`, `epg{r}_ingress`, `epg{r}_resets`,
//! `router{i}_ingress`. The core router's id is `racks`.

use std::sync::Arc;

use crate::classifier::Classifier;
use crate::config::EmulationConfig;
use crate::driver::{Driver, EndpointDriver, EndpointRings, RouterDriver, RouterRings};
use crate::endpoint_group::EndpointGroup;
use crate::packet::PacketId;
use crate::queue_bank::QueueBankStats;
use crate::ring::Ring;
use crate::router::Router;
use crate::types::{EndpointId, Error, Result};

/// Queue statistics of one router, readable while the emulation runs.
pub struct RouterStatsHandle {
    pub id: u16,
    pub policy: &'static str,
    pub stats: Arc<QueueBankStats>,
}

/// Everything built from a config: the drivers, plus the rings and counters
/// the admission side needs.
pub struct Topology {
    pub endpoint_drivers: Vec<EndpointDriver>,
    pub router_drivers: Vec<RouterDriver>,
    /// Admission ring of each rack's endpoint group.
    pub new_packet_rings: Vec<Arc<Ring<PacketId>>>,
    pub reset_rings: Vec<Arc<Ring<EndpointId>>>,
    pub routers: Vec<RouterStatsHandle>,
}

impl Topology {
    pub fn build(config: &EmulationConfig) -> Result<Self> {
        config.validate()?;
        let racks = config.racks;
        let per_rack = config.endpoints_per_rack;
        let ring_size = config.packet_ring_size as usize;
        let multi_rack = racks > 1;

        let packet_ring = |name: String| Arc::new(Ring::<PacketId>::new(name, ring_size));
        let epg_ingress: Vec<_> = (0..racks).map(|r| packet_ring(format!("epg{r}_ingress"))).collect();
        let tor_ingress: Vec<_> = (0..racks).map(|r| packet_ring(format!("router{r}_ingress"))).collect();
        let core_ingress = multi_rack.then(|| packet_ring(format!("router{racks}_ingress")));
        let new_packet_rings: Vec<_> = (0..racks).map(|r| packet_ring(format!("epg{r}_new"))).collect();
        let reset_rings: Vec<_> = (0..racks)
            .map(|r| Arc::new(Ring::new(format!("epg{r}_resets"), config.reset_ring_size as usize)))
            .collect();

        let mut endpoint_drivers = Vec::with_capacity(racks as usize);
        for r in 0..racks {
            let first = r * per_rack;
            let group = EndpointGroup::new(first, per_rack, config.endpoint_queue_capacity);
            let rings = EndpointRings {
                new_packets: new_packet_rings[r as usize].clone(),
                ingress: epg_ingress[r as usize].clone(),
                to_router: tor_ingress[r as usize].clone(),
                resets: reset_rings[r as usize].clone(),
            };
            endpoint_drivers.push(EndpointDriver::new(group, rings, config.rings.to_router));
        }

        let ingress_burst = 2 * config.num_endpoints() as usize;
        let mut router_drivers = Vec::with_capacity(config.num_routers() as usize);
        for r in 0..racks {
            let classifier = Classifier::TopOfRack {
                rack: r,
                endpoints_per_rack: per_rack,
                uplink: multi_rack.then_some(per_rack),
            };
            let mut egress = vec![epg_ingress[r as usize].clone()];
            let mut port_to_egress = vec![0; per_rack as usize];
            if let Some(core) = &core_ingress {
                egress.push(core.clone());
                port_to_egress.push(1);
            }
            let router = Router::new(r, classifier, &config.router, config.seed.wrapping_add(r as u64))?;
            let rings = RouterRings {
                ingress: tor_ingress[r as usize].clone(),
                egress,
                port_to_egress,
            };
            router_drivers.push(RouterDriver::new(router, rings, config.rings.from_router, ingress_burst));
        }
        if let Some(core) = core_ingress {
            let classifier = Classifier::Core {
                endpoints_per_rack: per_rack,
                racks,
            };
            let router = Router::new(racks, classifier, &config.router, config.seed.wrapping_add(racks as u64))?;
            let rings = RouterRings {
                ingress: core,
                egress: tor_ingress.clone(),
                port_to_egress: (0..racks as usize).collect(),
            };
            router_drivers.push(RouterDriver::new(router, rings, config.rings.from_router, ingress_burst));
        }

        if router_drivers.len() != config.num_routers() as usize {
            return Err(Error::Topology(format!(
                "built {} routers, expected {}",
                router_drivers.len(),
                config.num_routers()
            )));
        }

        let routers = router_drivers
            .iter()
            .map(|d| RouterStatsHandle {
                id: d.router().id(),
                policy: d.router().policy_name(),
                stats: d.router().stats(),
            })
            .collect();

        Ok(Self {
            endpoint_drivers,
            router_drivers,
            new_packet_rings,
            reset_rings,
            routers,
        })
    }

    /// Spread the drivers over `cores` round-robin, endpoint drivers first,
    /// so every core steps its endpoint groups before its routers.
    pub fn assign_components_to_cores(&mut self, cores: usize) -> Result<Vec<Vec<Driver>>> {
        let total = self.endpoint_drivers.len() + self.router_drivers.len();
        if cores == 0 || cores > total {
            return Err(Error::InvalidConfig(format!(
                "cannot spread {total} drivers over {cores} cores"
            )));
        }
        let mut assignment: Vec<Vec<Driver>> = (0..cores).map(|_| Vec::new()).collect();
        let drivers = self
            .endpoint_drivers
            .drain(..)
            .map(Driver::Endpoint)
            .chain(self.router_drivers.drain(..).map(Driver::Router));
        for (i, driver) in drivers.enumerate() {
            assignment[i % cores].push(driver);
        }
        Ok(assignment)
    }
}
