//! Packet to output-port classification.
//!
//! A classifier is a pure function of the header. Every composition in the
//! fabric uses one of three shapes, so they are a closed enum.

use crate::packet::PacketHeader;
use crate::types::{EndpointId, PortId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classifier {
    /// Endpoint group egress: one port per local endpoint, chosen by source.
    BySource { first: EndpointId, count: u16 },
    /// Top-of-rack router: rack-local destinations go to `dst % per_rack`,
    /// everything else to the uplink.
    TopOfRack {
        rack: u16,
        endpoints_per_rack: u16,
        uplink: Option<PortId>,
    },
    /// Core router: one port per rack, chosen by destination rack.
    Core { endpoints_per_rack: u16, racks: u16 },
}

impl Classifier {
    pub fn num_ports(&self) -> usize {
        match *self {
            Classifier::BySource { count, .. } => count as usize,
            Classifier::TopOfRack {
                endpoints_per_rack,
                uplink,
                ..
            } => endpoints_per_rack as usize + usize::from(uplink.is_some()),
            Classifier::Core { racks, .. } => racks as usize,
        }
    }

    /// Output port for `hdr`. Panics if the header cannot be classified,
    /// which means a packet reached a component it was never routed to.
    pub fn classify(&self, hdr: &PacketHeader) -> PortId {
        let port = match *self {
            Classifier::BySource { first, count } => {
                assert!(
                    hdr.src >= first && hdr.src - first < count,
                    "source {} outside endpoint group [{}, {})",
                    hdr.src,
                    first,
                    first as u32 + count as u32
                );
                hdr.src - first
            }
            Classifier::TopOfRack {
                rack,
                endpoints_per_rack,
                uplink,
            } => {
                if hdr.dst / endpoints_per_rack == rack {
                    hdr.dst % endpoints_per_rack
                } else {
                    match uplink {
                        Some(port) => port,
                        None => panic!("destination {} not reachable from rack {rack}", hdr.dst),
                    }
                }
            }
            Classifier::Core {
                endpoints_per_rack,
                ..
            } => hdr.dst / endpoints_per_rack,
        };
        assert!(
            (port as usize) < self.num_ports(),
            "classifier produced port {port} of {}",
            self.num_ports()
        );
        port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to(dst: EndpointId) -> PacketHeader {
        PacketHeader::new(0, dst, 0, 0)
    }

    #[test]
    fn top_of_rack_routes_local_and_uplink() {
        let tor = Classifier::TopOfRack {
            rack: 1,
            endpoints_per_rack: 4,
            uplink: Some(4),
        };
        assert_eq!(tor.num_ports(), 5);
        assert_eq!(tor.classify(&to(5)), 1);
        assert_eq!(tor.classify(&to(7)), 3);
        assert_eq!(tor.classify(&to(0)), 4);
        assert_eq!(tor.classify(&to(12)), 4);
    }

    #[test]
    fn core_routes_by_rack() {
        let core = Classifier::Core {
            endpoints_per_rack: 4,
            racks: 3,
        };
        assert_eq!(core.classify(&to(0)), 0);
        assert_eq!(core.classify(&to(6)), 1);
        assert_eq!(core.classify(&to(11)), 2);
    }

    #[test]
    fn by_source_is_relative_to_group() {
        let c = Classifier::BySource { first: 8, count: 8 };
        assert_eq!(c.classify(&PacketHeader::new(13, 0, 0, 0)), 5);
    }

    #[test]
    #[should_panic]
    fn single_rack_has_no_uplink() {
        let tor = Classifier::TopOfRack {
            rack: 0,
            endpoints_per_rack: 4,
            uplink: None,
        };
        tor.classify(&to(9));
    }
}
