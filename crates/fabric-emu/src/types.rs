use std::fmt;

/// Identifier of an emulated endpoint (server).
pub type EndpointId = u16;

/// Identifier of a flow between a source and destination pair.
pub type FlowId = u16;

/// Output port index on a router or endpoint group.
pub type PortId = u16;

/// Discrete simulated time, in timeslots.
pub type Timeslot = u64;

/// Errors returned by emulation setup.
///
/// Runtime conditions such as an exhausted pool or a full ring are not errors:
/// they are retried or dropped according to the configured policy and counted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid topology: {0}")]
    Topology(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returned by a ring enqueue that did not fit. Carries back whatever the
/// ring did not accept so the caller can retry or release it.
pub struct RingFull<T>(pub T);

impl<T> fmt::Debug for RingFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RingFull(..)")
    }
}

impl<T> fmt::Display for RingFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ring full")
    }
}

impl<T> std::error::Error for RingFull<T> {}

/// Why a non-blocking backlog request was refused. Nothing was allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NoRoom {
    #[error("packet pool has {available} free packets, {needed} needed")]
    Pool { needed: u32, available: u32 },
    #[error("admission ring {ring} has room for {available} packets, {needed} needed")]
    Ring {
        ring: usize,
        needed: u32,
        available: u32,
    },
}

/// What a queue manager did with an arriving packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Enqueued,
    Dropped,
    Marked,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Enqueued => write!(f, "enqueued"),
            Verdict::Dropped => write!(f, "dropped"),
            Verdict::Marked => write!(f, "enqueued+marked"),
        }
    }
}
