//! Write-only statistics counters.
//!
//! Counters are plain `AtomicU64`s bumped with `Relaxed` ordering from the hot
//! path and read by whoever aggregates them. Every failure kind has its own
//! counter so packet loss can be attributed to its cause afterwards.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[inline(always)]
fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

/// Counters for the admission (comm) side, shared by every caller of the
/// emulation handle.
#[derive(Debug, Default)]
pub struct AdmissionStats {
    pub backlog_enqueue_failed: AtomicU64,
    pub backlog_packets_lost: AtomicU64,
    pub backlog_rejected: AtomicU64,
    pub reset_enqueue_failed: AtomicU64,
    pub backlog_packets: AtomicU64,
    pub resets: AtomicU64,
    pub admitted_received: AtomicU64,
}

impl AdmissionStats {
    pub fn backlog_enqueue_failed(&self, n: u64) {
        bump(&self.backlog_enqueue_failed, n);
    }

    pub fn backlog_packets_lost(&self, n: u64) {
        bump(&self.backlog_packets_lost, n);
    }

    /// A non-blocking backlog request found no room.
    pub fn backlog_rejected(&self) {
        bump(&self.backlog_rejected, 1);
    }

    pub fn reset_enqueue_failed(&self) {
        bump(&self.reset_enqueue_failed, 1);
    }

    pub fn backlog_added(&self, n: u64) {
        bump(&self.backlog_packets, n);
    }

    pub fn reset_posted(&self) {
        bump(&self.resets, 1);
    }

    pub fn admitted_received(&self) {
        bump(&self.admitted_received, 1);
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        AdmissionSnapshot {
            backlog_enqueue_failed: get(&self.backlog_enqueue_failed),
            backlog_packets_lost: get(&self.backlog_packets_lost),
            backlog_rejected: get(&self.backlog_rejected),
            reset_enqueue_failed: get(&self.reset_enqueue_failed),
            backlog_packets: get(&self.backlog_packets),
            resets: get(&self.resets),
            admitted_received: get(&self.admitted_received),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
    pub backlog_enqueue_failed: u64,
    pub backlog_packets_lost: u64,
    pub backlog_rejected: u64,
    pub reset_enqueue_failed: u64,
    pub backlog_packets: u64,
    pub resets: u64,
    pub admitted_received: u64,
}

/// Counters owned by one emulation core.
#[derive(Debug, Default)]
pub struct CoreStats {
    // failures
    pub admitted_alloc_failed: AtomicU64,
    pub wait_for_admitted_enqueue: AtomicU64,
    pub send_failed: AtomicU64,
    pub packets_lost_ring_full: AtomicU64,
    // activity
    pub endpoint_sent: AtomicU64,
    pub router_sent: AtomicU64,
    pub driver_pushed: AtomicU64,
    pub driver_pulled: AtomicU64,
    pub driver_processed_new: AtomicU64,
    pub dropped: AtomicU64,
    pub marked: AtomicU64,
    pub delivered: AtomicU64,
    pub resets_applied: AtomicU64,
    pub reset_packets_freed: AtomicU64,
    pub timeslots: AtomicU64,
}

impl CoreStats {
    pub fn admitted_alloc_failed(&self) {
        bump(&self.admitted_alloc_failed, 1);
    }

    pub fn wait_for_admitted_enqueue(&self) {
        bump(&self.wait_for_admitted_enqueue, 1);
    }

    pub fn send_failed(&self, n: u64) {
        bump(&self.send_failed, n);
    }

    pub fn packets_lost(&self, n: u64) {
        bump(&self.packets_lost_ring_full, n);
    }

    pub fn endpoint_sent(&self, n: u64) {
        bump(&self.endpoint_sent, n);
    }

    pub fn router_sent(&self, n: u64) {
        bump(&self.router_sent, n);
    }

    pub fn driver_pushed(&self, n: u64) {
        bump(&self.driver_pushed, n);
    }

    pub fn driver_pulled(&self, n: u64) {
        bump(&self.driver_pulled, n);
    }

    pub fn driver_processed_new(&self, n: u64) {
        bump(&self.driver_processed_new, n);
    }

    pub fn dropped(&self) {
        bump(&self.dropped, 1);
    }

    pub fn marked(&self) {
        bump(&self.marked, 1);
    }

    pub fn delivered(&self) {
        bump(&self.delivered, 1);
    }

    pub fn reset_applied(&self, freed: u64) {
        bump(&self.resets_applied, 1);
        bump(&self.reset_packets_freed, freed);
    }

    pub fn timeslot(&self) {
        bump(&self.timeslots, 1);
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CoreSnapshot {
            admitted_alloc_failed: get(&self.admitted_alloc_failed),
            wait_for_admitted_enqueue: get(&self.wait_for_admitted_enqueue),
            send_failed: get(&self.send_failed),
            packets_lost_ring_full: get(&self.packets_lost_ring_full),
            endpoint_sent: get(&self.endpoint_sent),
            router_sent: get(&self.router_sent),
            driver_pushed: get(&self.driver_pushed),
            driver_pulled: get(&self.driver_pulled),
            driver_processed_new: get(&self.driver_processed_new),
            dropped: get(&self.dropped),
            marked: get(&self.marked),
            delivered: get(&self.delivered),
            resets_applied: get(&self.resets_applied),
            reset_packets_freed: get(&self.reset_packets_freed),
            timeslots: get(&self.timeslots),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CoreSnapshot {
    pub admitted_alloc_failed: u64,
    pub wait_for_admitted_enqueue: u64,
    pub send_failed: u64,
    pub packets_lost_ring_full: u64,
    pub endpoint_sent: u64,
    pub router_sent: u64,
    pub driver_pushed: u64,
    pub driver_pulled: u64,
    pub driver_processed_new: u64,
    pub dropped: u64,
    pub marked: u64,
    pub delivered: u64,
    pub resets_applied: u64,
    pub reset_packets_freed: u64,
    pub timeslots: u64,
}

impl CoreSnapshot {
    /// Field-wise sum, for aggregating all cores.
    pub fn merge(&mut self, other: &CoreSnapshot) {
        self.admitted_alloc_failed += other.admitted_alloc_failed;
        self.wait_for_admitted_enqueue += other.wait_for_admitted_enqueue;
        self.send_failed += other.send_failed;
        self.packets_lost_ring_full += other.packets_lost_ring_full;
        self.endpoint_sent += other.endpoint_sent;
        self.router_sent += other.router_sent;
        self.driver_pushed += other.driver_pushed;
        self.driver_pulled += other.driver_pulled;
        self.driver_processed_new += other.driver_processed_new;
        self.dropped += other.dropped;
        self.marked += other.marked;
        self.delivered += other.delivered;
        self.resets_applied += other.resets_applied;
        self.reset_packets_freed += other.reset_packets_freed;
        self.timeslots = self.timeslots.max(other.timeslots);
    }
}

/// Everything the emulation counted, in one serializable value.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StatsSnapshot {
    pub pool: PoolSnapshot,
    pub admission: AdmissionSnapshot,
    pub cores: Vec<CoreSnapshot>,
    pub total: CoreSnapshot,
    pub routers: Vec<RouterSnapshot>,
}

/// Packet pool occupancy. `starved` counts acquire attempts that found the
/// pool empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub capacity: u32,
    pub available: u32,
    pub starved: u64,
}

/// Per-router queue occupancy and drop counts.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RouterSnapshot {
    pub id: u16,
    pub policy: &'static str,
    pub ports: Vec<PortSnapshot>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PortSnapshot {
    pub occupancy: u32,
    pub peak_occupancy: u32,
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    pub marked: u64,
}
