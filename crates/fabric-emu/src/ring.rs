//! Bounded multi-producer multi-consumer rings between drivers.
//!
//! A ring never blocks. A full ring is reported back to the caller together
//! with whatever it did not accept, and the caller decides between retrying
//! and dropping (see [`send_packets`]).

use crossbeam::queue::ArrayQueue;
use tracing::debug;

use crate::config::Backpressure;
use crate::packet::{PacketId, PacketPool};
use crate::types::RingFull;

pub struct Ring<T> {
    name: String,
    queue: ArrayQueue<T>,
}

impl<T> Ring<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn enqueue(&self, item: T) -> Result<(), RingFull<T>> {
        self.queue.push(item).map_err(RingFull)
    }

    /// Enqueue all of `items` or none of them.
    ///
    /// Free space is checked up front. If a concurrent producer wins the race
    /// for the last slots, the entries that did not fit stay in `items` (in
    /// order) and the error carries their count. On success `items` is empty.
    pub fn enqueue_bulk(&self, items: &mut Vec<T>) -> Result<(), RingFull<usize>> {
        if items.is_empty() {
            return Ok(());
        }
        if self.capacity() - self.len() < items.len() {
            return Err(RingFull(items.len()));
        }
        let mut batch = std::mem::take(items);
        {
            let mut drain = batch.drain(..);
            while let Some(item) = drain.next() {
                if let Err(item) = self.queue.push(item) {
                    items.push(item);
                    items.extend(drain);
                    break;
                }
            }
        }
        if items.is_empty() {
            // keep the caller's allocation
            *items = batch;
            Ok(())
        } else {
            Err(RingFull(items.len()))
        }
    }

    pub fn dequeue(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Move up to `max` entries into `out`. Returns how many were moved.
    pub fn dequeue_burst(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            match self.queue.pop() {
                Some(item) => {
                    out.push(item);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }
}

impl<T> std::fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Result of handing a batch of packets to a ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendOutcome {
    pub sent: usize,
    /// Packets released to the pool because the ring was full.
    pub lost: usize,
    /// Enqueue attempts that found the ring full.
    pub failures: usize,
}

/// Enqueue every packet in `pkts` onto `ring`, applying `policy` to whatever
/// does not fit. `pkts` is empty on return.
pub fn send_packets(
    ring: &Ring<PacketId>,
    pkts: &mut Vec<PacketId>,
    policy: Backpressure,
    pool: &PacketPool,
) -> SendOutcome {
    let total = pkts.len();
    let mut outcome = SendOutcome::default();
    if total == 0 {
        return outcome;
    }
    let Err(RingFull(rejected)) = ring.enqueue_bulk(pkts) else {
        outcome.sent = total;
        return outcome;
    };
    outcome.failures += 1;
    outcome.sent = total - rejected;
    debug!(ring = ring.name(), rejected, ?policy, "could not enqueue packet batch, ring full");

    match policy {
        Backpressure::Retry => {
            for pkt in pkts.drain(..) {
                let mut pkt = pkt;
                loop {
                    match ring.enqueue(pkt) {
                        Ok(()) => break,
                        Err(RingFull(back)) => {
                            outcome.failures += 1;
                            debug!(ring = ring.name(), "ring full, retrying enqueue");
                            pkt = back;
                            std::hint::spin_loop();
                        }
                    }
                }
                outcome.sent += 1;
            }
        }
        Backpressure::Drop => {
            for pkt in pkts.drain(..) {
                match ring.enqueue(pkt) {
                    Ok(()) => outcome.sent += 1,
                    Err(RingFull(back)) => {
                        pool.release(back);
                        outcome.lost += 1;
                    }
                }
            }
            if outcome.lost > 0 {
                debug!(ring = ring.name(), lost = outcome.lost, "dropped packets on full ring");
            }
        }
    }
    outcome
}
