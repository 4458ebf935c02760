//! MTU packets and the pool they live in.
//!
//! Packets are preallocated slots in a fixed arena. A [`PacketId`] names one
//! slot and is move-only: holding it is the right to read and write that slot,
//! and passing it by value is how ownership moves between pool, queues and
//! rings. The free list is a lock-free `ArrayQueue` of slot indices, so any
//! core may acquire or release.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicU8, Ordering};

use crossbeam::queue::ArrayQueue;

use crate::types::{EndpointId, Error, FlowId, Result};

/// Packet carries an ECN congestion mark.
pub const FLAG_ECN_MARK: u16 = 0x1;
/// Packet was dropped in the fabric (used in admitted-traffic reports).
pub const FLAG_DROPPED: u16 = 0x2;

/// Alignment of the private region that follows the header.
pub const PACKET_ALIGN: usize = 64;
/// Scheme-specific bytes carried by each packet.
pub const PACKET_PRIV_BYTES: usize = 32;
/// Offset of the private region from the start of a packet slot.
pub const PACKET_PRIV_OFFSET: usize = align_up(std::mem::size_of::<RawHeader>());

const fn align_up(len: usize) -> usize {
    (len + PACKET_ALIGN - 1) & !(PACKET_ALIGN - 1)
}

/// Header fields of an emulated MTU packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketHeader {
    pub src: EndpointId,
    pub dst: EndpointId,
    pub flow: FlowId,
    /// Sequence number within the flow.
    pub id: u16,
    pub flags: u16,
}

impl PacketHeader {
    pub fn new(src: EndpointId, dst: EndpointId, flow: FlowId, id: u16) -> Self {
        Self { src, dst, flow, id, flags: 0 }
    }

    pub fn is_marked(&self) -> bool {
        self.flags & FLAG_ECN_MARK != 0
    }
}

#[repr(C)]
#[derive(Default)]
struct RawHeader {
    src: AtomicU16,
    dst: AtomicU16,
    flow: AtomicU16,
    id: AtomicU16,
    flags: AtomicU16,
    /// Owner tag: set while the slot is held outside the pool.
    in_use: AtomicBool,
}

#[repr(C, align(64))]
#[derive(Default)]
struct PrivateRegion([AtomicU8; PACKET_PRIV_BYTES]);

/// One arena slot. Fields are atomics so slots can be shared across cores
/// without locks; exclusivity comes from the single `PacketId` per slot, and
/// the ring hand-off orders the accesses.
#[repr(C)]
#[derive(Default)]
struct PacketSlot {
    header: RawHeader,
    private: PrivateRegion,
}

/// Handle to an acquired packet. Not `Clone`: exactly one exists per slot in use.
#[derive(PartialEq, Eq)]
pub struct PacketId(u32);

impl PacketId {
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketId({})", self.0)
    }
}

/// Fixed-size pool of packet slots.
pub struct PacketPool {
    slots: Box<[PacketSlot]>,
    free: ArrayQueue<u32>,
    starved: AtomicU64,
}

impl PacketPool {
    pub fn new(capacity: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig("packet pool capacity must be non-zero".into()));
        }
        let slots: Box<[PacketSlot]> = (0..capacity).map(|_| PacketSlot::default()).collect();
        let free = ArrayQueue::new(capacity as usize);
        for idx in 0..capacity {
            free.push(idx)
                .map_err(|_| Error::InvalidConfig("packet free list capacity mismatch".into()))?;
        }
        Ok(Self {
            slots,
            free,
            starved: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of packets currently free.
    pub fn available(&self) -> u32 {
        self.free.len() as u32
    }

    /// Number of packets held outside the pool.
    pub fn in_use(&self) -> u32 {
        self.capacity() - self.available()
    }

    /// How many acquire attempts found the pool empty.
    pub fn starved(&self) -> u64 {
        self.starved.load(Ordering::Relaxed)
    }

    /// Take a packet if one is free. Does not count starvation.
    pub fn try_acquire(&self) -> Option<PacketId> {
        let idx = self.free.pop()?;
        let was_in_use = self.slot(idx).header.in_use.swap(true, Ordering::Relaxed);
        debug_assert!(!was_in_use, "packet {idx} on free list while in use");
        Some(PacketId(idx))
    }

    /// Take a packet, spinning until one is released. Every empty attempt
    /// bumps the starvation counter.
    pub fn acquire(&self) -> PacketId {
        loop {
            if let Some(id) = self.try_acquire() {
                return id;
            }
            let starved = self.starved.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(starved, "packet pool exhausted, retrying");
            std::hint::spin_loop();
        }
    }

    /// Acquire and initialize a packet in one go.
    pub fn create(&self, header: PacketHeader, private: &[u8]) -> PacketId {
        let id = self.acquire();
        self.init(&id, header, private);
        id
    }

    /// Return a packet to the free list.
    pub fn release(&self, id: PacketId) {
        let idx = id.0;
        let was_in_use = self.slot(idx).header.in_use.swap(false, Ordering::Relaxed);
        debug_assert!(was_in_use, "packet {idx} released twice");
        let pushed = self.free.push(idx).is_ok();
        debug_assert!(pushed, "free list overflow releasing packet {idx}");
    }

    /// Write header fields (flags cleared) and copy `private` into the
    /// private region, zero-filling the remainder.
    pub fn init(&self, id: &PacketId, header: PacketHeader, private: &[u8]) {
        assert!(
            private.len() <= PACKET_PRIV_BYTES,
            "private data of {} bytes exceeds {} byte region",
            private.len(),
            PACKET_PRIV_BYTES
        );
        let slot = self.slot(id.0);
        slot.header.src.store(header.src, Ordering::Relaxed);
        slot.header.dst.store(header.dst, Ordering::Relaxed);
        slot.header.flow.store(header.flow, Ordering::Relaxed);
        slot.header.id.store(header.id, Ordering::Relaxed);
        slot.header.flags.store(0, Ordering::Relaxed);
        for (i, byte) in slot.private.0.iter().enumerate() {
            byte.store(private.get(i).copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn header(&self, id: &PacketId) -> PacketHeader {
        let h = &self.slot(id.0).header;
        PacketHeader {
            src: h.src.load(Ordering::Relaxed),
            dst: h.dst.load(Ordering::Relaxed),
            flow: h.flow.load(Ordering::Relaxed),
            id: h.id.load(Ordering::Relaxed),
            flags: h.flags.load(Ordering::Relaxed),
        }
    }

    pub fn set_flags(&self, id: &PacketId, flags: u16) {
        self.slot(id.0).header.flags.fetch_or(flags, Ordering::Relaxed);
    }

    pub fn mark_ecn(&self, id: &PacketId) {
        self.set_flags(id, FLAG_ECN_MARK);
    }

    /// Copy of the packet's private region.
    pub fn private(&self, id: &PacketId) -> [u8; PACKET_PRIV_BYTES] {
        let mut out = [0u8; PACKET_PRIV_BYTES];
        for (dst, src) in out.iter_mut().zip(self.slot(id.0).private.0.iter()) {
            *dst = src.load(Ordering::Relaxed);
        }
        out
    }

    fn slot(&self, idx: u32) -> &PacketSlot {
        &self.slots[idx as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_region_is_cache_line_aligned() {
        assert_eq!(PACKET_PRIV_OFFSET, 64);
        assert_eq!(std::mem::offset_of!(PacketSlot, private), PACKET_PRIV_OFFSET);
    }

    #[test]
    fn acquire_release_round_trip_keeps_baseline() {
        let pool = PacketPool::new(4).unwrap();
        for _ in 0..1000 {
            let id = pool.acquire();
            assert_eq!(pool.available(), 3);
            pool.release(id);
        }
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.starved(), 0);
    }

    #[test]
    fn init_writes_header_and_private() {
        let pool = PacketPool::new(2).unwrap();
        let id = pool.create(PacketHeader::new(3, 7, 1, 42), &[9, 8, 7]);
        let hdr = pool.header(&id);
        assert_eq!(hdr, PacketHeader::new(3, 7, 1, 42));
        assert!(!hdr.is_marked());

        let private = pool.private(&id);
        assert_eq!(&private[..4], &[9, 8, 7, 0]);

        pool.mark_ecn(&id);
        assert!(pool.header(&id).is_marked());
        pool.release(id);
    }

    #[test]
    fn reinit_clears_flags_and_stale_private_bytes() {
        let pool = PacketPool::new(1).unwrap();
        let id = pool.create(PacketHeader::new(0, 1, 0, 0), &[0xff; PACKET_PRIV_BYTES]);
        pool.mark_ecn(&id);
        pool.release(id);

        let id = pool.create(PacketHeader::new(2, 3, 0, 1), &[]);
        assert_eq!(pool.header(&id).flags, 0);
        assert_eq!(pool.private(&id), [0u8; PACKET_PRIV_BYTES]);
        pool.release(id);
    }

    #[test]
    fn try_acquire_reports_exhaustion() {
        let pool = PacketPool::new(2).unwrap();
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.in_use(), 2);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn acquire_waits_for_release_from_another_thread() {
        let pool = std::sync::Arc::new(PacketPool::new(1).unwrap());
        let held = pool.acquire();
        let releaser = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                pool.release(held);
            })
        };
        let id = pool.acquire();
        releaser.join().unwrap();
        assert!(pool.starved() > 0);
        pool.release(id);
        assert_eq!(pool.available(), 1);
    }
}
