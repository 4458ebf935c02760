//! The whole emulated fabric and the handle used to feed and observe it.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

use tracing::{debug, info};

use crate::config::EmulationConfig;
use crate::core::EmulationCore;
use crate::output::AdmittedTraffic;
use crate::packet::{PacketHeader, PacketId, PACKET_PRIV_BYTES};
use crate::ring::{send_packets, Ring};
use crate::state::EmulationState;
use crate::stats::{CoreSnapshot, CoreStats, PoolSnapshot, RouterSnapshot, StatsSnapshot};
use crate::topology::{RouterStatsHandle, Topology};
use crate::types::{EndpointId, FlowId, NoRoom, RingFull, Result, Timeslot};

/// Packets handed to an admission ring per enqueue.
const BACKLOG_BATCH: usize = 64;

/// Admission-side access to a running emulation. Cheap to clone and usable
/// from any thread.
#[derive(Clone)]
pub struct EmulationHandle {
    config: Arc<EmulationConfig>,
    state: Arc<EmulationState>,
    new_packet_rings: Arc<[Arc<Ring<PacketId>>]>,
    reset_rings: Arc<[Arc<Ring<EndpointId>>]>,
    core_stats: Arc<[Arc<CoreStats>]>,
    routers: Arc<[RouterStatsHandle]>,
}

impl EmulationHandle {
    pub fn config(&self) -> &EmulationConfig {
        &self.config
    }

    pub fn num_endpoints(&self) -> u32 {
        self.config.num_endpoints()
    }

    fn rack_of(&self, endpoint: EndpointId) -> usize {
        (endpoint / self.config.endpoints_per_rack) as usize
    }

    /// Queue `amount` MTUs from `src` to `dst` on `flow`, numbered from
    /// `start_id`. `extra_data` is either empty or `amount` equal chunks, one
    /// per packet, copied into each packet's private region.
    ///
    /// Blocks while the packet pool is exhausted, and while a `Retry`
    /// admission ring is full. See [`try_add_backlog`](Self::try_add_backlog)
    /// for callers that must not wait.
    pub fn add_backlog(
        &self,
        src: EndpointId,
        dst: EndpointId,
        flow: FlowId,
        amount: u32,
        start_id: u16,
        extra_data: &[u8],
    ) {
        let n = self.num_endpoints();
        assert!((src as u32) < n, "source {src} out of range ({n} endpoints)");
        assert!((dst as u32) < n, "destination {dst} out of range ({n} endpoints)");
        if amount == 0 {
            return;
        }
        let stride = extra_data.len() / amount as usize;
        assert_eq!(
            stride * amount as usize,
            extra_data.len(),
            "extra data of {} bytes does not split into {amount} packets",
            extra_data.len()
        );
        assert!(stride <= PACKET_PRIV_BYTES, "{stride} bytes of extra data per packet");

        let ring = &self.new_packet_rings[self.rack_of(src)];
        let pool = &self.state.packets;
        let policy = self.config.rings.new_packets;
        let mut batch = Vec::with_capacity(BACKLOG_BATCH.min(amount as usize));
        for i in 0..amount as usize {
            let id = start_id.wrapping_add(i as u16);
            let private = &extra_data[i * stride..(i + 1) * stride];
            batch.push(pool.create(PacketHeader::new(src, dst, flow, id), private));
            if batch.len() == BACKLOG_BATCH || i + 1 == amount as usize {
                let outcome = send_packets(ring, &mut batch, policy, pool);
                if outcome.failures > 0 {
                    self.state.stats.backlog_enqueue_failed(outcome.failures as u64);
                }
                if outcome.lost > 0 {
                    self.state.stats.backlog_packets_lost(outcome.lost as u64);
                }
            }
        }
        self.state.stats.backlog_added(amount as u64);
        debug!(src, dst, flow, amount, "backlog added");
    }

    /// Like [`add_backlog`](Self::add_backlog), but refuses instead of
    /// waiting when the packet pool or the source's admission ring cannot
    /// take all `amount` packets right now.
    ///
    /// Use this from the `run_parallel` control closure: the cores are parked
    /// while it runs, so nothing would ever free the room `add_backlog` waits
    /// for. With other producers racing for the same room the check is only
    /// a hint, and `add_backlog` may still wait briefly.
    pub fn try_add_backlog(
        &self,
        src: EndpointId,
        dst: EndpointId,
        flow: FlowId,
        amount: u32,
        start_id: u16,
        extra_data: &[u8],
    ) -> std::result::Result<(), NoRoom> {
        let n = self.num_endpoints();
        assert!((src as u32) < n, "source {src} out of range ({n} endpoints)");
        let available = self.state.packets.available();
        if available < amount {
            self.state.stats.backlog_rejected();
            debug!(src, amount, available, "backlog refused, packet pool short");
            return Err(NoRoom::Pool { needed: amount, available });
        }
        let rack = self.rack_of(src);
        let ring = &self.new_packet_rings[rack];
        let room = (ring.capacity() - ring.len()) as u32;
        if room < amount {
            self.state.stats.backlog_rejected();
            debug!(ring = ring.name(), src, amount, room, "backlog refused, admission ring short");
            return Err(NoRoom::Ring {
                ring: rack,
                needed: amount,
                available: room,
            });
        }
        self.add_backlog(src, dst, flow, amount, start_id, extra_data);
        Ok(())
    }

    /// Discard everything `src` has queued. Takes effect at the start of the
    /// owning driver's next timeslot.
    pub fn reset_sender(&self, src: EndpointId) {
        assert!((src as u32) < self.num_endpoints(), "reset for unknown endpoint {src}");
        let ring = &self.reset_rings[self.rack_of(src)];
        let mut item = src;
        while let Err(RingFull(back)) = ring.enqueue(item) {
            self.state.stats.reset_enqueue_failed();
            debug!(ring = ring.name(), src, "reset ring full, retrying");
            item = back;
            std::hint::spin_loop();
        }
        self.state.stats.reset_posted();
    }

    /// Next published admitted-traffic record. Hand it back with
    /// [`release_admitted`](Self::release_admitted).
    pub fn poll_admitted(&self) -> Option<Box<AdmittedTraffic>> {
        let record = self.state.admitted_out.dequeue()?;
        self.state.stats.admitted_received();
        Some(record)
    }

    pub fn release_admitted(&self, record: Box<AdmittedTraffic>) {
        self.state.admitted.release(record);
    }

    /// Visit and release every published record. Returns how many there were.
    pub fn drain_admitted(&self, mut f: impl FnMut(&AdmittedTraffic)) -> usize {
        let mut n = 0;
        while let Some(record) = self.poll_admitted() {
            f(&record);
            self.release_admitted(record);
            n += 1;
        }
        n
    }

    pub fn stats(&self) -> StatsSnapshot {
        let cores: Vec<CoreSnapshot> = self.core_stats.iter().map(|s| s.snapshot()).collect();
        let mut total = CoreSnapshot::default();
        for core in &cores {
            total.merge(core);
        }
        let pool = &self.state.packets;
        StatsSnapshot {
            pool: PoolSnapshot {
                capacity: pool.capacity(),
                available: pool.available(),
                starved: pool.starved(),
            },
            admission: self.state.stats.snapshot(),
            cores,
            total,
            routers: self
                .routers
                .iter()
                .map(|r| RouterSnapshot {
                    id: r.id,
                    policy: r.policy,
                    ports: r.stats.snapshot(),
                })
                .collect(),
        }
    }
}

/// An emulated fabric: its cores plus the shared state.
pub struct Emulation {
    cores: Vec<EmulationCore>,
    handle: EmulationHandle,
    cleaned_up: bool,
}

impl Emulation {
    pub fn new(config: EmulationConfig) -> Result<Self> {
        config.validate()?;
        let state = Arc::new(EmulationState::new(&config)?);
        let mut topology = Topology::build(&config)?;
        let assignment = topology.assign_components_to_cores(config.cores as usize)?;
        let cores: Vec<EmulationCore> = assignment
            .into_iter()
            .enumerate()
            .map(|(i, drivers)| EmulationCore::new(i as u16, drivers, state.clone()))
            .collect();

        info!(
            racks = config.racks,
            endpoints = config.num_endpoints(),
            routers = config.num_routers(),
            cores = cores.len(),
            policy = config.router.name(),
            "emulation ready"
        );

        let handle = EmulationHandle {
            state,
            new_packet_rings: topology.new_packet_rings.into(),
            reset_rings: topology.reset_rings.into(),
            core_stats: cores.iter().map(|c| c.stats().clone()).collect(),
            routers: topology.routers.into(),
            config: Arc::new(config),
        };
        Ok(Self {
            cores,
            handle,
            cleaned_up: false,
        })
    }

    pub fn handle(&self) -> &EmulationHandle {
        &self.handle
    }

    pub fn config(&self) -> &EmulationConfig {
        self.handle.config()
    }

    /// Timeslots every core has completed.
    pub fn now(&self) -> Timeslot {
        self.cores.iter().map(EmulationCore::now).min().unwrap_or(0)
    }

    pub fn add_backlog(
        &self,
        src: EndpointId,
        dst: EndpointId,
        flow: FlowId,
        amount: u32,
        start_id: u16,
        extra_data: &[u8],
    ) {
        self.handle.add_backlog(src, dst, flow, amount, start_id, extra_data)
    }

    pub fn reset_sender(&self, src: EndpointId) {
        self.handle.reset_sender(src)
    }

    pub fn poll_admitted(&self) -> Option<Box<AdmittedTraffic>> {
        self.handle.poll_admitted()
    }

    pub fn release_admitted(&self, record: Box<AdmittedTraffic>) {
        self.handle.release_admitted(record)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.handle.stats()
    }

    /// Run one timeslot on every core, one core after another.
    ///
    /// The admitted output ring must be drained between steps: a core whose
    /// record does not fit waits for the consumer.
    pub fn step(&mut self) {
        debug_assert!(!self.cleaned_up, "step after cleanup");
        for core in &mut self.cores {
            core.step();
        }
    }

    /// Run up to `timeslots` timeslots with every core on its own thread, in
    /// lockstep. Before each timeslot `control` runs on the calling thread with
    /// the timeslot about to be emulated; it plays the admission side (add
    /// backlog, drain admitted records) and can end the run early with
    /// `ControlFlow::Break`. Returns the number of timeslots run.
    ///
    /// Cores run concurrently within a timeslot, so a packet crossing cores
    /// may or may not see the extra timeslot of delay it sees single-core.
    pub fn run_parallel<F>(&mut self, timeslots: u64, mut control: F) -> u64
    where
        F: FnMut(Timeslot, &EmulationHandle) -> ControlFlow<()>,
    {
        debug_assert!(!self.cleaned_up, "run after cleanup");
        let base = self.now();
        let handle = self.handle.clone();
        let parties = self.cores.len() + 1;
        let start = Barrier::new(parties);
        let done = Barrier::new(parties);
        let stop = AtomicBool::new(false);

        std::thread::scope(|s| {
            for core in self.cores.iter_mut() {
                let (start, done, stop) = (&start, &done, &stop);
                s.spawn(move || loop {
                    start.wait();
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    core.step();
                    done.wait();
                });
            }

            let mut ran = 0;
            while ran < timeslots {
                if control(base + ran, &handle).is_break() {
                    break;
                }
                start.wait();
                done.wait();
                ran += 1;
            }
            stop.store(true, Ordering::Release);
            start.wait();
            ran
        })
    }

    /// Return every packet and admitted record to its pool. Idempotent; also
    /// run on drop. Returns the number of packets reclaimed.
    pub fn cleanup(&mut self) -> usize {
        if self.cleaned_up {
            return 0;
        }
        self.cleaned_up = true;
        let freed: usize = self.cores.iter_mut().map(EmulationCore::cleanup).sum();
        let state = &self.handle.state;
        let mut records = 0;
        while let Some(record) = state.admitted_out.dequeue() {
            state.admitted.release(record);
            records += 1;
        }
        info!(
            packets = freed,
            records,
            available = state.packets.available(),
            capacity = state.packets.capacity(),
            "emulation cleaned up"
        );
        freed
    }
}

impl Drop for Emulation {
    fn drop(&mut self) {
        self.cleanup();
    }
}
