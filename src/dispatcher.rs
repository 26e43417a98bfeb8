//! # Dispatcher
//!
//! The [`Kernel`] context bundles every piece of kernel state (arena,
//! scheduling heap, interrupt ring, callback table) and runs the dispatch
//! loop over it. Only the tick clock lives outside, because the timer
//! interrupt writes it.
//!
//! ## Quantum
//!
//! ```text
//!   run_quantum()
//!     ├─► drain the interrupt ring (FIFO, including anything queued
//!     │   while draining)
//!     ├─► while the heap root is due at the current tick:
//!     │     pop it, report a missed deadline if late, run its callback
//!     └─► if nothing was due: collect, then maybe compact
//! ```
//!
//! The current tick is re-read on every pop, so a long callback can make
//! further events due within the same quantum.
//!
//! ## Event Protocol
//!
//! An event popped for dispatch is unstable: its callback receives its
//! handle and must reschedule it ([`Kernel::schedule`]) or free it
//! ([`Kernel::free`]) before returning. The same holds for events created
//! with [`Kernel::spawn`] outside a callback. Compaction only patches
//! handles held by the heap.

use heapless::Vec;

use crate::arena::{Arena, ArenaUsage, Handle};
use crate::compactor::{self, Compaction};
#[cfg(debug_assertions)]
use crate::config::UNSTABLE_TRACKING;
use crate::config::{
    COMPACTION_THRESHOLD, EVENT_BUFFER_SIZE, HEAP_CAPACITY, INTERRUPT_CAPACITY, MAX_CALLBACKS,
};
use crate::error::Error;
use crate::event::{record_size, CallbackId, Event, EventFn, InterruptFn, SLOT_SIZE};
use crate::heap::{Due, ScheduleHeap};
use crate::interrupt::InterruptRing;
#[cfg(debug_assertions)]
use crate::stability::StabilityTracker;
use crate::tick::{Tick, TickClock};

/// Running counters, all wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KernelStats {
    pub quanta: u32,
    /// Events popped from the heap.
    pub dispatched: u32,
    pub missed_deadlines: u32,
    /// Missed-deadline diagnostics lost to a full interrupt ring.
    pub dropped_diagnostics: u32,
    /// Events whose callback slot named no registered callback. They are
    /// dropped from the heap but not freed: the kernel cannot know their
    /// size, so their bytes stay allocated until [`Kernel::initialize`].
    pub orphaned: u32,
    pub collections: u32,
    /// Compaction passes that moved memory.
    pub compactions: u32,
    pub bytes_moved: u32,
}

/// Default missed-deadline diagnostic.
pub fn report_missed_deadline<S>(kernel: &mut Kernel<S>) {
    warn!(
        "dispatcher: missed deadline ({} so far)",
        kernel.stats.missed_deadlines
    );
}

/// The kernel context. `S` is application state handed to every callback.
pub struct Kernel<S> {
    clock: &'static TickClock,
    arena: Arena<EVENT_BUFFER_SIZE>,
    heap: ScheduleHeap<HEAP_CAPACITY>,
    interrupts: InterruptRing<InterruptFn<S>, INTERRUPT_CAPACITY>,
    callbacks: Vec<EventFn<S>, MAX_CALLBACKS>,
    missed_deadline: InterruptFn<S>,
    compaction_threshold: usize,
    /// Nesting depth of `suspend_compaction`.
    compaction_holds: u8,
    stats: KernelStats,
    #[cfg(debug_assertions)]
    stability: StabilityTracker<UNSTABLE_TRACKING>,
    state: S,
}

impl<S> Kernel<S> {
    /// A freshly initialized kernel driven by `clock`. The clock is left
    /// paused until [`Kernel::resume`] or [`Kernel::run_forever`].
    pub fn new(clock: &'static TickClock, state: S) -> Self {
        let mut kernel = Self {
            clock,
            arena: Arena::new(),
            heap: ScheduleHeap::new(),
            interrupts: InterruptRing::new(),
            callbacks: Vec::new(),
            missed_deadline: report_missed_deadline::<S>,
            compaction_threshold: COMPACTION_THRESHOLD,
            compaction_holds: 0,
            stats: KernelStats::default(),
            #[cfg(debug_assertions)]
            stability: StabilityTracker::new(),
            state,
        };
        kernel.initialize();
        kernel
    }

    /// Pause the clock and drop every event, pending interrupt and
    /// statistic. Registered callbacks and application state are kept.
    pub fn initialize(&mut self) {
        self.clock.pause();
        self.arena.reset();
        self.heap.clear();
        self.interrupts.clear();
        self.compaction_holds = 0;
        self.stats = KernelStats::default();
        #[cfg(debug_assertions)]
        self.stability.clear();
        debug!("dispatcher: initialized");
    }

    // -----------------------------------------------------------------------
    // Clock and state
    // -----------------------------------------------------------------------

    /// Application state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Application state, mutably. Callbacks reach it through their
    /// `&mut Kernel<S>`.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// The clock driving this kernel.
    pub fn clock(&self) -> &'static TickClock {
        self.clock
    }

    /// The current tick, as used for scheduling.
    pub fn current_tick(&self) -> Tick {
        self.clock.current()
    }

    /// Stop the tick from advancing. Interrupts and events that are
    /// already due still run.
    pub fn pause(&self) {
        self.clock.pause();
    }

    /// Let the tick advance again.
    pub fn resume(&self) {
        self.clock.resume();
    }

    /// Whether the tick is advancing.
    pub fn is_running(&self) -> bool {
        self.clock.is_running()
    }

    /// Read-only view of the event arena.
    pub fn arena(&self) -> &Arena<EVENT_BUFFER_SIZE> {
        &self.arena
    }

    /// Arena occupancy snapshot.
    pub fn usage(&self) -> ArenaUsage {
        self.arena.usage()
    }

    /// Read-only view of the scheduled events.
    pub fn heap(&self) -> &ScheduleHeap<HEAP_CAPACITY> {
        &self.heap
    }

    /// Counters since the last [`Kernel::initialize`].
    pub fn stats(&self) -> KernelStats {
        self.stats
    }

    /// Interrupt callbacks waiting for the next quantum.
    pub fn pending_interrupts(&self) -> usize {
        self.interrupts.len()
    }

    // -----------------------------------------------------------------------
    // Callbacks and interrupts
    // -----------------------------------------------------------------------

    /// Add `callback` to the callback table.
    pub fn register_callback(&mut self, callback: EventFn<S>) -> Result<CallbackId, Error> {
        let id = CallbackId(self.callbacks.len() as u8);
        self.callbacks
            .push(callback)
            .map_err(|_| Error::CallbackTableFull)?;
        Ok(id)
    }

    /// Replace the diagnostic queued when an event runs late.
    pub fn on_missed_deadline(&mut self, callback: InterruptFn<S>) {
        self.missed_deadline = callback;
    }

    /// Defer `callback` to the start of the next quantum.
    pub fn enqueue_interrupt(&mut self, callback: InterruptFn<S>) -> Result<(), Error> {
        self.interrupts.enqueue(callback)
    }

    // -----------------------------------------------------------------------
    // Compaction control
    // -----------------------------------------------------------------------

    /// Minimum number of free blocks before an idle quantum compacts.
    pub fn set_compaction_threshold(&mut self, threshold: usize) {
        self.compaction_threshold = threshold;
    }

    /// Keep compaction from moving memory until the matching
    /// [`Kernel::resume_compaction`]. Nests.
    pub fn suspend_compaction(&mut self) {
        self.compaction_holds = self.compaction_holds.saturating_add(1);
    }

    /// Undo one [`Kernel::suspend_compaction`].
    pub fn resume_compaction(&mut self) {
        self.compaction_holds = self.compaction_holds.saturating_sub(1);
    }

    /// Whether any suspension is outstanding.
    pub fn is_compaction_suspended(&self) -> bool {
        self.compaction_holds > 0
    }

    // -----------------------------------------------------------------------
    // Raw records
    // -----------------------------------------------------------------------

    /// Allocate a record of `size` bytes, slot included. The record is
    /// unstable until scheduled, and its slot is uninitialized.
    pub fn allocate(&mut self, size: usize) -> Result<Handle, Error> {
        let handle = self.arena.allocate(size)?;
        self.mark_unstable(handle);
        Ok(handle)
    }

    /// Free a record. `size` must match the allocation.
    pub fn deallocate(&mut self, handle: Handle, size: usize) -> Result<(), Error> {
        self.check_stable(handle)?;
        self.arena.deallocate(handle, size)?;
        self.mark_stable(handle);
        Ok(())
    }

    /// Schedule `handle` to run `relative` ticks from now. Returns the
    /// absolute deadline.
    pub fn schedule(&mut self, relative: Tick, handle: Handle) -> Result<Tick, Error> {
        self.check_stable(handle)?;
        self.arena.bytes(handle, SLOT_SIZE)?;
        let deadline = self.heap.insert(relative, handle, self.clock.current())?;
        self.mark_stable(handle);
        trace!("dispatcher: {} due at {}", handle.offset(), deadline);
        Ok(deadline)
    }

    /// The `len` payload bytes following the record's slot.
    pub fn payload(&self, handle: Handle, len: usize) -> Result<&[u8], Error> {
        self.check_stable(handle)?;
        let record_len = SLOT_SIZE.checked_add(len).ok_or(Error::InvalidHandle)?;
        let record = self.arena.bytes(handle, record_len)?;
        Ok(&record[SLOT_SIZE..])
    }

    /// The `len` payload bytes following the record's slot, mutably.
    pub fn payload_mut(&mut self, handle: Handle, len: usize) -> Result<&mut [u8], Error> {
        self.check_stable(handle)?;
        let record_len = SLOT_SIZE.checked_add(len).ok_or(Error::InvalidHandle)?;
        let record = self.arena.bytes_mut(handle, record_len)?;
        Ok(&mut record[SLOT_SIZE..])
    }

    /// Point the record's slot at `callback`.
    pub fn set_callback(&mut self, handle: Handle, callback: CallbackId) -> Result<(), Error> {
        self.check_callback(callback)?;
        self.check_stable(handle)?;
        self.arena.bytes_mut(handle, SLOT_SIZE)?[0] = callback.0;
        Ok(())
    }

    /// The callback named by the record's slot.
    pub fn callback_of(&self, handle: Handle) -> Result<CallbackId, Error> {
        self.check_stable(handle)?;
        let slot = self.arena.bytes(handle, SLOT_SIZE)?[0];
        Ok(CallbackId(slot))
    }

    // -----------------------------------------------------------------------
    // Typed events
    // -----------------------------------------------------------------------

    /// Allocate an `E` record running `callback`. The event is unstable:
    /// schedule or free it.
    pub fn spawn<E: Event>(&mut self, callback: CallbackId, event: &E) -> Result<Handle, Error> {
        self.check_callback(callback)?;
        let handle = self.allocate(record_size::<E>())?;
        let record = self.arena.bytes_mut(handle, record_size::<E>())?;
        record[0] = callback.0;
        event.encode(&mut record[SLOT_SIZE..]);
        Ok(handle)
    }

    /// Spawn and schedule in one step. Nothing is left allocated on error.
    pub fn schedule_new<E: Event>(
        &mut self,
        relative: Tick,
        callback: CallbackId,
        event: &E,
    ) -> Result<Handle, Error> {
        let handle = self.spawn(callback, event)?;
        if let Err(err) = self.schedule(relative, handle) {
            self.free::<E>(handle)?;
            return Err(err);
        }
        Ok(handle)
    }

    /// Decode the payload of an `E` record.
    pub fn event<E: Event>(&self, handle: Handle) -> Result<E, Error> {
        self.payload(handle, E::PAYLOAD).map(E::decode)
    }

    /// Overwrite the payload of an `E` record.
    pub fn update<E: Event>(&mut self, handle: Handle, event: &E) -> Result<(), Error> {
        event.encode(self.payload_mut(handle, E::PAYLOAD)?);
        Ok(())
    }

    /// Free an `E` record.
    pub fn free<E: Event>(&mut self, handle: Handle) -> Result<(), Error> {
        self.deallocate(handle, record_size::<E>())
    }

    // -----------------------------------------------------------------------
    // Dispatch loop
    // -----------------------------------------------------------------------

    /// Run one quantum. Returns the number of events that came due.
    pub fn run_quantum(&mut self) -> usize {
        self.stats.quanta = self.stats.quanta.wrapping_add(1);
        self.drain_interrupts();

        let mut dispatched = 0;
        while let Some(due) = self.pop_due() {
            self.dispatch(due.handle);
            dispatched += 1;
        }

        if dispatched == 0 {
            self.compact();
        }
        dispatched
    }

    /// Start the clock and dispatch forever.
    pub fn run_forever(&mut self) -> ! {
        self.clock.resume();
        loop {
            self.run_quantum();
        }
    }

    /// Collect freed memory, then compact unless suspended or not
    /// fragmented enough.
    ///
    /// The dispatch loop calls this on idle quanta. Calling it anywhere
    /// else, in particular from a callback whose own record is unstable,
    /// breaks the event protocol: compaction may move that record without
    /// telling the callback. Debug builds then report the handle as
    /// [`Error::StaleHandle`].
    pub fn compact(&mut self) -> Compaction {
        if self.arena.freshly_freed().next().is_some() {
            self.stats.collections = self.stats.collections.wrapping_add(1);
        }
        if self.is_compaction_suspended() {
            self.arena.collect();
            return Compaction::Suspended;
        }

        let outcome = compactor::compact(
            &mut self.arena,
            &mut self.heap,
            self.compaction_threshold,
        );
        if let Compaction::Compacted {
            spans, bytes_moved, ..
        } = outcome
        {
            if spans > 0 {
                self.stats.compactions = self.stats.compactions.wrapping_add(1);
                self.stats.bytes_moved = self.stats.bytes_moved.wrapping_add(bytes_moved as u32);
                let unstable = self.unstable_count();
                if unstable > 0 {
                    warn!("dispatcher: compacted with {} unstable events", unstable);
                }
            }
        }
        outcome
    }

    fn drain_interrupts(&mut self) {
        while let Some(callback) = self.interrupts.pop() {
            callback(self);
        }
    }

    fn pop_due(&mut self) -> Option<Due> {
        let due = self.heap.pop_if_due(self.clock.current())?;
        if due.is_late() {
            self.stats.missed_deadlines = self.stats.missed_deadlines.wrapping_add(1);
            debug!(
                "dispatcher: {} ran {} ticks late",
                due.handle.offset(),
                due.lateness
            );
            if self.interrupts.enqueue(self.missed_deadline).is_err() {
                self.stats.dropped_diagnostics = self.stats.dropped_diagnostics.wrapping_add(1);
            }
        }
        self.mark_unstable(due.handle);
        Some(due)
    }

    fn dispatch(&mut self, handle: Handle) {
        self.stats.dispatched = self.stats.dispatched.wrapping_add(1);

        let callback = self
            .arena
            .bytes(handle, SLOT_SIZE)
            .ok()
            .and_then(|slot| self.callbacks.get(slot[0] as usize).copied());
        let Some(callback) = callback else {
            // Size unknown, so the record cannot be freed: it leaks.
            warn!("dispatcher: {} has no callback, dropped", handle.offset());
            self.stats.orphaned = self.stats.orphaned.wrapping_add(1);
            self.mark_stable(handle);
            return;
        };

        callback(self, handle);

        if self.is_unstable(handle) {
            debug!(
                "dispatcher: {} neither freed nor rescheduled",
                handle.offset()
            );
        }
    }

    fn check_callback(&self, callback: CallbackId) -> Result<(), Error> {
        if callback.index() < self.callbacks.len() {
            Ok(())
        } else {
            Err(Error::UnknownCallback)
        }
    }

    // -----------------------------------------------------------------------
    // Stability instrumentation (debug builds only)
    // -----------------------------------------------------------------------

    fn check_stable(&self, handle: Handle) -> Result<(), Error> {
        #[cfg(debug_assertions)]
        self.stability.check(handle, self.arena.epoch())?;
        #[cfg(not(debug_assertions))]
        let _ = handle;
        Ok(())
    }

    fn mark_unstable(&mut self, handle: Handle) {
        #[cfg(debug_assertions)]
        self.stability.mark_unstable(handle, self.arena.epoch());
        #[cfg(not(debug_assertions))]
        let _ = handle;
    }

    fn mark_stable(&mut self, handle: Handle) {
        #[cfg(debug_assertions)]
        self.stability.mark_stable(handle);
        #[cfg(not(debug_assertions))]
        let _ = handle;
    }

    fn is_unstable(&self, handle: Handle) -> bool {
        #[cfg(debug_assertions)]
        let unstable = self.stability.is_unstable(handle);
        #[cfg(not(debug_assertions))]
        let unstable = {
            let _ = handle;
            false
        };
        unstable
    }

    fn unstable_count(&self) -> usize {
        #[cfg(debug_assertions)]
        let count = self.stability.len();
        #[cfg(not(debug_assertions))]
        let count = 0;
        count
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
