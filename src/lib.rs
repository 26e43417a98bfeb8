//! # EvOS: Event Operating System
//!
//! A cooperative, tick-driven event kernel for microcontrollers with a few
//! hundred bytes of RAM to spare.
//!
//! ## Overview
//!
//! EvOS runs *events*: small records that name a callback and carry a few
//! bytes of payload. An event is scheduled a number of ticks into the
//! future; when the tick clock reaches its deadline, the dispatch loop runs
//! its callback, which either reschedules the event or frees it.
//!
//! - **No threads**: callbacks run to completion, one at a time
//! - **No allocator**: all events live in one fixed byte arena
//! - **No preemption**: the timer interrupt only advances a counter
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │              Application events & callbacks            │
//! ├────────────────────────────────────────────────────────┤
//! │           Kernel context (dispatcher.rs)               │
//! │   spawn() · schedule() · free() · run_quantum()        │
//! ├──────────────┬─────────────────┬───────────────────────┤
//! │ Sched. Heap  │  Event Arena    │  Interrupt Ring       │
//! │ heap.rs      │  arena.rs       │  interrupt.rs         │
//! │ ─ insert()   │  ─ allocate()   │  ─ enqueue()          │
//! │ ─ pop_if_due │  ─ deallocate() │  ─ drained per quantum│
//! │ ─ relocate() │  collector.rs   │                       │
//! │              │  compactor.rs   │                       │
//! ├──────────────┴─────────────────┴───────────────────────┤
//! │             Tick Clock (tick.rs) · kernel::CLOCK       │
//! ├────────────────────────────────────────────────────────┤
//! │          Arch Port (arch/cortex_m4.rs): SysTick        │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! The arena is at most 256 bytes so that a handle fits in one byte.
//! Freeing is O(1): blocks go onto a side list. When a quantum finds
//! nothing due, the kernel folds that list back into the sorted free list,
//! and once the arena is fragmented enough it slides live records together,
//! patching every handle the scheduling heap holds.
//!
//! Handles held anywhere else are not patched. An event that is allocated
//! but not scheduled is *unstable*; debug builds report its use after a
//! compaction as [`Error::StaleHandle`].
//!
//! ## Features
//!
//! - `tick-8bit`: 8-bit ticks (127-tick horizon) instead of 16-bit
//! - `defmt`: log through `defmt`
//! - `firmware`: build the demo image for `thumbv7em-none-eabihf`

#![no_std]

mod fmt;

pub mod arch;
pub mod arena;
pub mod collector;
pub mod compactor;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod heap;
pub mod interrupt;
pub mod kernel;
pub mod stability;
pub mod tick;

pub use arena::Handle;
pub use compactor::Compaction;
pub use dispatcher::{Kernel, KernelStats};
pub use error::Error;
pub use event::{CallbackId, Event};
pub use tick::{Tick, TickClock};
