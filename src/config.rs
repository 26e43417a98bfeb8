//! # EvOS Configuration
//!
//! Compile-time constants governing memory sizing and kernel behavior.
//! All limits are fixed at compile time; nothing is allocated dynamically.
//!
//! The tick width is selected with the `tick-8bit` cargo feature (see
//! [`crate::tick`]); everything else lives here.

/// Size of the event arena in bytes, including the two reserved root bytes.
///
/// Handles are single-byte offsets, so this can never exceed 256. It must
/// be even: every block is a whole number of 2-byte units.
pub const EVENT_BUFFER_SIZE: usize = 256;

/// Maximum number of events that may sit in the scheduling heap at once.
pub const HEAP_CAPACITY: usize = 16;

/// Capacity of the deferred interrupt ring.
pub const INTERRUPT_CAPACITY: usize = 8;

/// Number of distinct event callbacks the kernel can register.
/// Callback ids are stored in a single byte at the head of each event.
pub const MAX_CALLBACKS: usize = 16;

/// Number of free blocks that must exist before an idle quantum bothers
/// compacting the arena. Below this, fragmentation is tolerated.
pub const COMPACTION_THRESHOLD: usize = 5;

/// How many unstable events the debug-build stability tracker follows.
pub const UNSTABLE_TRACKING: usize = 8;

/// SysTick frequency in Hz. One tick per period, so the default horizon of
/// a 16-bit tick is about 32.7 seconds.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

const _: () = assert!(EVENT_BUFFER_SIZE <= 256 && EVENT_BUFFER_SIZE % 2 == 0);
const _: () = assert!(MAX_CALLBACKS <= 256);
