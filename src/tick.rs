//! # Tick Clock
//!
//! The kernel's time base: a wrapping signed counter advanced once per
//! hardware timer period.
//!
//! ## Wraparound Model
//!
//! Ticks behave like sequence numbers. Two ticks are never compared
//! directly; instead their wrapping difference is read as a signed value:
//!
//! ```text
//!   offset(a, now) = a.wrapping_sub(now)      (signed)
//!
//!        past  <──────────  now  ──────────>  future
//!   -HORIZON ..= -1         0          1 ..= HORIZON - 1
//! ```
//!
//! A deadline therefore may be at most `HORIZON - 1` ticks ahead of the
//! current tick. Scheduling further would alias into the past.
//!
//! ## Concurrency
//!
//! The timer ISR is the only writer and the dispatch loop the only reader.
//! The counter is advanced with a plain atomic load followed by a store, so
//! no read-modify-write instructions are needed on the target.

use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(not(feature = "tick-8bit"))]
use core::sync::atomic::AtomicI16 as AtomicTick;
#[cfg(feature = "tick-8bit")]
use core::sync::atomic::AtomicI8 as AtomicTick;

/// A point on the wrapping schedule clock (16-bit by default).
#[cfg(not(feature = "tick-8bit"))]
pub type Tick = i16;

/// A point on the wrapping schedule clock (8-bit with `tick-8bit`).
#[cfg(feature = "tick-8bit")]
pub type Tick = i8;

/// Half the representable tick range. Relative deadlines must be below it.
pub const HORIZON: u32 = 1 << (Tick::BITS - 1);

/// Signed wrapping distance from `now` to `tick`. Positive means `tick`
/// is in the future, negative means it has passed.
#[inline]
pub const fn offset(tick: Tick, now: Tick) -> Tick {
    tick.wrapping_sub(now)
}

/// The hardware-driven tick counter.
///
/// Safe to share as a `static` between the timer ISR and the dispatch loop.
#[derive(Debug)]
pub struct TickClock {
    tick: AtomicTick,
    running: AtomicBool,
}

impl TickClock {
    /// A paused clock at tick zero.
    pub const fn new() -> Self {
        Self {
            tick: AtomicTick::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Advance one tick. Called from the timer ISR only; a no-op while paused.
    #[inline]
    pub fn advance(&self) {
        if self.running.load(Ordering::Acquire) {
            let tick = self.tick.load(Ordering::Relaxed);
            self.tick.store(tick.wrapping_add(1), Ordering::Release);
        }
    }

    /// The current tick.
    #[inline]
    pub fn current(&self) -> Tick {
        self.tick.load(Ordering::Acquire)
    }

    /// Stop `advance` from having any effect. Dispatch continues.
    pub fn pause(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Let `advance` move the clock again.
    pub fn resume(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// False while paused.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paused_clock_ignores_advance() {
        let clock = TickClock::new();
        assert!(!clock.is_running());
        clock.advance();
        assert_eq!(clock.current(), 0);

        clock.resume();
        clock.advance();
        clock.advance();
        assert_eq!(clock.current(), 2);

        clock.pause();
        clock.advance();
        assert_eq!(clock.current(), 2);
    }

    #[test]
    fn test_clock_wraps() {
        let clock = TickClock::new();
        clock.resume();
        for _ in 0..(2 * HORIZON) {
            clock.advance();
        }
        assert_eq!(clock.current(), 0);

        clock.advance();
        assert_eq!(clock.current(), 1);
    }

    #[test]
    fn test_offset_across_wraparound() {
        assert_eq!(offset(5, 0), 5);
        assert_eq!(offset(0, 5), -5);
        // A deadline just past the wrap point is still in the future.
        assert_eq!(offset(Tick::MIN, Tick::MAX), 1);
        assert_eq!(offset(Tick::MIN.wrapping_add(2), Tick::MAX), 3);
        // The furthest schedulable deadline.
        let far = Tick::MAX.wrapping_add(10);
        assert_eq!(offset(far.wrapping_add(Tick::MAX), far), Tick::MAX);
    }

    #[test]
    fn test_horizon_is_half_range() {
        assert_eq!(HORIZON, Tick::MAX as u32 + 1);
    }
}
