//! # Kernel
//!
//! Startup glue between the hardware port and the [`Kernel`] context.
//!
//! The only global is the tick clock, which the SysTick handler advances.
//! Everything else lives in the `Kernel` value owned by `main`.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init(state)          ← Kernel bound to CLOCK, paused
//!         ├─► register callbacks, schedule the first events
//!         └─► kernel::start(cp, &mut k)    ← no return
//!               ├─► Configure SysTick
//!               ├─► Set SysTick priority
//!               └─► Kernel::run_forever()
//! ```

use crate::arch::cortex_m4;
use crate::dispatcher::Kernel;
use crate::tick::TickClock;

// ---------------------------------------------------------------------------
// Global tick
// ---------------------------------------------------------------------------

/// The system tick. Written only by the SysTick handler; read by the
/// dispatch loop.
pub static CLOCK: TickClock = TickClock::new();

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Create the kernel context for this system, driven by [`CLOCK`].
///
/// The clock stays paused until [`start`], so events scheduled during
/// setup are all measured from tick zero.
pub fn init<S>(state: S) -> Kernel<S> {
    Kernel::new(&CLOCK, state)
}

/// Start the tick and run the dispatch loop. **Does not return.**
pub fn start<S>(mut core_peripherals: cortex_m::Peripherals, kernel: &mut Kernel<S>) -> ! {
    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_interrupt_priorities();
    kernel.run_forever()
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_binds_global_clock() {
        let kernel = init(0u8);
        assert!(core::ptr::eq(kernel.clock(), &CLOCK));
        assert!(!CLOCK.is_running());
        assert_eq!(*kernel.state(), 0);
    }
}
