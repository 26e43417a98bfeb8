//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4: the SysTick timer that
//! drives the kernel tick, and its interrupt priority.
//!
//! The kernel is cooperative, so there is no context switch here. The
//! SysTick handler does exactly one thing: advance [`crate::kernel::CLOCK`].
//! All other work happens in the dispatch loop.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest). The tick can wait for any
//!   application ISR; it only has to fire once per period.

use cortex_m::peripheral::syst::SystClkSource;

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the kernel tick.
///
/// Sets up SysTick to fire at `TICK_HZ` using the processor clock. Each
/// interrupt advances the tick clock by one.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set SysTick to the lowest interrupt priority.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [31:24] = SysTick priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        let val = (val & 0x00FF_FFFF) | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler. Advances the tick; nothing else may run in
/// interrupt context.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn SysTick() {
    crate::kernel::CLOCK.advance();
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};

    #[test]
    fn test_reload_fits_systick_counter() {
        // SysTick is a 24-bit down-counter.
        let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
        assert!(reload > 0 && reload < (1 << 24));
    }
}
