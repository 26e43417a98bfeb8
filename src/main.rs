//! # EvOS Example Firmware
//!
//! Demonstrates the event kernel on an STM32F4 with an LED on PA5:
//!
//! | Event | Period | Behavior |
//! |-------|--------|----------|
//! | `blink` | `BLINK_PERIOD` | Toggles the LED and reschedules itself |
//! | `watchdog` | `WATCHDOG_DELAY`, once | Latches the LED on if any deadline was missed or record lost, then frees itself |
//!
//! At 1 kHz ticks the LED toggles twice a second. Missed deadlines are
//! counted by the diagnostic installed with `on_missed_deadline`.

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;

use evos::{kernel, Event, Handle, Kernel, Tick};

// ---------------------------------------------------------------------------
// Timing (ticks at TICK_HZ; shorter with 8-bit ticks to stay in the horizon)
// ---------------------------------------------------------------------------

const BLINK_PERIOD: Tick = if Tick::BITS == 8 { 100 } else { 500i16 as Tick };
const WATCHDOG_DELAY: Tick = if Tick::BITS == 8 { 120 } else { 2000i16 as Tick };

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

const RCC_AHB1ENR: *mut u32 = 0x4002_3830 as *mut u32;
const GPIOA_MODER: *mut u32 = 0x4002_0000 as *mut u32;
const GPIOA_ODR: *mut u32 = 0x4002_0014 as *mut u32;
const LED_PIN: u32 = 5;

fn led_init() {
    unsafe {
        let en = core::ptr::read_volatile(RCC_AHB1ENR);
        core::ptr::write_volatile(RCC_AHB1ENR, en | 1);
        let moder = core::ptr::read_volatile(GPIOA_MODER);
        let moder = (moder & !(0b11 << (LED_PIN * 2))) | (0b01 << (LED_PIN * 2));
        core::ptr::write_volatile(GPIOA_MODER, moder);
    }
}

fn led_set(on: bool) {
    unsafe {
        let odr = core::ptr::read_volatile(GPIOA_ODR);
        let odr = if on { odr | (1 << LED_PIN) } else { odr & !(1 << LED_PIN) };
        core::ptr::write_volatile(GPIOA_ODR, odr);
    }
}

// ---------------------------------------------------------------------------
// Application state and events
// ---------------------------------------------------------------------------

#[derive(Default)]
struct App {
    missed: u16,
    /// Records that could not be freed.
    lost: u16,
}

/// Free `handle`, counting the failure instead of dropping it.
fn release<E: Event>(kernel: &mut Kernel<App>, handle: Handle) {
    if kernel.free::<E>(handle).is_err() {
        let app = kernel.state_mut();
        app.lost = app.lost.wrapping_add(1);
    }
}

/// Blink period and current LED level.
struct Blink {
    period: Tick,
    on: bool,
}

impl Event for Blink {
    const PAYLOAD: usize = 3;

    fn encode(&self, out: &mut [u8]) {
        out[..2].copy_from_slice(&(self.period as i16).to_le_bytes());
        out[2] = self.on as u8;
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            period: i16::from_le_bytes([bytes[0], bytes[1]]) as Tick,
            on: bytes[2] != 0,
        }
    }
}

fn blink(kernel: &mut Kernel<App>, handle: Handle) {
    let Ok(mut state) = kernel.event::<Blink>(handle) else {
        release::<Blink>(kernel, handle);
        return;
    };
    state.on = !state.on;
    led_set(state.on);
    if kernel.update(handle, &state).is_err() || kernel.schedule(state.period, handle).is_err()
    {
        release::<Blink>(kernel, handle);
    }
}

fn watchdog(kernel: &mut Kernel<App>, handle: Handle) {
    // Latch the LED on if anything ran late or leaked during start-up.
    if kernel.state().missed > 0 || kernel.state().lost > 0 {
        led_set(true);
    }
    release::<()>(kernel, handle);
}

fn count_missed(kernel: &mut Kernel<App>) {
    let app = kernel.state_mut();
    app.missed = app.missed.wrapping_add(1);
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Sets up the kernel, schedules the demo events and
/// starts dispatching. Does not return.
#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();
    led_init();

    let mut k = kernel::init(App::default());
    k.on_missed_deadline(count_missed);

    let blink_cb = k.register_callback(blink).expect("callback table");
    let watchdog_cb = k.register_callback(watchdog).expect("callback table");

    k.schedule_new(
        BLINK_PERIOD,
        blink_cb,
        &Blink {
            period: BLINK_PERIOD,
            on: false,
        },
    )
    .expect("schedule blink");
    k.schedule_new(WATCHDOG_DELAY, watchdog_cb, &())
        .expect("schedule watchdog");

    kernel::start(cp, &mut k)
}
