//! # Architecture Abstraction Layer
//!
//! Provides the hardware boundary for the tick source. Currently
//! implements the Cortex-M4 port; other targets add sibling modules that
//! advance [`crate::kernel::CLOCK`] from their own timer interrupt.

pub mod cortex_m4;
