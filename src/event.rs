//! # Event Model
//!
//! Every record in the arena starts with a one-byte callback slot:
//!
//! ```text
//!   handle
//!     │
//!     ▼
//!   ┌──────┬──────────────────────────────┐
//!   │ slot │ payload (PAYLOAD bytes)      │
//!   └──────┴──────────────────────────────┘
//!     │
//!     └─► CallbackId: index into the kernel's callback table
//! ```
//!
//! The kernel only ever reads the slot. Payload bytes belong to the
//! application, which describes them with the [`Event`] trait so they can
//! be written and read back without raw pointer casts into the arena.

use crate::dispatcher::Kernel;

/// Bytes occupied by the callback slot at the front of every record.
pub const SLOT_SIZE: usize = 1;

/// Index of a callback registered with [`Kernel::register_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CallbackId(pub(crate) u8);

impl CallbackId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Body of an event: runs when the event's deadline arrives.
///
/// The handle names the event's own record. The record is unstable while
/// the callback runs; it must either be rescheduled or freed before the
/// callback returns.
pub type EventFn<S> = fn(&mut Kernel<S>, crate::arena::Handle);

/// Deferred work queued on the interrupt ring.
pub type InterruptFn<S> = fn(&mut Kernel<S>);

/// A typed event payload stored after the callback slot.
pub trait Event: Sized {
    /// Encoded payload length in bytes.
    const PAYLOAD: usize;

    /// Write the payload. `out` is exactly `PAYLOAD` bytes long.
    fn encode(&self, out: &mut [u8]);

    /// Read the payload back. `bytes` is exactly `PAYLOAD` bytes long.
    fn decode(bytes: &[u8]) -> Self;
}

/// Full record size (slot plus payload) for events of type `E`.
#[inline]
pub const fn record_size<E: Event>() -> usize {
    SLOT_SIZE + E::PAYLOAD
}

/// Events with no payload: just a callback.
impl Event for () {
    const PAYLOAD: usize = 0;

    fn encode(&self, _out: &mut [u8]) {}

    fn decode(_bytes: &[u8]) -> Self {}
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Timeout {
        retries: u8,
        port: u16,
    }

    impl Event for Timeout {
        const PAYLOAD: usize = 3;

        fn encode(&self, out: &mut [u8]) {
            out[0] = self.retries;
            out[1..3].copy_from_slice(&self.port.to_le_bytes());
        }

        fn decode(bytes: &[u8]) -> Self {
            Self {
                retries: bytes[0],
                port: u16::from_le_bytes([bytes[1], bytes[2]]),
            }
        }
    }

    #[test]
    fn test_record_size_includes_slot() {
        assert_eq!(record_size::<()>(), 1);
        assert_eq!(record_size::<Timeout>(), 4);
    }

    #[test]
    fn test_payload_encoding() {
        let mut buf = [0u8; Timeout::PAYLOAD];
        Timeout {
            retries: 3,
            port: 0x1234,
        }
        .encode(&mut buf);
        assert_eq!(buf, [3, 0x34, 0x12]);

        let back = Timeout::decode(&buf);
        assert_eq!((back.retries, back.port), (3, 0x1234));
    }

    #[test]
    fn test_callback_id_index() {
        assert_eq!(CallbackId(7).index(), 7);
    }
}
