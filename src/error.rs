//! # Kernel Errors
//!
//! Every fallible kernel operation returns `Result<_, Error>`. Nothing
//! blocks or retries: a failure is reported to the caller immediately.

use core::fmt;

/// Errors reported by the EvOS kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No free block is large enough for the requested record.
    ArenaExhausted,
    /// A record size of zero, or one that can never fit in the arena.
    InvalidSize,
    /// A handle (or handle + size) that falls outside the arena's blocks.
    InvalidHandle,
    /// The scheduling heap is at capacity.
    HeapFull,
    /// A relative deadline outside `[0, horizon)`.
    BeyondHorizon,
    /// The interrupt ring is at capacity; the callback was not queued.
    InterruptQueueFull,
    /// The callback table is at capacity.
    CallbackTableFull,
    /// A callback id that was never registered.
    UnknownCallback,
    /// An unstable handle was used after compaction moved the arena.
    /// Only detected in debug builds.
    StaleHandle,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ArenaExhausted => write!(f, "event arena exhausted"),
            Error::InvalidSize => write!(f, "invalid event size"),
            Error::InvalidHandle => write!(f, "handle outside the event arena"),
            Error::HeapFull => write!(f, "scheduling heap full"),
            Error::BeyondHorizon => write!(f, "deadline beyond the scheduling horizon"),
            Error::InterruptQueueFull => write!(f, "interrupt ring full"),
            Error::CallbackTableFull => write!(f, "callback table full"),
            Error::UnknownCallback => write!(f, "unregistered callback id"),
            Error::StaleHandle => write!(f, "unstable handle used across compaction"),
        }
    }
}

impl core::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    #[test]
    fn test_display_is_human_readable() {
        let mut out: heapless::String<64> = heapless::String::new();
        write!(out, "{}", Error::HeapFull).unwrap();
        assert_eq!(out.as_str(), "scheduling heap full");

        out.clear();
        write!(out, "{}", Error::StaleHandle).unwrap();
        assert_eq!(out.as_str(), "unstable handle used across compaction");
    }
}
