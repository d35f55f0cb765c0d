//! Decode-side position clock.

use std::sync::atomic::{AtomicI64, Ordering};

const UNSET: i64 = -1;

/// Last published presentation timestamp, in stream time-base units.
///
/// The producer publishes a batch's timestamp *before* writing the batch into
/// the ring buffer, so a position query can never run ahead of audio that is
/// actually buffered. A single atomic word keeps reads tear-free from any
/// thread.
#[derive(Debug)]
pub struct PositionClock {
    ts: AtomicI64,
}

impl PositionClock {
    pub fn new() -> Self {
        Self {
            ts: AtomicI64::new(UNSET),
        }
    }

    /// Publish the timestamp of the batch about to be queued.
    pub fn publish(&self, ts: u64) {
        self.ts.store(ts as i64, Ordering::Release);
    }

    /// Latest published timestamp, or `None` before the first publish.
    pub fn load(&self) -> Option<u64> {
        match self.ts.load(Ordering::Acquire) {
            UNSET => None,
            ts => Some(ts as u64),
        }
    }

    /// Forget the published position (new decode session).
    pub fn clear(&self) {
        self.ts.store(UNSET, Ordering::Release);
    }
}

impl Default for PositionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset() {
        let clock = PositionClock::new();
        assert_eq!(clock.load(), None);
    }

    #[test]
    fn publish_then_load() {
        let clock = PositionClock::new();
        clock.publish(48_000);
        assert_eq!(clock.load(), Some(48_000));
        clock.publish(96_000);
        assert_eq!(clock.load(), Some(96_000));
    }

    #[test]
    fn clear_resets_to_unset() {
        let clock = PositionClock::new();
        clock.publish(7);
        clock.clear();
        assert_eq!(clock.load(), None);
    }

    #[test]
    fn zero_is_a_valid_position() {
        let clock = PositionClock::new();
        clock.publish(0);
        assert_eq!(clock.load(), Some(0));
    }
}
