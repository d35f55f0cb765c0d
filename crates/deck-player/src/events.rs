//! Transport notifications.
//!
//! Events are delivered over an unbounded channel registered at player
//! construction. Each playback session emits exactly one terminal
//! notification: `PlaybackComplete` on end-of-stream or `Error` on a fatal
//! decode failure.

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Notifications emitted by the player toward its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum PlayerEvent {
    /// `prepare` finished; the pipeline is ready to start.
    Prepared,
    /// Playback started or resumed.
    Started,
    /// Playback paused; buffered audio is retained.
    Paused,
    /// Playback stopped; a new `prepare` is required before starting again.
    Stopped,
    /// A seek request has been applied to the decode session.
    SeekComplete,
    /// The producer reached end-of-stream.
    PlaybackComplete,
    /// A fatal decode-side error ended the session.
    Error { kind: ErrorKind },
}

/// Sending half of the notification channel.
///
/// Cheap to clone into the producer thread's completion/error hooks. Sends
/// never block; a dropped receiver turns emission into a no-op.
#[derive(Clone)]
pub(crate) struct EventTx {
    tx: Sender<PlayerEvent>,
}

impl EventTx {
    pub(crate) fn channel() -> (Self, Receiver<PlayerEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    pub(crate) fn emit(&self, event: PlayerEvent) {
        tracing::debug!(?event, "player event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_delivers_in_order() {
        let (tx, rx) = EventTx::channel();
        tx.emit(PlayerEvent::Prepared);
        tx.emit(PlayerEvent::Started);
        assert_eq!(rx.try_recv(), Ok(PlayerEvent::Prepared));
        assert_eq!(rx.try_recv(), Ok(PlayerEvent::Started));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_survives_dropped_receiver() {
        let (tx, rx) = EventTx::channel();
        drop(rx);
        tx.emit(PlayerEvent::Stopped);
    }
}
