//! Decode-side flow control.
//!
//! [`PlaybackGate`] owns the playing/cancel flags shared between the
//! transport surface, the decode producer, and the sink adapter, so no raw
//! flags cross the thread seams:
//! - transport `start`/`pause` toggle the playing flag
//! - `reset` raises the cancel flag
//! - the sink adapter signals after each consumption so freed ring space is
//!   observed promptly
//!
//! [`ExitLatch`] is the reset rendezvous: armed before the producer thread is
//! launched, set as the thread's final act regardless of exit reason, waited
//! on by `reset` so teardown never races the decode loop.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug)]
struct GateState {
    playing: bool,
    cancelled: bool,
}

/// Condition variable + flags gating the producer's sole suspension point.
#[derive(Debug)]
pub(crate) struct PlaybackGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl PlaybackGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                playing: false,
                cancelled: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn set_playing(&self, playing: bool) {
        let mut g = self.state.lock().unwrap();
        g.playing = playing;
        drop(g);
        self.cv.notify_all();
    }

    pub(crate) fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    /// Raise the cancel flag and wake any waiter. One-way per session.
    pub(crate) fn cancel(&self) {
        let mut g = self.state.lock().unwrap();
        g.cancelled = true;
        drop(g);
        self.cv.notify_all();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.lock().unwrap().cancelled
    }

    /// Wake the backpressure wait without taking the mutex.
    ///
    /// Called from the audio callback after each consumption; the periodic
    /// re-check in [`wait_writable`] covers the narrow window where a notify
    /// can land between the waiter's predicate check and its sleep.
    pub(crate) fn notify_space(&self) {
        self.cv.notify_all();
    }

    /// Block until `(playing && free() >= frames)` or cancellation.
    ///
    /// Returns `true` to proceed, `false` when cancelled. This is the decode
    /// loop's only suspension point.
    pub(crate) fn wait_writable(&self, frames: usize, free: impl Fn() -> usize) -> bool {
        let mut g = self.state.lock().unwrap();
        loop {
            if g.cancelled {
                return false;
            }
            if g.playing && free() >= frames {
                return true;
            }
            let (next, _timeout) = self.cv.wait_timeout(g, Duration::from_millis(100)).unwrap();
            g = next;
        }
    }
}

/// One-shot producer-exit signal (the reset rendezvous).
#[derive(Debug)]
pub(crate) struct ExitLatch {
    done: Mutex<bool>,
    cv: Condvar,
}

impl ExitLatch {
    /// A latch starts set: with no producer launched there is nothing to
    /// wait for.
    pub(crate) fn new() -> Self {
        Self {
            done: Mutex::new(true),
            cv: Condvar::new(),
        }
    }

    /// Re-arm before (re)launching the producer thread.
    pub(crate) fn arm(&self) {
        *self.done.lock().unwrap() = false;
    }

    /// Signal producer exit. Idempotent.
    pub(crate) fn set(&self) {
        let mut done = self.done.lock().unwrap();
        *done = true;
        drop(done);
        self.cv.notify_all();
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.done.lock().unwrap()
    }

    /// Block until the producer has signalled exit.
    pub(crate) fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.cv.wait(done).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn wait_writable_blocks_until_playing() {
        let gate = Arc::new(PlaybackGate::new());
        let gate_bg = gate.clone();
        let handle = thread::spawn(move || gate_bg.wait_writable(1, || 10));

        // The waiter cannot proceed while paused, regardless of free space.
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        gate.set_playing(true);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn wait_writable_blocks_until_space() {
        let gate = Arc::new(PlaybackGate::new());
        gate.set_playing(true);
        let free = Arc::new(AtomicUsize::new(0));

        let gate_bg = gate.clone();
        let free_bg = free.clone();
        let handle = thread::spawn(move || {
            gate_bg.wait_writable(4, move || free_bg.load(Ordering::Relaxed))
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        free.store(8, Ordering::Relaxed);
        gate.notify_space();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn cancel_releases_a_parked_waiter() {
        let gate = Arc::new(PlaybackGate::new());
        let gate_bg = gate.clone();
        let handle = thread::spawn(move || gate_bg.wait_writable(1, || 0));

        gate.cancel();
        assert!(!handle.join().unwrap());
        assert!(gate.is_cancelled());
    }

    #[test]
    fn latch_wait_returns_once_set() {
        let latch = Arc::new(ExitLatch::new());
        assert!(latch.is_set());

        latch.arm();
        assert!(!latch.is_set());

        let latch_bg = latch.clone();
        let handle = thread::spawn(move || latch_bg.wait());
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());

        latch.set();
        handle.join().unwrap();
        assert!(latch.is_set());
    }
}
