//! Decode producer loop.
//!
//! Runs on a dedicated thread owned by the player session. Each iteration
//! pulls a packet from the engine, decodes it, converts it to the sink
//! format, then parks at the backpressure gate until playback is running and
//! the ring buffer has room. The batch timestamp is published to the position
//! clock *before* the samples are written, so position queries never run
//! ahead of buffered audio.
//!
//! The loop's final act — on completion, cancellation, or error alike — is to
//! set the exit latch, so a concurrent `reset` can never wait forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::PositionClock;
use crate::engine::{DecodeOutcome, DecoderEngine};
use crate::error::PlayerError;
use crate::gate::{ExitLatch, PlaybackGate};
use crate::resample::StreamConverter;
use crate::ring::RingProducer;

/// State shared between the producer thread, the sink adapter, and the
/// transport surface for one decode session.
pub(crate) struct DecodeShared {
    pub(crate) gate: PlaybackGate,
    pub(crate) clock: PositionClock,
    pub(crate) latch: ExitLatch,
    pub(crate) looping: AtomicBool,
}

impl DecodeShared {
    pub(crate) fn new(looping: bool) -> Self {
        Self {
            gate: PlaybackGate::new(),
            clock: PositionClock::new(),
            latch: ExitLatch::new(),
            looping: AtomicBool::new(looping),
        }
    }
}

/// Observers the producer invokes exactly once per playback session
/// (or once per lap when looping).
pub(crate) struct ProducerHooks {
    /// End-of-stream with looping disabled.
    pub(crate) on_complete: Box<dyn Fn() + Send>,
    /// End-of-stream with looping enabled; the loop restarts after this.
    pub(crate) on_loop: Box<dyn Fn() + Send>,
    /// Fatal decode-side failure.
    pub(crate) on_error: Box<dyn Fn(PlayerError) + Send>,
}

enum LoopEnd {
    Completed,
    Cancelled,
    Failed(PlayerError),
}

/// Body of the decode producer thread.
///
/// The engine mutex is held only for individual engine calls, never across
/// the backpressure wait, so transport seek and reset teardown can take it.
pub(crate) fn run_producer(
    engine: Arc<Mutex<Box<dyn DecoderEngine>>>,
    mut converter: StreamConverter,
    mut producer: RingProducer,
    shared: Arc<DecodeShared>,
    hooks: ProducerHooks,
) {
    let active_track = engine.lock().unwrap().active_track();
    let channels = converter.output().channels;
    tracing::debug!(active_track, channels, "decode loop started");

    let end = 'run: loop {
        if shared.gate.is_cancelled() {
            break LoopEnd::Cancelled;
        }

        let packet = match engine.lock().unwrap().read_packet() {
            Ok(p) => p,
            Err(e) => break LoopEnd::Failed(e),
        };

        let Some(packet) = packet else {
            // End of stream: drain the converter tail before deciding.
            match converter.flush() {
                Ok(tail) => {
                    let frames = tail.len() / channels;
                    if frames > 0 {
                        if !shared
                            .gate
                            .wait_writable(frames, || producer.available_to_write())
                        {
                            break LoopEnd::Cancelled;
                        }
                        producer.write(tail);
                    }
                }
                Err(e) => break LoopEnd::Failed(e),
            }

            if shared.looping.load(Ordering::Acquire) {
                (hooks.on_loop)();
                {
                    let mut eng = engine.lock().unwrap();
                    eng.flush();
                    if let Err(e) = eng.seek_to_ts(0) {
                        tracing::warn!("loop restart seek failed: {e}");
                    }
                }
                converter.reset();
                shared.clock.publish(0);
                continue 'run;
            }
            break LoopEnd::Completed;
        };

        if packet.track_id != active_track {
            continue;
        }

        let frame = match engine.lock().unwrap().decode(packet) {
            Ok(DecodeOutcome::Frame(f)) => f,
            Ok(DecodeOutcome::NeedMoreInput) => continue,
            Err(e) => break LoopEnd::Failed(e),
        };

        let ts = frame.ts;
        let converted = match converter.convert(&frame.samples) {
            Ok(c) => c,
            Err(e) => break LoopEnd::Failed(e),
        };
        let frames = converted.len() / channels;
        if frames == 0 {
            continue;
        }

        // Sole suspension point: playing AND enough free space.
        if !shared
            .gate
            .wait_writable(frames, || producer.available_to_write())
        {
            break LoopEnd::Cancelled;
        }

        shared.clock.publish(ts);
        let wrote = producer.write(converted);
        debug_assert_eq!(wrote, frames);
    };

    match end {
        LoopEnd::Completed => {
            tracing::debug!("decode loop completed");
            (hooks.on_complete)();
        }
        LoopEnd::Cancelled => {
            tracing::debug!("decode loop cancelled");
        }
        LoopEnd::Failed(e) => {
            tracing::error!("decode loop error: {e}");
            (hooks.on_error)(e);
        }
    }

    // Final act regardless of exit reason: release any reset() waiter.
    shared.latch.set();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputSpec;
    use crate::engine::{AudioPacket, StreamDescriptor};
    use crate::ring::RingBuffer;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;
    use symphonia::core::units::TimeBase;

    /// Engine producing `packets` packets of `frames_per_packet` mono frames.
    struct ScriptedEngine {
        descriptor: StreamDescriptor,
        packets: u64,
        frames_per_packet: u64,
        cursor: u64,
        fail_at: Option<u64>,
    }

    impl ScriptedEngine {
        fn new(packets: u64, frames_per_packet: u64) -> Self {
            Self {
                descriptor: StreamDescriptor {
                    sample_rate: 48_000,
                    channels: 1,
                    time_base: TimeBase::new(1, 48_000),
                    n_frames: Some(packets * frames_per_packet),
                    codec: None,
                },
                packets,
                frames_per_packet,
                cursor: 0,
                fail_at: None,
            }
        }
    }

    impl DecoderEngine for ScriptedEngine {
        fn descriptor(&self) -> &StreamDescriptor {
            &self.descriptor
        }

        fn active_track(&self) -> u32 {
            0
        }

        fn read_packet(&mut self) -> crate::error::Result<Option<AudioPacket>> {
            if let Some(fail_at) = self.fail_at {
                if self.cursor >= fail_at {
                    return Err(PlayerError::DecodeSubmitFailed("scripted".into()));
                }
            }
            if self.cursor >= self.packets {
                return Ok(None);
            }
            let ts = self.cursor * self.frames_per_packet;
            self.cursor += 1;
            Ok(Some(AudioPacket {
                track_id: 0,
                ts,
                dur: self.frames_per_packet,
                data: Box::new([]),
            }))
        }

        fn decode(&mut self, packet: AudioPacket) -> crate::error::Result<DecodeOutcome> {
            Ok(DecodeOutcome::Frame(crate::engine::DecodedFrame {
                ts: packet.ts,
                sample_rate: 48_000,
                channels: 1,
                samples: vec![0.25; self.frames_per_packet as usize],
            }))
        }

        fn seek_to_ts(&mut self, ts: u64) -> crate::error::Result<()> {
            self.cursor = ts / self.frames_per_packet;
            Ok(())
        }

        fn flush(&mut self) {}
    }

    struct Harness {
        shared: Arc<DecodeShared>,
        completions: Arc<AtomicUsize>,
        errors: Arc<AtomicUsize>,
    }

    fn launch(engine: ScriptedEngine, capacity: usize, looping: bool) -> (Harness, crate::ring::RingConsumer) {
        let (producer, consumer) = RingBuffer::with_capacity(capacity, 1);
        let engine: Arc<Mutex<Box<dyn DecoderEngine>>> = Arc::new(Mutex::new(Box::new(engine)));
        let shared = Arc::new(DecodeShared::new(looping));
        let completions = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let converter = StreamConverter::new(
            48_000,
            1,
            OutputSpec {
                sample_rate: 48_000,
                channels: 1,
            },
            256,
        )
        .unwrap();

        let hooks = {
            let completions = completions.clone();
            let errors = errors.clone();
            let loops = completions.clone();
            ProducerHooks {
                on_complete: Box::new(move || {
                    completions.fetch_add(1, Ordering::SeqCst);
                }),
                on_loop: Box::new(move || {
                    loops.fetch_add(1, Ordering::SeqCst);
                }),
                on_error: Box::new(move |_| {
                    errors.fetch_add(1, Ordering::SeqCst);
                }),
            }
        };

        let shared_bg = shared.clone();
        shared.latch.arm();
        thread::spawn(move || run_producer(engine, converter, producer, shared_bg, hooks));

        (
            Harness {
                shared,
                completions,
                errors,
            },
            consumer,
        )
    }

    #[test]
    fn paused_producer_makes_no_progress() {
        let (h, cons) = launch(ScriptedEngine::new(16, 64), 1024, false);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(cons.available_to_read(), 0);
        assert_eq!(h.shared.clock.load(), None);

        h.shared.gate.cancel();
        h.shared.latch.wait();
    }

    #[test]
    fn producer_fills_ring_and_completes() {
        let (h, mut cons) = launch(ScriptedEngine::new(16, 64), 2048, false);
        h.shared.gate.set_playing(true);

        // 16 packets * 64 frames fit the ring entirely.
        h.shared.latch.wait();
        assert_eq!(h.completions.load(Ordering::SeqCst), 1);
        assert_eq!(h.errors.load(Ordering::SeqCst), 0);
        assert_eq!(cons.available_to_read(), 1024);

        // Clock trails the last batch's start timestamp.
        assert_eq!(h.shared.clock.load(), Some(15 * 64));

        let mut dst = vec![0.0f32; 1024];
        assert_eq!(cons.read(&mut dst), 1024);
        assert!(dst.iter().all(|s| *s == 0.25));
    }

    #[test]
    fn clock_publish_precedes_ring_write() {
        let (h, cons) = launch(ScriptedEngine::new(4, 32), 1024, false);
        h.shared.gate.set_playing(true);
        h.shared.latch.wait();

        // Whatever is readable was published to the clock first, so the
        // clock can never lag a buffered batch.
        assert!(cons.available_to_read() > 0);
        assert!(h.shared.clock.load().is_some());
    }

    #[test]
    fn cancel_while_blocked_on_full_ring_terminates() {
        // Ring (64 frames after rounding) is far smaller than the stream.
        let (h, _cons) = launch(ScriptedEngine::new(1000, 64), 64, false);
        h.shared.gate.set_playing(true);
        thread::sleep(Duration::from_millis(50));

        h.shared.gate.set_playing(false);
        h.shared.gate.cancel();
        h.shared.latch.wait();
        assert_eq!(h.completions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn read_error_invokes_error_hook() {
        let mut engine = ScriptedEngine::new(16, 64);
        engine.fail_at = Some(4);
        let (h, _cons) = launch(engine, 2048, false);
        h.shared.gate.set_playing(true);

        h.shared.latch.wait();
        assert_eq!(h.errors.load(Ordering::SeqCst), 1);
        assert_eq!(h.completions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn looping_restarts_from_zero() {
        let (h, mut cons) = launch(ScriptedEngine::new(4, 64), 128, true);
        h.shared.gate.set_playing(true);

        // Drain continuously; the loop should wrap and keep producing.
        let mut dst = vec![0.0f32; 128];
        let mut drained = 0usize;
        while drained < 2048 {
            let n = cons.read(&mut dst);
            drained += n;
            h.shared.gate.notify_space();
            if n == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        assert!(h.completions.load(Ordering::SeqCst) >= 1);

        h.shared.gate.cancel();
        h.shared.latch.wait();
    }
}
