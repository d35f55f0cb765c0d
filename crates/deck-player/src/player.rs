//! Player state machine and transport surface.
//!
//! A [`Player`] validates VCR-style transport calls against the state table,
//! owns the decode session (engine, converter, ring buffer, producer thread)
//! and the output sink, and coordinates the seek/reset protocols with the
//! decode producer loop.
//!
//! Transport calls must be externally serialized per player instance; the
//! internal locking only covers the producer-thread hooks (completion/error)
//! that run concurrently with transport calls.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;

use crate::config::{OutputSpec, PlayerConfig};
use crate::decode::{self, DecodeShared, ProducerHooks};
use crate::engine::{DecoderEngine, EngineFactory, StreamDescriptor};
use crate::error::{PlayerError, Result};
use crate::events::{EventTx, PlayerEvent};
use crate::resample::StreamConverter;
use crate::ring::RingBuffer;
use crate::sink::{AudioSink, SinkAdapter, SinkBuilder, SinkControls};
use crate::source::MediaInput;

/// Transport state. See the transition table on [`Player`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Initialized,
    Preparing,
    Prepared,
    Started,
    Paused,
    Stopped,
    PlaybackCompleted,
    Error,
    Released,
}

/// Shared handle used for completion chaining (`set_next`).
pub type SharedPlayer = Arc<Mutex<Player>>;

/// One prepared decode session: everything created by `prepare` and torn
/// down by `reset`/`release`.
struct Session {
    engine: Arc<Mutex<Box<dyn DecoderEngine>>>,
    descriptor: StreamDescriptor,
    shared: Arc<DecodeShared>,
    controls: Arc<SinkControls>,
    sink: Arc<dyn AudioSink>,
    out_spec: OutputSpec,
    chunk_frames: usize,
    /// Template write half; the live handle is duplicated into each producer
    /// thread launch (only one is ever active, enforced by the exit latch).
    producer: crate::ring::RingProducer,
    thread: Option<JoinHandle<()>>,
}

/// Transport-controlled audio player.
///
/// Legal transitions (anything else raises `IllegalState` and leaves the
/// state unchanged):
///
/// | From                               | Call          | To          |
/// |------------------------------------|---------------|-------------|
/// | Idle                               | set_data_source | Initialized |
/// | Initialized, Stopped               | prepare       | Prepared    |
/// | Prepared, Paused, PlaybackCompleted | start        | Started     |
/// | Started                            | pause         | Paused      |
/// | Started, Paused                    | stop          | Stopped     |
/// | any (with a session)               | seek_to       | unchanged   |
/// | any                                | reset         | Idle        |
/// | any                                | release       | Released    |
pub struct Player {
    config: PlayerConfig,
    engine_factory: Box<dyn EngineFactory>,
    sink_builder: Box<dyn SinkBuilder>,
    state: Arc<Mutex<PlayerState>>,
    events: EventTx,
    events_rx: Receiver<PlayerEvent>,
    next: Arc<Mutex<Option<SharedPlayer>>>,
    looping: bool,
    volume: (f32, f32),
    input: Option<MediaInput>,
    session: Option<Session>,
}

impl Player {
    pub fn new(
        config: PlayerConfig,
        engine_factory: impl EngineFactory + 'static,
        sink_builder: impl SinkBuilder + 'static,
    ) -> Self {
        let (events, events_rx) = EventTx::channel();
        Self {
            config,
            engine_factory: Box::new(engine_factory),
            sink_builder: Box::new(sink_builder),
            state: Arc::new(Mutex::new(PlayerState::Idle)),
            events,
            events_rx,
            next: Arc::new(Mutex::new(None)),
            looping: false,
            volume: (1.0, 1.0),
            input: None,
            session: None,
        }
    }

    /// Notification stream; clone freely.
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    pub fn state(&self) -> PlayerState {
        *self.state.lock().unwrap()
    }

    /// Attach a data source. Only legal from `Idle`.
    pub fn set_data_source(&mut self, input: MediaInput) -> Result<()> {
        self.expect_state(&[PlayerState::Idle], "setDataSource")?;
        self.input = Some(input);
        self.set_state(PlayerState::Initialized);
        Ok(())
    }

    /// Open the sink and the decoder engine, configure the converter, and
    /// launch the decode producer thread (parked until `start`).
    pub fn prepare(&mut self) -> Result<()> {
        self.expect_state(
            &[PlayerState::Initialized, PlayerState::Stopped],
            "prepare",
        )?;
        // At most one producer thread per player: retire a session left over
        // from a previous stop before building the new one.
        self.teardown_session();
        self.set_state(PlayerState::Preparing);

        let input = match self.input.take() {
            Some(input) => {
                self.input = input.try_reclone();
                input
            }
            None => {
                self.set_state(PlayerState::Error);
                return Err(PlayerError::OpenFailed("no data source attached".into()));
            }
        };

        match self.build_session(input) {
            Ok(session) => {
                tracing::info!(
                    duration_ms = session.descriptor.duration_ms().map(|d| d as i64).unwrap_or(-1),
                    codec = session.descriptor.codec.as_deref().unwrap_or("unknown"),
                    "prepared"
                );
                self.session = Some(session);
                self.set_state(PlayerState::Prepared);
                self.events.emit(PlayerEvent::Prepared);
                Ok(())
            }
            Err(e) => {
                self.set_state(PlayerState::Error);
                Err(e)
            }
        }
    }

    /// Start or resume playback. From `PlaybackCompleted` this rewinds to
    /// zero (relaunching the decode thread, which has exited at EOF).
    pub fn start(&mut self) -> Result<()> {
        let from = self.expect_state(
            &[
                PlayerState::Prepared,
                PlayerState::Paused,
                PlayerState::PlaybackCompleted,
            ],
            "start",
        )?;

        if from == PlayerState::PlaybackCompleted {
            self.seek_to(0)?;
            let exited = self
                .session
                .as_ref()
                .map(|s| s.shared.latch.is_set())
                .unwrap_or(false);
            if exited {
                let session = self.session.as_mut().ok_or(PlayerError::IllegalState {
                    op: "start",
                    state: PlayerState::PlaybackCompleted,
                })?;
                Self::spawn_producer(&self.state, &self.events, &self.next, session)?;
            }
        }

        let session = self.session.as_ref().ok_or(PlayerError::IllegalState {
            op: "start",
            state: from,
        })?;
        session.controls.set_paused(false);
        session.sink.start()?;
        session.shared.gate.set_playing(true);
        self.set_state(PlayerState::Started);
        self.events.emit(PlayerEvent::Started);
        Ok(())
    }

    /// Pause playback. Buffered audio stays queued ("pause means pause").
    pub fn pause(&mut self) -> Result<()> {
        self.expect_state(&[PlayerState::Started], "pause")?;
        let session = self.session.as_ref().ok_or(PlayerError::IllegalState {
            op: "pause",
            state: PlayerState::Started,
        })?;
        session.shared.gate.set_playing(false);
        session.controls.set_paused(true);
        if let Err(e) = session.sink.pause() {
            tracing::warn!("sink pause failed: {e}");
        }
        self.set_state(PlayerState::Paused);
        self.events.emit(PlayerEvent::Paused);
        Ok(())
    }

    /// Stop playback. A new `prepare` is required before starting again.
    pub fn stop(&mut self) -> Result<()> {
        self.expect_state(&[PlayerState::Started, PlayerState::Paused], "stop")?;
        let session = self.session.as_ref().ok_or(PlayerError::IllegalState {
            op: "stop",
            state: PlayerState::Started,
        })?;
        session.shared.gate.set_playing(false);
        session.controls.set_paused(true);
        if let Err(e) = session.sink.stop() {
            tracing::warn!("sink stop failed: {e}");
        }
        self.set_state(PlayerState::Stopped);
        self.events.emit(PlayerEvent::Stopped);
        Ok(())
    }

    /// Seek to `ms`. Legal in any state that has a prepared session; the
    /// transport state is unchanged.
    ///
    /// The producer is paused, the engine seeks backward-biased to the
    /// nearest sync point, the target is published to the position clock, and
    /// buffered pre-seek audio is flushed at the adapter's next callback (at
    /// most one in-flight decoded chunk may still be heard).
    pub fn seek_to(&mut self, ms: u64) -> Result<()> {
        let Some(session) = self.session.as_ref() else {
            return Err(PlayerError::IllegalState {
                op: "seekTo",
                state: self.state(),
            });
        };

        let target_ts = session.descriptor.ms_to_ts(ms);
        session.shared.gate.set_playing(false);
        {
            let mut engine = session.engine.lock().unwrap();
            engine.flush();
            if let Err(e) = engine.seek_to_ts(target_ts) {
                tracing::warn!(ms, "seek failed: {e}");
            }
        }
        session.shared.clock.publish(target_ts);
        session.controls.request_flush();
        session.shared.gate.set_playing(true);
        self.events.emit(PlayerEvent::SeekComplete);
        Ok(())
    }

    /// Current position in milliseconds, `-1` when no stream is loaded.
    pub fn position_ms(&self) -> i64 {
        match &self.session {
            Some(s) => match s.shared.clock.load() {
                Some(ts) => s.descriptor.ts_to_ms(ts) as i64,
                None => -1,
            },
            None => -1,
        }
    }

    /// Stream duration in milliseconds, `-1` when unknown or no stream.
    pub fn duration_ms(&self) -> i64 {
        self.session
            .as_ref()
            .and_then(|s| s.descriptor.duration_ms())
            .map(|ms| ms as i64)
            .unwrap_or(-1)
    }

    /// Codec label of the loaded stream, for display.
    pub fn stream_codec(&self) -> Option<String> {
        self.session.as_ref().and_then(|s| s.descriptor.codec.clone())
    }

    /// Whether the decode gate is open (decoding allowed to progress).
    pub fn is_playing(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.shared.gate.is_playing())
            .unwrap_or(false)
    }

    /// On end-of-stream, restart from zero instead of completing.
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
        if let Some(s) = &self.session {
            s.shared.looping.store(looping, Ordering::Release);
        }
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Per-channel playback gain, applied inside the sink adapter.
    pub fn set_volume(&mut self, left: f32, right: f32) {
        self.volume = (left, right);
        if let Some(s) = &self.session {
            s.controls.set_volume(left, right);
        }
    }

    /// Player to start automatically when this one completes (non-looping).
    pub fn set_next(&mut self, next: Option<SharedPlayer>) {
        *self.next.lock().unwrap() = next;
    }

    /// Tear everything down and return to `Idle`, ready for a new
    /// `set_data_source`. Runs the reset rendezvous with the producer thread.
    pub fn reset(&mut self) -> Result<()> {
        self.teardown_session();
        self.input = None;
        self.set_state(PlayerState::Idle);
        Ok(())
    }

    /// Terminal teardown; the player cannot be reused afterwards except via
    /// `reset`.
    pub fn release(&mut self) {
        self.teardown_session();
        self.input = None;
        self.set_state(PlayerState::Released);
    }

    fn set_state(&self, state: PlayerState) {
        *self.state.lock().unwrap() = state;
    }

    fn expect_state(&self, allowed: &[PlayerState], op: &'static str) -> Result<PlayerState> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(PlayerError::IllegalState { op, state })
        }
    }

    fn build_session(&mut self, input: MediaInput) -> Result<Session> {
        let (producer, consumer) = RingBuffer::with_capacity(
            self.config.ring_capacity_frames,
            self.config.output.channels,
        );
        let shared = Arc::new(DecodeShared::new(self.looping));
        let controls = Arc::new(SinkControls::new());
        controls.set_volume(self.volume.0, self.volume.1);

        let adapter = SinkAdapter::new(consumer, shared.clone(), controls.clone());
        let sink_session = self.sink_builder.open(self.config.output, adapter)?;

        let engine = match self.engine_factory.open(input) {
            Ok(engine) => engine,
            Err(e) => {
                sink_session.sink.close();
                return Err(e);
            }
        };
        let descriptor = engine.descriptor().clone();

        let mut session = Session {
            engine: Arc::new(Mutex::new(engine)),
            descriptor,
            shared,
            controls,
            sink: sink_session.sink,
            out_spec: sink_session.spec,
            chunk_frames: self.config.chunk_frames,
            producer,
            thread: None,
        };

        if let Err(e) = Self::spawn_producer(&self.state, &self.events, &self.next, &mut session) {
            session.sink.close();
            return Err(e);
        }
        Ok(session)
    }

    /// Configure a fresh converter and launch the decode producer thread.
    fn spawn_producer(
        state: &Arc<Mutex<PlayerState>>,
        events: &EventTx,
        next: &Arc<Mutex<Option<SharedPlayer>>>,
        session: &mut Session,
    ) -> Result<()> {
        let converter = StreamConverter::new(
            session.descriptor.sample_rate,
            session.descriptor.channels,
            session.out_spec,
            session.chunk_frames,
        )?;

        let hooks = Self::producer_hooks(state, events, next, session);
        let engine = session.engine.clone();
        let shared = session.shared.clone();
        let producer = session.producer.duplicate();

        session.shared.latch.arm();
        let handle = thread::Builder::new()
            .name("decode".into())
            .spawn(move || decode::run_producer(engine, converter, producer, shared, hooks));
        match handle {
            Ok(handle) => {
                session.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                session.shared.latch.set();
                Err(PlayerError::AllocationFailed(format!(
                    "spawn decode thread: {e}"
                )))
            }
        }
    }

    fn producer_hooks(
        state: &Arc<Mutex<PlayerState>>,
        events: &EventTx,
        next: &Arc<Mutex<Option<SharedPlayer>>>,
        session: &Session,
    ) -> ProducerHooks {
        let on_complete = {
            let state = state.clone();
            let events = events.clone();
            let next = next.clone();
            let shared = session.shared.clone();
            let controls = session.controls.clone();
            let sink = session.sink.clone();
            Box::new(move || {
                *state.lock().unwrap() = PlayerState::PlaybackCompleted;
                shared.gate.set_playing(false);
                controls.set_paused(true);
                if let Err(e) = sink.stop() {
                    tracing::warn!("sink stop after completion failed: {e}");
                }
                events.emit(PlayerEvent::PlaybackComplete);

                let chained = next.lock().unwrap().clone();
                if let Some(next_player) = chained {
                    start_chained(&next_player);
                }
            }) as Box<dyn Fn() + Send>
        };

        let on_loop = {
            let state = state.clone();
            let events = events.clone();
            Box::new(move || {
                let mut s = state.lock().unwrap();
                *s = PlayerState::PlaybackCompleted;
                events.emit(PlayerEvent::PlaybackComplete);
                *s = PlayerState::Started;
            }) as Box<dyn Fn() + Send>
        };

        let on_error = {
            let state = state.clone();
            let events = events.clone();
            let shared = session.shared.clone();
            Box::new(move |e: PlayerError| {
                *state.lock().unwrap() = PlayerState::Error;
                shared.gate.set_playing(false);
                events.emit(PlayerEvent::Error { kind: e.kind() });
            }) as Box<dyn Fn(PlayerError) + Send>
        };

        ProducerHooks {
            on_complete,
            on_loop,
            on_error,
        }
    }

    /// Reset rendezvous + teardown: wake a parked producer, cancel, wait for
    /// its exit, then flush codec buffers and close the sink. Engine handles
    /// are never touched concurrently with the producer.
    fn teardown_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        session.shared.gate.set_playing(true);
        session.shared.gate.cancel();
        session.shared.latch.wait();
        if let Some(handle) = session.thread.take() {
            let _ = handle.join();
        }

        session.engine.lock().unwrap().flush();
        session.sink.close();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.teardown_session();
    }
}

/// Start the chained player from the completion hook.
///
/// Uses `try_lock` with a bounded retry: the handle may be momentarily held
/// by its owner, and chaining a player back to itself must not deadlock the
/// producer thread.
fn start_chained(next: &SharedPlayer) {
    for _ in 0..100 {
        match next.try_lock() {
            Ok(mut p) => {
                if let Err(e) = p.start() {
                    tracing::warn!("failed to start next player: {e}");
                }
                return;
            }
            Err(std::sync::TryLockError::WouldBlock) => {
                thread::sleep(std::time::Duration::from_millis(1));
            }
            Err(std::sync::TryLockError::Poisoned(_)) => {
                tracing::warn!("next player mutex poisoned; not chaining");
                return;
            }
        }
    }
    tracing::warn!("next player stayed busy; not chaining");
}
