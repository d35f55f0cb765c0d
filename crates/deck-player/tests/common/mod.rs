//! Shared test doubles: a synthetic decoder engine and a manually-driven
//! sink whose adapter the tests pull directly (standing in for a device
//! callback).

// Each test binary uses a different subset of these fixtures.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use deck_player::config::{OutputSpec, PlayerConfig};
use deck_player::engine::{
    AudioPacket, DecodeOutcome, DecodedFrame, DecoderEngine, EngineFactory, StreamDescriptor,
};
use deck_player::error::{PlayerError, Result};
use deck_player::sink::{AudioSink, SinkAdapter, SinkBuilder, SinkSession};
use deck_player::source::MediaInput;
use symphonia::core::units::TimeBase;

/// Constant-amplitude synthetic source with frame-unit timestamps.
pub struct TestEngine {
    descriptor: StreamDescriptor,
    total_frames: u64,
    frames_per_packet: u64,
    cursor: u64,
    fail_after_packets: Option<u64>,
    packets_read: u64,
}

impl TestEngine {
    pub fn new(
        sample_rate: u32,
        channels: usize,
        total_frames: u64,
        frames_per_packet: u64,
    ) -> Self {
        Self {
            descriptor: StreamDescriptor {
                sample_rate,
                channels,
                time_base: TimeBase::new(1, sample_rate),
                n_frames: Some(total_frames),
                codec: Some("TEST".to_string()),
            },
            total_frames,
            frames_per_packet,
            cursor: 0,
            fail_after_packets: None,
            packets_read: 0,
        }
    }
}

impl DecoderEngine for TestEngine {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn active_track(&self) -> u32 {
        0
    }

    fn read_packet(&mut self) -> Result<Option<AudioPacket>> {
        if let Some(limit) = self.fail_after_packets {
            if self.packets_read >= limit {
                return Err(PlayerError::DecodeSubmitFailed("synthetic failure".into()));
            }
        }
        if self.cursor >= self.total_frames {
            return Ok(None);
        }
        let ts = self.cursor;
        let dur = self.frames_per_packet.min(self.total_frames - self.cursor);
        self.cursor += dur;
        self.packets_read += 1;
        Ok(Some(AudioPacket {
            track_id: 0,
            ts,
            dur,
            data: Box::new([]),
        }))
    }

    fn decode(&mut self, packet: AudioPacket) -> Result<DecodeOutcome> {
        let samples = vec![0.25f32; packet.dur as usize * self.descriptor.channels];
        Ok(DecodeOutcome::Frame(DecodedFrame {
            ts: packet.ts,
            sample_rate: self.descriptor.sample_rate,
            channels: self.descriptor.channels,
            samples,
        }))
    }

    fn seek_to_ts(&mut self, ts: u64) -> Result<()> {
        self.cursor = ts.min(self.total_frames);
        Ok(())
    }

    fn flush(&mut self) {}
}

/// Factory producing [`TestEngine`]s regardless of the data source.
pub struct TestEngineFactory {
    pub sample_rate: u32,
    pub channels: usize,
    pub total_frames: u64,
    pub frames_per_packet: u64,
    pub fail_open: bool,
    pub fail_after_packets: Option<u64>,
}

impl TestEngineFactory {
    pub fn stereo_48k(total_frames: u64, frames_per_packet: u64) -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            total_frames,
            frames_per_packet,
            fail_open: false,
            fail_after_packets: None,
        }
    }
}

impl EngineFactory for TestEngineFactory {
    fn open(&mut self, _input: MediaInput) -> Result<Box<dyn DecoderEngine>> {
        if self.fail_open {
            return Err(PlayerError::OpenFailed("synthetic open failure".into()));
        }
        let mut engine = TestEngine::new(
            self.sample_rate,
            self.channels,
            self.total_frames,
            self.frames_per_packet,
        );
        engine.fail_after_packets = self.fail_after_packets;
        Ok(Box::new(engine))
    }
}

/// Sink whose transport requests always succeed and whose adapter is pulled
/// manually by the test body.
pub struct ManualSink;

impl AudioSink for ManualSink {
    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}
}

pub type AdapterSlot = Arc<Mutex<Option<SinkAdapter>>>;

pub struct ManualSinkBuilder {
    slot: AdapterSlot,
}

impl ManualSinkBuilder {
    pub fn new() -> (Self, AdapterSlot) {
        let slot: AdapterSlot = Arc::new(Mutex::new(None));
        (Self { slot: slot.clone() }, slot)
    }
}

impl SinkBuilder for ManualSinkBuilder {
    fn open(&mut self, want: OutputSpec, adapter: SinkAdapter) -> Result<SinkSession> {
        *self.slot.lock().unwrap() = Some(adapter);
        Ok(SinkSession {
            sink: Arc::new(ManualSink),
            spec: want,
        })
    }
}

/// Builder that refuses to open, for prepare-failure paths.
pub struct FailingSinkBuilder;

impl SinkBuilder for FailingSinkBuilder {
    fn open(&mut self, _want: OutputSpec, _adapter: SinkAdapter) -> Result<SinkSession> {
        Err(PlayerError::SinkOpenFailed("synthetic sink failure".into()))
    }
}

/// Drive the captured adapter like a device callback would.
pub fn pull_frames(slot: &AdapterSlot, dst: &mut [f32]) -> usize {
    match slot.lock().unwrap().as_mut() {
        Some(adapter) => adapter.pull(dst),
        None => 0,
    }
}

/// Player config with the default 48 kHz stereo output spec.
pub fn test_config(ring_capacity_frames: usize) -> PlayerConfig {
    PlayerConfig {
        output: OutputSpec {
            sample_rate: 48_000,
            channels: 2,
        },
        ring_capacity_frames,
        chunk_frames: 256,
    }
}

/// Source value for tests; the synthetic factory ignores it.
pub fn any_source() -> MediaInput {
    MediaInput::path("/nonexistent/test-input.flac")
}
