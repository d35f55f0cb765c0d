//! Audio sink seam and the CPAL-backed implementation.
//!
//! [`SinkAdapter`] is the pull side of the pipeline: the sink's real-time
//! callback hands it a destination buffer and it fills as many frames as the
//! ring buffer holds, zero-padding the shortfall, applying per-channel gain,
//! and signalling the producer's backpressure condition. It never blocks or
//! allocates.
//!
//! [`CpalSinkBuilder`] opens a CPAL output stream on a dedicated command
//! thread (CPAL streams are not `Send`, the returned [`AudioSink`] handle
//! is), negotiates the device sample rate, and drives the adapter from the
//! device callback with sample-format dispatch and channel mapping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::config::OutputSpec;
use crate::decode::DecodeShared;
use crate::device;
use crate::error::{PlayerError, Result};
use crate::ring::RingConsumer;

/// Frames pulled from the adapter per callback batch.
const PULL_CHUNK_FRAMES: usize = 4096;

/// Shared switches and counters between the transport surface and the
/// adapter callback. All accesses are relaxed atomics; nothing here blocks.
#[derive(Debug)]
pub struct SinkControls {
    paused: AtomicBool,
    flush: AtomicBool,
    volume_left: AtomicU32,
    volume_right: AtomicU32,
    pulled_frames: AtomicU64,
    underrun_frames: AtomicU64,
    underrun_events: AtomicU64,
}

impl SinkControls {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(true),
            flush: AtomicBool::new(false),
            volume_left: AtomicU32::new(1.0f32.to_bits()),
            volume_right: AtomicU32::new(1.0f32.to_bits()),
            pulled_frames: AtomicU64::new(0),
            underrun_frames: AtomicU64::new(0),
            underrun_events: AtomicU64::new(0),
        }
    }

    /// While paused the adapter emits silence and does not drain the ring.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Ask the adapter to discard everything buffered at its next callback.
    pub fn request_flush(&self) {
        self.flush.store(true, Ordering::Release);
    }

    fn take_flush(&self) -> bool {
        self.flush.swap(false, Ordering::Acquire)
    }

    /// Per-channel playback gain.
    pub fn set_volume(&self, left: f32, right: f32) {
        self.volume_left.store(left.to_bits(), Ordering::Relaxed);
        self.volume_right.store(right.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> (f32, f32) {
        (
            f32::from_bits(self.volume_left.load(Ordering::Relaxed)),
            f32::from_bits(self.volume_right.load(Ordering::Relaxed)),
        )
    }

    /// Total frames delivered from the ring to the sink.
    pub fn pulled_frames(&self) -> u64 {
        self.pulled_frames.load(Ordering::Relaxed)
    }

    /// `(frames, events)` emitted as silence because the ring ran dry.
    pub fn underruns(&self) -> (u64, u64) {
        (
            self.underrun_frames.load(Ordering::Relaxed),
            self.underrun_events.load(Ordering::Relaxed),
        )
    }
}

impl Default for SinkControls {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull callback implementation handed to the sink at open time.
pub struct SinkAdapter {
    consumer: RingConsumer,
    shared: Arc<DecodeShared>,
    controls: Arc<SinkControls>,
}

impl SinkAdapter {
    pub(crate) fn new(
        consumer: RingConsumer,
        shared: Arc<DecodeShared>,
        controls: Arc<SinkControls>,
    ) -> Self {
        Self {
            consumer,
            shared,
            controls,
        }
    }

    /// Interleaved frame stride the adapter produces.
    pub fn channels(&self) -> usize {
        self.consumer.channels()
    }

    /// Fill `dst` from the ring buffer and return the frames actually
    /// obtained; the remainder of `dst` is zeroed.
    ///
    /// Real-time safe: one non-blocking ring read, relaxed counter updates,
    /// and a condition-variable notify.
    pub fn pull(&mut self, dst: &mut [f32]) -> usize {
        if self.controls.take_flush() {
            let dropped = self.consumer.discard_all();
            if dropped > 0 {
                tracing::trace!(dropped, "flushed stale buffered audio");
            }
            self.shared.gate.notify_space();
        }

        if self.controls.is_paused() {
            dst.fill(0.0);
            return 0;
        }

        let ch = self.consumer.channels();
        let requested = dst.len() / ch;
        let got = self.consumer.read(dst);
        dst[got * ch..].fill(0.0);

        if got < requested {
            self.controls.underrun_events.fetch_add(1, Ordering::Relaxed);
            self.controls
                .underrun_frames
                .fetch_add((requested - got) as u64, Ordering::Relaxed);
        }

        let (left, right) = self.controls.volume();
        if left != 1.0 || right != 1.0 {
            apply_gain(&mut dst[..got * ch], ch, left, right);
        }

        self.controls
            .pulled_frames
            .fetch_add(got as u64, Ordering::Relaxed);
        // Freed space must be observed promptly by the producer.
        self.shared.gate.notify_space();
        got
    }
}

fn apply_gain(samples: &mut [f32], channels: usize, left: f32, right: f32) {
    if channels == 1 {
        let gain = 0.5 * (left + right);
        for s in samples {
            *s *= gain;
        }
        return;
    }
    for frame in samples.chunks_exact_mut(channels) {
        frame[0] *= left;
        frame[1] *= right;
    }
}

/// Transport-facing handle to an opened sink. All methods are asynchronous
/// requests; failures after open are logged by the sink itself.
pub trait AudioSink: Send + Sync {
    fn start(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn close(&self);
}

/// Result of opening a sink: the control handle plus the negotiated spec.
///
/// `spec.channels` always equals the requested channel count; only the
/// sample rate may differ from the request.
pub struct SinkSession {
    pub sink: Arc<dyn AudioSink>,
    pub spec: OutputSpec,
}

/// Opens an [`AudioSink`] around a [`SinkAdapter`] at `prepare` time.
pub trait SinkBuilder: Send {
    fn open(&mut self, want: OutputSpec, adapter: SinkAdapter) -> Result<SinkSession>;
}

/// Device selection and scheduling hints for the CPAL sink.
///
/// `cpu_ids` pins the device callback thread on platforms that support it;
/// it is applied once per callback-thread lifetime and is purely a
/// performance hint.
#[derive(Clone, Debug, Default)]
pub struct CpalSinkOptions {
    /// Case-insensitive substring of the output device name; `None` selects
    /// the default device.
    pub device: Option<String>,
    /// CPUs to pin the callback thread to (empty = no pinning).
    pub cpu_ids: Vec<usize>,
}

/// [`SinkBuilder`] producing CPAL output streams.
pub struct CpalSinkBuilder {
    opts: CpalSinkOptions,
}

impl CpalSinkBuilder {
    pub fn new(opts: CpalSinkOptions) -> Self {
        Self { opts }
    }

    /// Default output device, no affinity hint.
    pub fn default_device() -> Self {
        Self::new(CpalSinkOptions::default())
    }
}

enum SinkCommand {
    Start,
    Pause,
    Stop,
    Close,
}

struct CpalSink {
    tx: Sender<SinkCommand>,
}

impl CpalSink {
    fn send(&self, cmd: SinkCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| PlayerError::SinkOpenFailed("sink thread terminated".into()))
    }
}

impl AudioSink for CpalSink {
    fn start(&self) -> Result<()> {
        self.send(SinkCommand::Start)
    }

    fn pause(&self) -> Result<()> {
        self.send(SinkCommand::Pause)
    }

    fn stop(&self) -> Result<()> {
        self.send(SinkCommand::Stop)
    }

    fn close(&self) {
        let _ = self.tx.send(SinkCommand::Close);
    }
}

impl SinkBuilder for CpalSinkBuilder {
    fn open(&mut self, want: OutputSpec, adapter: SinkAdapter) -> Result<SinkSession> {
        let (cmd_tx, cmd_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let opts = self.opts.clone();

        std::thread::Builder::new()
            .name("audio-sink".into())
            .spawn(move || sink_thread(want, adapter, opts, cmd_rx, ready_tx))
            .map_err(|e| PlayerError::SinkOpenFailed(format!("spawn sink thread: {e}")))?;

        let spec = ready_rx
            .recv()
            .map_err(|_| PlayerError::SinkOpenFailed("sink thread exited before opening".into()))??;

        Ok(SinkSession {
            sink: Arc::new(CpalSink { tx: cmd_tx }),
            spec,
        })
    }
}

/// Owns the CPAL stream for its whole lifetime and serializes transport
/// requests onto it.
fn sink_thread(
    want: OutputSpec,
    adapter: SinkAdapter,
    opts: CpalSinkOptions,
    cmd_rx: Receiver<SinkCommand>,
    ready_tx: Sender<Result<OutputSpec>>,
) {
    let host = cpal::default_host();

    let device = match device::pick_device(&host, opts.device.as_deref()) {
        Ok(d) => d,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let supported = match device::pick_output_config(&device, Some(want.sample_rate)) {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let sample_format = supported.sample_format();
    let mut stream_config = supported.config();
    if let Some(size) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = size;
    }
    let spec = OutputSpec {
        sample_rate: stream_config.sample_rate,
        channels: want.channels,
    };

    let stream = match build_output_stream(
        &device,
        &stream_config,
        sample_format,
        adapter,
        want.channels,
        opts.cpu_ids,
    ) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    tracing::info!(
        rate_hz = spec.sample_rate,
        channels = stream_config.channels,
        format = ?sample_format,
        "audio sink opened"
    );
    let _ = ready_tx.send(Ok(spec));

    for cmd in cmd_rx.iter() {
        match cmd {
            SinkCommand::Start => {
                if let Err(e) = stream.play() {
                    tracing::warn!("sink start failed: {e}");
                }
            }
            SinkCommand::Pause | SinkCommand::Stop => {
                if let Err(e) = stream.pause() {
                    tracing::warn!("sink pause failed: {e}");
                }
            }
            SinkCommand::Close => break,
        }
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    adapter: SinkAdapter,
    src_channels: usize,
    cpu_ids: Vec<usize>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, adapter, src_channels, cpu_ids),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, adapter, src_channels, cpu_ids),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, adapter, src_channels, cpu_ids),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, adapter, src_channels, cpu_ids),
        other => Err(PlayerError::SinkOpenFailed(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

/// Type-specialized stream builder. The callback pulls in bounded batches
/// through a preallocated buffer, maps channels to the device layout, and
/// converts `f32` to the device sample format.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut adapter: SinkAdapter,
    src_channels: usize,
    cpu_ids: Vec<usize>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let dst_channels = config.channels as usize;
    let mut pull_buf = vec![0.0f32; PULL_CHUNK_FRAMES * src_channels];
    let mut affinity_applied = false;

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                if !affinity_applied {
                    affinity_applied = true;
                    if !cpu_ids.is_empty() {
                        pin_current_thread(&cpu_ids);
                    }
                }

                let frames_total = data.len() / dst_channels;
                let mut frame = 0;
                while frame < frames_total {
                    let batch = (frames_total - frame).min(PULL_CHUNK_FRAMES);
                    let pulled_slice = &mut pull_buf[..batch * src_channels];
                    // pull() zero-fills shortfall, so the whole batch maps.
                    let _ = adapter.pull(pulled_slice);

                    for i in 0..batch {
                        let src_frame = &pulled_slice[i * src_channels..(i + 1) * src_channels];
                        let base = (frame + i) * dst_channels;
                        for c in 0..dst_channels {
                            let sample = mapped_sample(src_frame, c, dst_channels);
                            data[base + c] = <T as cpal::Sample>::from_sample::<f32>(sample);
                        }
                    }
                    frame += batch;
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PlayerError::SinkOpenFailed(e.to_string()))?;

    Ok(stream)
}

/// Map one adapter frame to a device channel.
///
/// Mapping rules: identical layouts pass through, mono duplicates, stereo
/// folds to mono by averaging, anything else clamps to the nearest source
/// channel.
fn mapped_sample(src_frame: &[f32], dst_ch: usize, dst_channels: usize) -> f32 {
    let src_channels = src_frame.len();
    match (src_channels, dst_channels) {
        (s, d) if s == d => src_frame[dst_ch],
        (1, _) => src_frame[0],
        (2, 1) => 0.5 * (src_frame[0] + src_frame[1]),
        _ => src_frame[dst_ch.min(src_channels - 1)],
    }
}

#[cfg(target_os = "linux")]
fn pin_current_thread(cpu_ids: &[usize]) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for id in cpu_ids {
            libc::CPU_SET(*id, &mut set);
        }
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0 {
            tracing::debug!(cpus = ?cpu_ids, "audio callback thread pinned");
        } else {
            tracing::warn!(
                "failed to set callback thread affinity: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_current_thread(cpu_ids: &[usize]) {
    tracing::debug!(cpus = ?cpu_ids, "cpu affinity hint unsupported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingBuffer;

    fn adapter_with_capacity(
        capacity: usize,
        channels: usize,
    ) -> (SinkAdapter, crate::ring::RingProducer, Arc<SinkControls>) {
        let (producer, consumer) = RingBuffer::with_capacity(capacity, channels);
        let shared = Arc::new(DecodeShared::new(false));
        let controls = Arc::new(SinkControls::new());
        controls.set_paused(false);
        let adapter = SinkAdapter::new(consumer, shared, controls.clone());
        (adapter, producer, controls)
    }

    #[test]
    fn pull_zero_fills_shortfall_and_counts_underruns() {
        let (mut adapter, mut producer, controls) = adapter_with_capacity(8, 2);
        producer.write(&[1.0, 1.0]);

        let mut dst = [0.5f32; 8];
        let got = adapter.pull(&mut dst);
        assert_eq!(got, 1);
        assert_eq!(&dst[..2], &[1.0, 1.0]);
        assert!(dst[2..].iter().all(|s| *s == 0.0));

        let (frames, events) = controls.underruns();
        assert_eq!(frames, 3);
        assert_eq!(events, 1);
        assert_eq!(controls.pulled_frames(), 1);
    }

    #[test]
    fn paused_pull_is_silent_and_does_not_drain() {
        let (mut adapter, mut producer, controls) = adapter_with_capacity(8, 2);
        producer.write(&[1.0, 1.0, 2.0, 2.0]);
        controls.set_paused(true);

        let mut dst = [0.5f32; 4];
        assert_eq!(adapter.pull(&mut dst), 0);
        assert!(dst.iter().all(|s| *s == 0.0));
        assert_eq!(producer.available_to_read(), 2);
    }

    #[test]
    fn flush_request_discards_buffered_audio() {
        let (mut adapter, mut producer, controls) = adapter_with_capacity(8, 2);
        producer.write(&[1.0, 1.0, 2.0, 2.0]);
        controls.request_flush();

        let mut dst = [0.0f32; 4];
        assert_eq!(adapter.pull(&mut dst), 0);
        assert_eq!(producer.available_to_read(), 0);

        // Flag is one-shot.
        producer.write(&[3.0, 3.0]);
        assert_eq!(adapter.pull(&mut dst), 1);
        assert_eq!(&dst[..2], &[3.0, 3.0]);
    }

    #[test]
    fn volume_scales_left_and_right() {
        let (mut adapter, mut producer, controls) = adapter_with_capacity(8, 2);
        controls.set_volume(0.5, 0.25);
        producer.write(&[1.0, 1.0, -1.0, -1.0]);

        let mut dst = [0.0f32; 4];
        assert_eq!(adapter.pull(&mut dst), 2);
        assert_eq!(dst, [0.5, 0.25, -0.5, -0.25]);
    }

    #[test]
    fn mono_volume_averages_the_pair() {
        let (mut adapter, mut producer, controls) = adapter_with_capacity(8, 1);
        controls.set_volume(1.0, 0.5);
        producer.write(&[1.0, 1.0]);

        let mut dst = [0.0f32; 2];
        assert_eq!(adapter.pull(&mut dst), 2);
        assert_eq!(dst, [0.75, 0.75]);
    }

    #[test]
    fn mapped_sample_applies_layout_rules() {
        assert_eq!(mapped_sample(&[0.1, 0.2], 1, 2), 0.2);
        assert_eq!(mapped_sample(&[0.4], 1, 2), 0.4);
        assert_eq!(mapped_sample(&[0.2, 0.6], 0, 1), 0.4);
        // Stereo into quad: channels beyond the source clamp to the last.
        assert_eq!(mapped_sample(&[0.1, 0.2], 3, 4), 0.2);
    }
}
