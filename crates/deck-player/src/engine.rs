//! Decoder engine seam.
//!
//! The decode producer loop drives a [`DecoderEngine`] — read a compressed
//! packet, submit it for decoding, seek — without knowing which container or
//! codec library sits behind it. [`SymphoniaEngine`] is the production
//! implementation; tests drive the loop with synthetic engines.

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::units::{Time, TimeBase};

use crate::error::{PlayerError, Result};
use crate::source::MediaInput;

/// Decode errors are not considered fatal: the packet is discarded and the
/// next one is tried. More than this many consecutive failures is fatal.
const MAX_CONSECUTIVE_SKIPS: u32 = 3;

/// Shape of the selected audio stream.
#[derive(Clone, Debug)]
pub struct StreamDescriptor {
    /// Source sample rate in Hz.
    pub sample_rate: u32,
    /// Source channel count.
    pub channels: usize,
    /// Conversion between packet timestamps and wall time.
    pub time_base: TimeBase,
    /// Total frames when the container reports them.
    pub n_frames: Option<u64>,
    /// Codec label (best-effort).
    pub codec: Option<String>,
}

impl StreamDescriptor {
    /// Convert a stream timestamp to milliseconds.
    pub fn ts_to_ms(&self, ts: u64) -> u64 {
        let time = self.time_base.calc_time(ts);
        time.seconds * 1000 + (time.frac * 1000.0) as u64
    }

    /// Convert milliseconds to a stream timestamp, keeping sub-second
    /// precision.
    pub fn ms_to_ts(&self, ms: u64) -> u64 {
        let time = Time::new(ms / 1000, (ms % 1000) as f64 / 1000.0);
        self.time_base.calc_timestamp(time)
    }

    /// Total duration in milliseconds, when the container provides enough
    /// metadata to compute it.
    pub fn duration_ms(&self) -> Option<u64> {
        let frames = self.n_frames?;
        if self.sample_rate == 0 {
            return None;
        }
        Some(frames.saturating_mul(1000) / self.sample_rate as u64)
    }
}

/// One unit of compressed data pulled from the container.
#[derive(Clone, Debug)]
pub struct AudioPacket {
    pub track_id: u32,
    pub ts: u64,
    pub dur: u64,
    pub data: Box<[u8]>,
}

/// Decoded interleaved audio in the source format.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    /// Presentation timestamp of the first frame, in time-base units.
    pub ts: u64,
    pub sample_rate: u32,
    pub channels: usize,
    /// Interleaved samples, `channels` per frame.
    pub samples: Vec<f32>,
}

/// Result of submitting one packet to the decoder.
#[derive(Clone, Debug)]
pub enum DecodeOutcome {
    Frame(DecodedFrame),
    /// The decoder consumed the packet without producing audio; submit the
    /// next packet.
    NeedMoreInput,
}

/// Container/codec collaborator driven by the decode producer loop.
pub trait DecoderEngine: Send {
    fn descriptor(&self) -> &StreamDescriptor;

    /// Track id whose packets the producer loop should decode.
    fn active_track(&self) -> u32;

    /// Next packet from the container; `None` at end of stream.
    fn read_packet(&mut self) -> Result<Option<AudioPacket>>;

    /// Submit one packet for decoding.
    fn decode(&mut self, packet: AudioPacket) -> Result<DecodeOutcome>;

    /// Seek backward-biased to the nearest sync point at or before `ts`
    /// (time-base units).
    fn seek_to_ts(&mut self, ts: u64) -> Result<()>;

    /// Drop buffered codec state (after a seek or before teardown).
    fn flush(&mut self);
}

/// Opens a [`DecoderEngine`] for a data source at `prepare` time.
pub trait EngineFactory: Send {
    fn open(&mut self, input: MediaInput) -> Result<Box<dyn DecoderEngine>>;
}

/// Default factory producing [`SymphoniaEngine`]s.
pub struct SymphoniaEngineFactory;

impl EngineFactory for SymphoniaEngineFactory {
    fn open(&mut self, input: MediaInput) -> Result<Box<dyn DecoderEngine>> {
        Ok(Box::new(SymphoniaEngine::open(input)?))
    }
}

/// Symphonia-backed container probe + packet decoder.
pub struct SymphoniaEngine {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    descriptor: StreamDescriptor,
    sample_buf: Option<SampleBuffer<f32>>,
    buf_spec: Option<SignalSpec>,
    buf_frames: usize,
    consecutive_skips: u32,
}

impl SymphoniaEngine {
    /// Probe `input` and open a decoder for its best audio track.
    pub fn open(input: MediaInput) -> Result<Self> {
        let (source, hint) = input.into_parts()?;
        let mss = MediaSourceStream::new(source, Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlayerError::StreamInfoUnavailable(e.to_string()))?;
        let format = probed.format;

        // First track with a decodable codec, mirroring the container default.
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(PlayerError::NoSuitableStream)?;
        let track_id = track.id;
        let params: CodecParameters = track.codec_params.clone();

        let sample_rate = params.sample_rate.ok_or(PlayerError::NoSuitableStream)?;
        let channels = params
            .channels
            .map(|c| c.count())
            .ok_or(PlayerError::NoSuitableStream)?;
        let time_base = params
            .time_base
            .unwrap_or_else(|| TimeBase::new(1, sample_rate));

        let descriptor = StreamDescriptor {
            sample_rate,
            channels,
            time_base,
            n_frames: params.n_frames,
            codec: codec_name(&params),
        };

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| PlayerError::CodecOpenFailed(e.to_string()))?;

        tracing::debug!(
            rate_hz = sample_rate,
            channels,
            codec = descriptor.codec.as_deref().unwrap_or("unknown"),
            "decoder engine opened"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            descriptor,
            sample_buf: None,
            buf_spec: None,
            buf_frames: 0,
            consecutive_skips: 0,
        })
    }
}

impl DecoderEngine for SymphoniaEngine {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn active_track(&self) -> u32 {
        self.track_id
    }

    fn read_packet(&mut self) -> Result<Option<AudioPacket>> {
        match self.format.next_packet() {
            Ok(p) => Ok(Some(AudioPacket {
                track_id: p.track_id(),
                ts: p.ts(),
                dur: p.dur(),
                data: p.buf().into(),
            })),
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                Ok(None)
            }
            Err(SymphoniaError::ResetRequired) => {
                tracing::debug!("format reader requires reset; ending stream");
                Ok(None)
            }
            Err(e) => Err(PlayerError::DecodeSubmitFailed(e.to_string())),
        }
    }

    fn decode(&mut self, packet: AudioPacket) -> Result<DecodeOutcome> {
        let ts = packet.ts;
        let spkt = Packet::new_from_boxed_slice(packet.track_id, ts, packet.dur, packet.data);

        match self.decoder.decode(&spkt) {
            Ok(decoded) => {
                self.consecutive_skips = 0;
                let spec = *decoded.spec();
                let frames = decoded.frames();
                if frames == 0 {
                    return Ok(DecodeOutcome::NeedMoreInput);
                }

                if self.buf_spec != Some(spec) || frames > self.buf_frames {
                    self.sample_buf = Some(SampleBuffer::new(frames as u64, spec));
                    self.buf_spec = Some(spec);
                    self.buf_frames = frames;
                }
                let Some(buf) = self.sample_buf.as_mut() else {
                    return Err(PlayerError::AllocationFailed("sample buffer".into()));
                };
                buf.copy_interleaved_ref(decoded);

                Ok(DecodeOutcome::Frame(DecodedFrame {
                    ts,
                    sample_rate: spec.rate,
                    channels: spec.channels.count(),
                    samples: buf.samples().to_vec(),
                }))
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                self.consecutive_skips += 1;
                if self.consecutive_skips > MAX_CONSECUTIVE_SKIPS {
                    return Err(PlayerError::DecodeReceiveFailed(format!(
                        "{} consecutive packets rejected: {msg}",
                        self.consecutive_skips
                    )));
                }
                tracing::debug!("skipping undecodable packet: {msg}");
                Ok(DecodeOutcome::NeedMoreInput)
            }
            Err(e) => Err(PlayerError::DecodeReceiveFailed(e.to_string())),
        }
    }

    fn seek_to_ts(&mut self, ts: u64) -> Result<()> {
        self.format
            .seek(
                SeekMode::Coarse,
                SeekTo::TimeStamp {
                    ts,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| PlayerError::SeekFailed(e.to_string()))?;
        self.decoder.reset();
        Ok(())
    }

    fn flush(&mut self) {
        self.decoder.reset();
    }
}

/// Best-effort codec label for logs and status.
fn codec_name(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
