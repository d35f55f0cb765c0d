//! Conversion of decoded audio to the sink's fixed output format.
//!
//! [`StreamConverter`] remaps channel layout and, when the source rate differs
//! from the sink rate, runs Rubato's streaming sinc resampler in fixed input
//! chunks. Decoded frames of arbitrary size are staged internally; whole
//! chunks are converted as they fill and the tail is drained by
//! [`StreamConverter::flush`] at end of stream.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::config::OutputSpec;
use crate::error::{PlayerError, Result};

/// Remix + resample stage between the decoder and the ring buffer.
pub struct StreamConverter {
    src_channels: usize,
    src_rate: u32,
    out: OutputSpec,
    chunk_frames: usize,
    /// `None` when the source rate already matches the sink rate.
    ///
    /// `Send` because the converter travels into the decode thread.
    resampler: Option<Box<dyn Resampler<f32> + Send>>,
    staged: Vec<f32>,
    scratch: Vec<f32>,
    out_buf: Vec<f32>,
}

impl StreamConverter {
    /// Build a converter from the source shape to the sink spec.
    pub fn new(
        src_rate: u32,
        src_channels: usize,
        out: OutputSpec,
        chunk_frames: usize,
    ) -> Result<Self> {
        if src_rate == 0 || src_channels == 0 {
            return Err(PlayerError::ResamplerInitFailed(format!(
                "degenerate source format: {src_rate} Hz, {src_channels} ch"
            )));
        }
        let chunk_frames = chunk_frames.max(1);

        let resampler = if src_rate == out.sample_rate {
            tracing::debug!(rate_hz = out.sample_rate, "resample skipped");
            None
        } else {
            let f_ratio = out.sample_rate as f64 / src_rate as f64;

            let sinc_len = 128;
            let window = WindowFunction::BlackmanHarris2;
            let params = SincInterpolationParameters {
                sinc_len,
                f_cutoff: calculate_cutoff(sinc_len, window),
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window,
            };

            let resampler = Async::<f32>::new_sinc(
                f_ratio,
                1.1,
                &params,
                chunk_frames,
                out.channels,
                FixedAsync::Input,
            )
            .map_err(|e| PlayerError::ResamplerInitFailed(e.to_string()))?;
            tracing::debug!(
                from_hz = src_rate,
                to_hz = out.sample_rate,
                chunk_frames,
                "resampling"
            );
            Some(Box::new(resampler) as Box<dyn Resampler<f32> + Send>)
        };

        let scratch = match &resampler {
            Some(rs) => vec![0.0f32; rs.output_frames_max() * out.channels],
            None => Vec::new(),
        };

        Ok(Self {
            src_channels,
            src_rate,
            out,
            chunk_frames,
            resampler,
            staged: Vec::new(),
            scratch,
            out_buf: Vec::new(),
        })
    }

    /// Output frames expected for `input_frames` more input, including the
    /// resampler's internal delay, ceiling-rounded by the rate ratio.
    pub fn estimated_output_frames(&self, input_frames: usize) -> usize {
        match &self.resampler {
            None => input_frames,
            Some(rs) => {
                let ratio = self.out.sample_rate as f64 / self.src_rate as f64;
                ((rs.output_delay() + input_frames) as f64 * ratio).ceil() as usize
            }
        }
    }

    /// Convert one decoded batch of interleaved source samples.
    ///
    /// Returns the converted interleaved samples ready for the ring buffer
    /// (possibly empty while input is being staged).
    pub fn convert(&mut self, samples: &[f32]) -> Result<&[f32]> {
        self.out_buf.clear();
        remix_into(
            &mut self.staged,
            samples,
            self.src_channels,
            self.out.channels,
        );

        let ch = self.out.channels;
        let estimate = self.estimated_output_frames(self.staged.len() / ch) * ch;

        match &mut self.resampler {
            None => {
                self.out_buf.append(&mut self.staged);
            }
            Some(rs) => {
                self.out_buf.reserve(estimate);
                let chunk_samples = self.chunk_frames * ch;
                let mut consumed = 0;
                while self.staged.len() - consumed >= chunk_samples {
                    let chunk = &self.staged[consumed..consumed + chunk_samples];
                    let produced = process_chunk(
                        rs.as_mut(),
                        chunk,
                        self.chunk_frames,
                        &mut self.scratch,
                        ch,
                        None,
                    )?;
                    self.out_buf.extend_from_slice(&self.scratch[..produced * ch]);
                    consumed += chunk_samples;
                }
                self.staged.drain(..consumed);
            }
        }

        Ok(&self.out_buf)
    }

    /// Drain any staged partial chunk at end of stream.
    pub fn flush(&mut self) -> Result<&[f32]> {
        self.out_buf.clear();
        let ch = self.out.channels;

        match &mut self.resampler {
            None => {
                self.out_buf.append(&mut self.staged);
            }
            Some(rs) => {
                let tail_frames = self.staged.len() / ch;
                if tail_frames > 0 {
                    let tail: Vec<f32> = self.staged.drain(..).collect();
                    let produced = process_chunk(
                        rs.as_mut(),
                        &tail,
                        tail_frames,
                        &mut self.scratch,
                        ch,
                        Some(tail_frames),
                    )?;
                    self.out_buf.extend_from_slice(&self.scratch[..produced * ch]);
                }
            }
        }

        Ok(&self.out_buf)
    }

    /// Discard staged input and internal resampler history (loop restart).
    pub fn reset(&mut self) {
        self.staged.clear();
        self.out_buf.clear();
        if let Some(rs) = &mut self.resampler {
            rs.reset();
        }
    }

    /// Sink spec this converter produces.
    pub fn output(&self) -> OutputSpec {
        self.out
    }
}

/// Run one resampler call over `frames` input frames into `scratch`.
fn process_chunk(
    rs: &mut dyn Resampler<f32>,
    input: &[f32],
    frames: usize,
    scratch: &mut [f32],
    channels: usize,
    partial_len: Option<usize>,
) -> Result<usize> {
    let input_adapter = InterleavedSlice::new(input, channels, frames)
        .map_err(|e| PlayerError::ResampleFailed(format!("input adapter: {e}")))?;

    let scratch_frames = scratch.len() / channels;
    let mut output_adapter = InterleavedSlice::new_mut(scratch, channels, scratch_frames)
        .map_err(|e| PlayerError::ResampleFailed(format!("output adapter: {e}")))?;

    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len,
    };

    let (_consumed, produced) = rs
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
        .map_err(|e| PlayerError::ResampleFailed(e.to_string()))?;
    Ok(produced)
}

/// Append `src` remixed from `src_ch` to `dst_ch` interleaved channels.
///
/// Mapping rules: identical layouts pass through, mono duplicates into every
/// output channel, stereo→mono averages L/R, anything else clamps to the
/// nearest available source channel.
fn remix_into(dst: &mut Vec<f32>, src: &[f32], src_ch: usize, dst_ch: usize) {
    if src_ch == dst_ch {
        dst.extend_from_slice(src);
        return;
    }

    match (src_ch, dst_ch) {
        (1, _) => {
            for s in src {
                for _ in 0..dst_ch {
                    dst.push(*s);
                }
            }
        }
        (2, 1) => {
            for frame in src.chunks_exact(2) {
                dst.push(0.5 * (frame[0] + frame[1]));
            }
        }
        _ => {
            for frame in src.chunks_exact(src_ch) {
                for c in 0..dst_ch {
                    dst.push(frame[c.min(src_ch - 1)]);
                }
            }
        }
    }
}
