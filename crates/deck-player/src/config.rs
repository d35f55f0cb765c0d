use serde::{Deserialize, Serialize};

/// Fixed interleaved `f32` format the pipeline delivers to the output sink.
///
/// The decode stage converts every source to this spec; the sink may still
/// remap channels to the physical device layout inside its callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count (interleaved frame stride).
    pub channels: usize,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

/// Tuning parameters shared by the decode, resample, and sink stages.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Format requested from the output sink.
    pub output: OutputSpec,

    /// Capacity of the decoded-audio ring buffer, in frames.
    ///
    /// Rounded up to a power of two at construction. Larger values buy
    /// underrun resistance at the cost of pause/seek latency.
    pub ring_capacity_frames: usize,

    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
}

impl Default for PlayerConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            output: OutputSpec::default(),
            ring_capacity_frames: 16_384,
            chunk_frames: 1024,
        }
    }
}
