//! deck-player — a transport-controlled audio playback core.
//!
//! ## Pipeline
//! 1. **Decode**: a dedicated producer thread pulls packets from the decoder
//!    engine (Symphonia) and decodes them to interleaved `f32`.
//! 2. **Convert**: Rubato remaps/resamples each batch to the sink's fixed
//!    output format.
//! 3. **Buffer**: converted frames land in a lock-free SPSC ring buffer,
//!    with the producer parked whenever playback is paused or the ring is
//!    full.
//! 4. **Output**: the sink's real-time callback (CPAL) drains the ring
//!    without blocking and zero-fills underruns.
//!
//! [`player::Player`] wraps the pipeline in an Android-MediaPlayer-style
//! state machine: `set_data_source`, `prepare`, `start`, `pause`, `stop`,
//! `seek_to`, `reset`, `release`, with notifications delivered over a
//! channel.

pub mod clock;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod player;
pub mod resample;
pub mod ring;
pub mod sink;
pub mod source;

mod decode;
mod gate;
