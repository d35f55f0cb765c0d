//! Error taxonomy for the playback core.
//!
//! Prepare-time kinds are returned synchronously and move the player to
//! `Error`; decode-time kinds are surfaced through the [`crate::events`]
//! channel from the producer thread. `IllegalState` is always synchronous and
//! leaves the state machine untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::player::PlayerState;

/// Errors produced by the playback core.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// A collaborator failed to allocate a context or working buffer.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// The data source could not be opened (bad path, permissions, I/O).
    #[error("failed to open source: {0}")]
    OpenFailed(String),

    /// The container was opened but no stream information could be probed.
    #[error("stream info unavailable: {0}")]
    StreamInfoUnavailable(String),

    /// The container holds no decodable audio stream.
    #[error("no suitable audio stream")]
    NoSuitableStream,

    /// A decoder could not be constructed for the selected stream.
    #[error("codec open failed: {0}")]
    CodecOpenFailed(String),

    /// The resampler rejected the source/output format combination.
    #[error("resampler init failed: {0}")]
    ResamplerInitFailed(String),

    /// Reading or submitting the next packet to the decoder failed mid-stream.
    #[error("decode submit failed: {0}")]
    DecodeSubmitFailed(String),

    /// The decoder failed to produce a frame from a submitted packet.
    #[error("decode receive failed: {0}")]
    DecodeReceiveFailed(String),

    /// A runtime sample-rate/layout conversion failed.
    #[error("resample failed: {0}")]
    ResampleFailed(String),

    /// The engine rejected a seek request; playback resumes at the old position.
    #[error("seek failed: {0}")]
    SeekFailed(String),

    /// The output sink could not be opened or has terminated.
    #[error("sink open failed: {0}")]
    SinkOpenFailed(String),

    /// A transport call arrived in a state the transition table does not allow.
    #[error("{op} is not allowed in {state:?}")]
    IllegalState {
        op: &'static str,
        state: PlayerState,
    },
}

/// Serializable discriminant of [`PlayerError`], carried by error events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AllocationFailed,
    OpenFailed,
    StreamInfoUnavailable,
    NoSuitableStream,
    CodecOpenFailed,
    ResamplerInitFailed,
    DecodeSubmitFailed,
    DecodeReceiveFailed,
    ResampleFailed,
    SeekFailed,
    SinkOpenFailed,
    IllegalState,
}

impl PlayerError {
    /// The event-channel discriminant for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlayerError::AllocationFailed(_) => ErrorKind::AllocationFailed,
            PlayerError::OpenFailed(_) => ErrorKind::OpenFailed,
            PlayerError::StreamInfoUnavailable(_) => ErrorKind::StreamInfoUnavailable,
            PlayerError::NoSuitableStream => ErrorKind::NoSuitableStream,
            PlayerError::CodecOpenFailed(_) => ErrorKind::CodecOpenFailed,
            PlayerError::ResamplerInitFailed(_) => ErrorKind::ResamplerInitFailed,
            PlayerError::DecodeSubmitFailed(_) => ErrorKind::DecodeSubmitFailed,
            PlayerError::DecodeReceiveFailed(_) => ErrorKind::DecodeReceiveFailed,
            PlayerError::ResampleFailed(_) => ErrorKind::ResampleFailed,
            PlayerError::SeekFailed(_) => ErrorKind::SeekFailed,
            PlayerError::SinkOpenFailed(_) => ErrorKind::SinkOpenFailed,
            PlayerError::IllegalState { .. } => ErrorKind::IllegalState,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PlayerError>;
