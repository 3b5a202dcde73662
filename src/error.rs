//! Error types shared by every pipeline component.

use crate::media::MediaKind;
use thiserror::Error;

/// Main error type of the transcode pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O or container parsing failure while opening an input or output.
    #[error("Cannot open {path}: {reason}")]
    Open { path: String, reason: String },

    /// The input has no stream of the requested media type.
    #[error("No {0} stream found")]
    NoSuchStream(MediaKind),

    /// No decoder is registered for the stream's codec.
    #[error("No decoder available for codec {0}")]
    CodecUnsupported(String),

    /// The named encoder (or output format) cannot be resolved.
    #[error("Codec not found: {0}")]
    CodecNotFound(String),

    /// The codec was resolved but refused to open with the given settings.
    #[error("Failed to open codec {codec}: {reason}")]
    CodecOpen { codec: String, reason: String },

    /// A single packet could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The encoder failed; its state must be considered corrupted.
    #[error("Encode error: {0}")]
    Encode(String),

    /// An operation was called out of sequence.
    #[error("{component}: cannot {operation} while {state}")]
    InvalidState {
        component: &'static str,
        operation: &'static str,
        state: String,
    },

    /// Container write failure.
    #[error("Write error: {0}")]
    Write(String),

    /// The container or stream does not support seeking.
    #[error("Seek failed: {0}")]
    Seek(String),

    /// `pop_next` was called with both synchronization queues empty.
    #[error("Both synchronization queues are empty")]
    EmptyQueues,

    /// A frame was accessed as the wrong media type.
    #[error("Expected a {expected} frame, found {found}")]
    WrongFrameKind {
        expected: MediaKind,
        found: MediaKind,
    },

    /// The frame enhancer failed or returned an unusable image.
    #[error("Enhancer {name} failed: {reason}")]
    Enhance { name: String, reason: String },

    /// A frame was pushed for a media type that has no configured encoder.
    #[error("No {0} encoder configured")]
    StreamDisabled(MediaKind),

    /// Configuration error.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn open(path: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Error::Open {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn codec_open(codec: &str, reason: impl std::fmt::Display) -> Self {
        Error::CodecOpen {
            codec: codec.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_state(
        component: &'static str,
        operation: &'static str,
        state: impl std::fmt::Display,
    ) -> Self {
        Error::InvalidState {
            component,
            operation,
            state: state.to_string(),
        }
    }

    /// Whether the session can go on after this error.
    ///
    /// Missing streams disable a single stream and corrupt packets are skipped;
    /// everything else aborts the transcode.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NoSuchStream(_) | Error::Decode(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
