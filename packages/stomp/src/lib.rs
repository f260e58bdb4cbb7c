//! STOMP 1.2 frames for the Duet realtime session.
//!
//! This crate is transport agnostic: it turns [`Frame`]s into text ready to be
//! written to a WebSocket, and turns received chunks back into frames with a
//! [`FrameDecoder`].
//!
//! # Example
//!
//! ```rust
//! use duet_stomp::{Decoded, Frame, FrameDecoder};
//!
//! let frame = Frame::subscribe("sub-0", "/topic/system-status");
//! let mut decoder = FrameDecoder::default();
//! decoder.push(frame.encode().as_bytes());
//!
//! match decoder.next_item().unwrap() {
//!     Some(Decoded::Frame(decoded)) => assert_eq!(decoded, frame),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error;

mod decoder;
mod frame;
mod heart_beat;

pub use decoder::{DEFAULT_MAX_FRAME_SIZE, Decoded, FrameDecoder};
pub use frame::{Command, Frame, headers};
pub use heart_beat::{HeartBeat, NegotiatedHeartBeat};

/// Errors produced while decoding STOMP frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StompError {
    /// The command line did not name a STOMP command.
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),
    /// A header line had no `:` separator.
    #[error("Malformed header line '{0}'")]
    MalformedHeader(String),
    /// A header used an escape sequence STOMP 1.2 does not define.
    #[error("Invalid escape sequence in '{0}'")]
    InvalidEscape(String),
    /// The frame head or body was not valid UTF-8.
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,
    /// The `content-length` header was not a number.
    #[error("Invalid content-length '{0}'")]
    InvalidContentLength(String),
    /// The byte after a `content-length` sized body was not NUL.
    #[error("Frame body is not terminated by NUL")]
    MissingNul,
    /// A frame exceeded the decoder's size limit.
    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
    /// The `heart-beat` header was not `<ms>,<ms>`.
    #[error("Invalid heart-beat '{0}'")]
    InvalidHeartBeat(String),
}
