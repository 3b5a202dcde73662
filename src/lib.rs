//! Decode, enhance, re-synchronize and re-encode media files.
//!
//! The crate is organised bottom-up: [`media`] holds the data model,
//! [`backend`] the native framework seam, [`decoder`] / [`encoder`] /
//! [`muxer`] the stream components and [`pipeline`] the orchestration.

pub mod backend;
pub mod config;
pub mod convert;
pub mod decoder;
pub mod encoder;
pub mod enhance;
pub mod error;
pub mod logging;
pub mod media;
pub mod muxer;
pub mod pipeline;
pub mod source;
pub mod utils;
mod xmacro;

pub use error::{Error, Result};
