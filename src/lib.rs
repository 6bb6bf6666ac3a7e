//! Companion device core.
//!
//! Animated face, audio pipelines and a WebSocket link to a companion
//! server, with hardware behind traits so the same core runs on a desktop
//! host (cpal audio, in-memory display) or a board with real drivers.

pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod face;
pub mod logging;
pub mod motion;
pub mod net;
pub mod power;

pub use error::ErrorKind;
