//! `picapture` - periodic still-image capture for single-board camera devices
//!
//! On a fixed interval the daemon runs an external capture program, records
//! the newest image in Redis, announces it on a pub/sub channel, and trims the
//! output directory to the most recent captures.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod capture;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod paths;
pub mod publish;
pub mod retention;

pub use capture::{CaptureProvider, CaptureRecord, CaptureTarget, CommandCapture, CommandTemplate};
pub use config::Config;
pub use daemon::{CycleOutcome, Daemon, Pacer, SleepPacer};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use paths::PathMapper;
pub use publish::{RedisPublisher, StatePublisher};
pub use retention::Retention;
