//! Shared error taxonomy.
//!
//! Every subsystem has its own `thiserror` enum; each maps onto one of these
//! kinds so the control loop can decide whether to drop, reject, degrade or
//! carry on without the subsystem.

use std::fmt;

/// How a failure should be handled by whoever observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Ring buffer full, transport send failure, short codec read, lock
    /// timeout. Drop, count, maybe log, continue.
    TransientIo,
    /// Bad JSON, bad color, out-of-range index. Reject the command.
    InvalidArgument,
    /// Operation before init or after deinit.
    State,
    /// Allocation failure while bringing a subsystem up.
    ResourceExhausted,
    /// Subsystem cannot run at all (e.g. no audio device at boot).
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientIo => write!(f, "transient_io"),
            Self::InvalidArgument => write!(f, "invalid_argument"),
            Self::State => write!(f, "state"),
            Self::ResourceExhausted => write!(f, "resource_exhausted"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}
