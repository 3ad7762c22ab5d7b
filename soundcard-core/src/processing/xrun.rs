//! Local recovery from transient device errors.
//!
//! Driver I/O threads report each failed read, write or buffer call here.
//! Errors that mean the device is gone mark the pipe lost at once. Anything
//! else is an xrun: counted on the pipe and answered by re-priming the
//! stream, until too many happen back to back.

use super::stream_pipe::StreamPipe;

/// Consecutive failures tolerated before the stream is given up.
pub const DEFAULT_MAX_REPRIMES: u32 = 3;

/// What the I/O thread should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrunAction {
    /// Reset the native stream and carry on.
    Reprime,
    /// Stop the I/O loop. The pipe is already marked lost.
    Lost,
}

#[derive(Debug)]
pub struct XrunRecovery {
    pipe: StreamPipe,
    consecutive: u32,
    max_reprimes: u32,
}

impl XrunRecovery {
    pub fn new(pipe: StreamPipe) -> Self {
        Self::with_max_reprimes(pipe, DEFAULT_MAX_REPRIMES)
    }

    pub fn with_max_reprimes(pipe: StreamPipe, max_reprimes: u32) -> Self {
        Self {
            pipe,
            consecutive: 0,
            max_reprimes,
        }
    }

    /// Record a failed I/O call. `fatal` is the driver's verdict that the
    /// device itself went away.
    pub fn on_error(&mut self, fatal: bool) -> XrunAction {
        if fatal {
            self.pipe.mark_lost();
            return XrunAction::Lost;
        }
        self.pipe.note_xrun();
        self.consecutive += 1;
        if self.consecutive > self.max_reprimes {
            log::error!("{} consecutive xruns, giving the device up", self.consecutive);
            self.pipe.mark_lost();
            return XrunAction::Lost;
        }
        XrunAction::Reprime
    }

    /// Record a failed re-prime. Counts toward the same limit.
    pub fn on_reprime_failed(&mut self) -> XrunAction {
        self.on_error(false)
    }

    /// A successful I/O call ends the failure streak.
    pub fn on_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
