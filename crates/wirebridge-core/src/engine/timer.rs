//! Delay timer callback for secure-channel engines.
//!
//! Datagram-oriented engines (DTLS) retransmit handshake flights on a timer.
//! They arm the timer with two deadlines and poll it from their state machine:
//!
//! - an **intermediate** delay, after which the engine may retransmit early;
//! - a **final** delay, after which the current flight has timed out.
//!
//! A final delay of zero disarms the timer.

use std::time::{Duration, Instant};

/// Result of polling an [`EngineTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayStatus {
    /// No final delay is armed.
    Cancelled,
    /// Neither delay has expired.
    Pending,
    /// The intermediate delay has expired, the final one has not.
    IntermediateExpired,
    /// The final delay has expired.
    FinalExpired,
}

/// The set/get delay callback pair a secure-channel engine drives.
pub trait EngineTimer {
    /// Arms the timer.  A zero `final_delay` cancels it.
    fn set_delay(&mut self, intermediate: Duration, final_delay: Duration);

    /// Reports which of the armed delays have expired.
    fn delay_status(&self) -> DelayStatus;
}

/// [`EngineTimer`] backed by the monotonic clock.
#[derive(Debug, Default, Clone)]
pub struct DelayTimer {
    armed_at: Option<Instant>,
    intermediate: Duration,
    final_delay: Duration,
}

impl DelayTimer {
    /// Creates a cancelled timer.
    pub fn new() -> Self {
        Self::default()
    }

    fn elapsed(&self) -> Option<Duration> {
        self.armed_at.map(|t| t.elapsed())
    }
}

impl EngineTimer for DelayTimer {
    fn set_delay(&mut self, intermediate: Duration, final_delay: Duration) {
        self.intermediate = intermediate;
        self.final_delay = final_delay;
        self.armed_at = if final_delay.is_zero() {
            None
        } else {
            Some(Instant::now())
        };
    }

    fn delay_status(&self) -> DelayStatus {
        let Some(elapsed) = self.elapsed() else {
            return DelayStatus::Cancelled;
        };

        if elapsed >= self.final_delay {
            DelayStatus::FinalExpired
        } else if !self.intermediate.is_zero() && elapsed >= self.intermediate {
            DelayStatus::IntermediateExpired
        } else {
            DelayStatus::Pending
        }
    }
}
