//! Per-attempt deadlines composed with caller cancellation.
//!
//! A [`Deadline`] merges the caller's [`CancellationToken`] with a timeout into
//! one effective signal for a single attempt. When the attempt is interrupted,
//! [`Deadline::classify`] reports which source fired. The caller always wins:
//! if the caller token is cancelled the interrupt is [`Interrupt::UserCancelled`]
//! even when the timeout elapsed at the same moment.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Which source interrupted an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    UserCancelled,
    TimedOut,
}

/// Effective cancellation signal for one attempt.
///
/// The effective token is a child of the caller token, so cancelling the
/// caller cancels it too. It is cancelled on timeout and when the deadline is
/// dropped, so operations holding a clone never outlive the attempt.
#[derive(Debug)]
pub struct Deadline {
    caller: CancellationToken,
    effective: CancellationToken,
    timeout: Duration,
}

impl Deadline {
    pub fn new(caller: &CancellationToken, timeout: Duration) -> Self {
        Self {
            caller: caller.clone(),
            effective: caller.child_token(),
            timeout,
        }
    }

    /// The merged signal, for operations that want to observe it directly.
    /// An operation that cancels this token itself is not interrupted by it.
    pub fn token(&self) -> CancellationToken {
        self.effective.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Decide which source caused the effective signal to fire.
    pub fn classify(&self) -> Interrupt {
        if self.caller.is_cancelled() {
            Interrupt::UserCancelled
        } else {
            Interrupt::TimedOut
        }
    }

    /// Run `fut` until it completes, the caller cancels, or the timeout
    /// elapses. An already-cancelled caller never starts `fut`.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupt> {
        tokio::select! {
            biased;
            _ = self.caller.cancelled() => Err(Interrupt::UserCancelled),
            _ = tokio::time::sleep(self.timeout) => {
                self.effective.cancel();
                Err(self.classify())
            }
            out = fut => Ok(out),
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.effective.cancel();
    }
}
