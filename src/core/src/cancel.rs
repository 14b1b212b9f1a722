//! Cancellation plumbing for blocking calls.

use std::future::Future;
use std::ops::Deref;
use std::time::Duration;

use tokio_util::sync::DropGuard;
pub use tokio_util::sync::CancellationToken;

use crate::error::{CanopyError, Result};

/// Run `operation` until it completes or `cancel` fires.
///
/// On cancellation the operation future is dropped, which aborts any
/// in-flight I/O it owns.
pub async fn cancellable<T, F>(cancel: &CancellationToken, what: &str, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(CanopyError::Cancelled(what.to_string()));
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CanopyError::Cancelled(what.to_string())),
        result = operation => result,
    }
}

/// A child token bound to a timeout.
///
/// Dropping the deadline cancels its token, which also ends the timer task.
pub struct Deadline {
    token: CancellationToken,
    _guard: DropGuard,
}

impl Deadline {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Deref for Deadline {
    type Target = CancellationToken;

    fn deref(&self) -> &CancellationToken {
        &self.token
    }
}

/// Child token that is cancelled with `parent` or after `timeout`.
pub fn with_deadline(parent: &CancellationToken, timeout: Duration) -> Deadline {
    let child = parent.child_token();
    let timer = child.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Deadline exceeded");
                timer.cancel();
            }
        }
    });
    Deadline {
        _guard: child.clone().drop_guard(),
        token: child,
    }
}
