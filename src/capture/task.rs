//! Unhandled rejection capture for tokio tasks.
//!
//! An observed task reports `unhandled_rejection` when it resolves to `Err`
//! or panics. The outcome is still delivered through the returned handle
//! unchanged: an `Err` comes back as the same `Err`, a panic resumes as a
//! panic in the outer task.
//!
//! Panics are left to the panic hook when that is installed, so each panic
//! is reported once.

use std::fmt::Display;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::task::JoinHandle;

use super::capturer::Capturer;
use super::panic::{hook_active, payload_message};
use crate::record::{ErrorKind, ErrorRecord, Severity};

/// Wrap an already spawned task.
pub(crate) fn observe_task<T, E>(
    capturer: Option<Arc<Capturer>>,
    inner: JoinHandle<Result<T, E>>,
) -> JoinHandle<Result<T, E>>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        match inner.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if let Some(capturer) = &capturer {
                    capturer.capture_with(|| {
                        ErrorRecord::new(
                            ErrorKind::UnhandledRejection,
                            Severity::Critical,
                            format!("Unhandled rejection: {}", describe(&e)),
                        )
                    });
                }
                Err(e)
            }
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                if let Some(capturer) = &capturer
                    && !hook_active()
                {
                    capturer.capture_with(|| {
                        ErrorRecord::new(
                            ErrorKind::UnhandledRejection,
                            Severity::Critical,
                            format!(
                                "Unhandled rejection: task panicked: {}",
                                payload_message(payload.as_ref())
                            ),
                        )
                    });
                }
                panic::resume_unwind(payload)
            }
            // Cancelled inner task surfaces as a panic of the outer one.
            Err(join_error) => panic::resume_unwind(Box::new(join_error.to_string())),
        }
    })
}

/// Spawn and observe a task.
pub(crate) fn spawn_observed<F, T, E>(
    capturer: Option<Arc<Capturer>>,
    future: F,
) -> JoinHandle<Result<T, E>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    observe_task(capturer, tokio::spawn(future))
}

/// `Display` of a host error, tolerating a panicking implementation.
fn describe<E: Display>(e: &E) -> String {
    panic::catch_unwind(AssertUnwindSafe(|| e.to_string()))
        .unwrap_or_else(|_| "<unprintable error>".to_string())
}
