// SPDX-License-Identifier: GPL-3.0-only

pub mod system;

use std::time::Duration;

use storage_contracts::StorageError;

use crate::error::from_sys;

/// Run a blocking system call on the blocking pool, bounded by `limit`.
pub(crate) async fn run_blocking<T, F>(
    limit: Duration,
    operation: &str,
    call: F,
) -> Result<T, StorageError>
where
    F: FnOnce() -> storage_sys::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(call)).await {
        Ok(Ok(result)) => result.map_err(from_sys),
        Ok(Err(join_error)) => Err(StorageError::internal(format!(
            "{operation} task failed: {join_error}"
        ))),
        Err(_) => Err(timed_out(operation, limit)),
    }
}

/// Await an external tool bounded by `limit`. On timeout the future is
/// dropped, which kills the child process.
pub(crate) async fn bounded<T, F>(
    limit: Duration,
    operation: &str,
    call: F,
) -> Result<T, StorageError>
where
    F: Future<Output = storage_sys::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(from_sys),
        Err(_) => Err(timed_out(operation, limit)),
    }
}

fn timed_out(operation: &str, limit: Duration) -> StorageError {
    StorageError::timeout(format!(
        "{operation} did not finish within {}s",
        limit.as_secs_f32()
    ))
}
