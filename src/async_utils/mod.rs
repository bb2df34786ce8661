//! Asynchronous utilities for use with Tokio.
//!
//! Recognition is CPU-bound and runs on blocking threads, while file
//! discovery, PDF rasterization and output happen on the async runtime. The
//! glue between those two worlds lives here.

use std::pin::Pin;

use futures::Stream;
use tokio::task::JoinHandle;

use crate::prelude::*;

pub mod blocking_iter_streams;
pub mod io;

/// A type alias for a boxed future.
pub type BoxedFuture<Output> = Pin<Box<dyn Future<Output = Output> + Send>>;

/// A type alias for a boxed stream.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// A handle for one or more background workers. This can be awaited
/// to wait for all workers to complete normally.
pub struct JoinWorker {
    /// The task handle.
    future: BoxedFuture<Result<()>>,
}

impl JoinWorker {
    /// Create a new worker handle from a [`JoinHandle`].
    pub fn from_handle(handle: JoinHandle<Result<()>>) -> Self {
        Self {
            future: Box::pin(async move { handle.await.context("could not join task")? }),
        }
    }

    /// Wait for the worker to complete.
    pub async fn join(self) -> Result<()> {
        self.future.await
    }
}

/// Run a CPU-bound closure on Tokio's blocking thread pool.
///
/// A panic inside `f` comes back as an error, so one bad page can't take
/// down the rest of a batch.
pub async fn spawn_blocking_checked<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|err| {
        if err.is_panic() {
            anyhow!("background task panicked")
        } else {
            anyhow!("background task was cancelled")
        }
    })
}

/// Report any command failures, and include any error output.
///
/// Standard output is logged at debug level, and any standard error at warn
/// level. If `is_error_line` is given, a successful command which prints a
/// matching line on standard error is still treated as a failure.
pub fn check_for_command_failure(
    command_name: &str,
    output: &std::process::Output,
    is_error_line: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(command_name, output = %stdout, "standard output from command");
    if !stderr.trim().is_empty() {
        warn!(command_name, output = %stderr, "standard error from command");
    }

    if output.status.success() {
        if let Some(is_error_line) = is_error_line
            && stderr.lines().any(is_error_line)
        {
            bail!("{} printed error output:\n{}", command_name, stderr);
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        bail!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        )
    } else {
        bail!("{} failed with error output:\n{}", command_name, stderr)
    }
}
