//! Tools for limiting the number of concurrent CPU-bound external processes.

use std::sync::LazyLock;

use tokio::sync::Semaphore;

use crate::prelude::*;

/// Semaphore used to limit the number of concurrent `pdftocairo` processes.
static CPU_SEMAPHORE: LazyLock<Semaphore> =
    LazyLock::new(|| Semaphore::new(num_cpus::get()));

/// Call an async function while holding a permit from the CPU semaphore.
///
/// A batch directory full of PDFs would otherwise start one rasterizer per
/// file, each trying to use a whole core. In-process work doesn't need this,
/// because it already runs on the bounded batch queue.
#[instrument(level = "trace", skip_all)]
pub async fn with_cpu_semaphore<Func, Fut, R>(f: Func) -> Result<R>
where
    Func: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let permit = CPU_SEMAPHORE
        .acquire()
        .await
        .context("could not acquire CPU permit")?;
    let result = f().await;
    drop(permit);
    result
}
