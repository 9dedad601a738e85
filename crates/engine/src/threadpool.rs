//! Process-wide worker pool shared across sessions (spec §5).
//!
//! Each kernel invocation owns its workers for its duration and
//! synchronizes via an internal barrier before returning, so execution
//! looks sequential from the graph's perspective.

use std::sync::OnceLock;

static POOL: OnceLock<rayon::ThreadPool> = OnceLock::new();

/// Returns the process-wide pool, building it on first use sized to the
/// available parallelism.
pub fn pool() -> &'static rayon::ThreadPool {
    POOL.get_or_init(|| {
        rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("cortex-kernel-{i}"))
            .build()
            .expect("failed to build kernel thread pool")
    })
}
