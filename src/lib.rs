pub use gpc_core as core;
pub use gpc_hal as hal;
pub use gpc_io as io;
pub use gpc_point_cloud as point_cloud;
pub use gpc_registration as registration;

use rayon::ThreadPoolBuilder;
use std::sync::OnceLock;

static THREAD_POOL_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize a single global rayon pool for the host-side parallel
/// routines (record conversion, file parsing).
///
/// Call once at application startup; repeated calls are idempotent and
/// return the first initialization result. With `None` rayon picks its
/// default thread count.
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<(), String> {
    let res = THREAD_POOL_INIT.get_or_init(|| {
        let mut builder = ThreadPoolBuilder::new();
        if let Some(n) = num_threads {
            builder = builder.num_threads(n);
        }
        builder.build_global().map_err(|e| e.to_string())
    });
    res.clone()
}
