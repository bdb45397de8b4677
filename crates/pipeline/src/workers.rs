//! Worker pool sizing.

/// Workers for a pass: `floor(cpus × thread_factor × store_factor)`, at least one.
///
/// `store_factor` is 2 for external object stores, whose throughput is bound
/// by network latency rather than CPU, and 1 for local disks.
pub fn worker_count_for(cpus: usize, thread_factor: f64, external_store: bool) -> usize {
    let store_factor = if external_store { 2.0 } else { 1.0 };
    let workers = (cpus as f64 * thread_factor * store_factor).floor();
    if workers.is_finite() && workers >= 1.0 {
        workers as usize
    } else {
        1
    }
}

/// [`worker_count_for`] using the logical CPUs of this machine.
pub fn worker_count(thread_factor: f64, external_store: bool) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    worker_count_for(cpus, thread_factor, external_store)
}
