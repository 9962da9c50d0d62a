//! Parallel probe supervisor
//!
//! Fans a port list out over workers: each worker receives a contiguous
//! chunk of at most `per_worker_chunk` ports and probes them
//! sequentially, writing every result to the store as it completes. At
//! most `fan_out_max` workers run concurrently; the supervisor blocks
//! for a free slot before dispatching the next chunk and drains the rest
//! once all chunks are handed out.
//!
//! Workers share no mutable state with each other or the supervisor -
//! results cross the boundary only through the store. A worker's
//! non-zero status is OR-ed into the aggregate and logged, but never
//! aborts the remaining chunks.

use ipscan_core::PortEntry;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Status bit reported for supervisor-internal failures (a worker panic
/// or a broken semaphore)
pub const SUPERVISOR_INTERNAL: i32 = 0x4000;

/// Run `worker` over `entries` in bounded parallel chunks
///
/// Returns the OR of all worker status codes; zero means every chunk
/// completed cleanly. An empty port list returns zero without spawning
/// anything.
pub async fn run_parallel<F, Fut>(
    entries: Vec<PortEntry>,
    fan_out_max: usize,
    per_worker_chunk: usize,
    worker: F,
) -> i32
where
    F: Fn(Vec<PortEntry>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = i32> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(fan_out_max));
    let mut handles = Vec::new();
    let mut rc = 0;

    for chunk in entries.chunks(per_worker_chunk) {
        // Blocks while the fan-out cap is reached
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!("supervisor semaphore closed: {}", e);
                rc |= SUPERVISOR_INTERNAL;
                break;
            }
        };

        let chunk = chunk.to_vec();
        let worker = worker.clone();
        debug!("dispatching worker for {} ports", chunk.len());
        handles.push(tokio::spawn(async move {
            let status = worker(chunk).await;
            drop(permit);
            status
        }));
    }

    // Drain the remaining workers
    for handle in handles {
        match handle.await {
            Ok(0) => {}
            Ok(status) => {
                warn!("probe worker retired with status {:#x}", status);
                rc |= status;
            }
            Err(e) => {
                warn!("probe worker panicked: {}", e);
                rc |= SUPERVISOR_INTERNAL;
            }
        }
    }

    rc
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn ports(n: u16) -> Vec<PortEntry> {
        (1..=n)
            .map(|p| PortEntry {
                port: p,
                special: 0,
                desc: String::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_ports_dispatched_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let rc = run_parallel(ports(10), 3, 4, move |chunk| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().extend(chunk.iter().map(|e| e.port));
                0
            }
        })
        .await;

        assert_eq!(rc, 0);
        let mut collected = seen.lock().unwrap().clone();
        collected.sort_unstable();
        assert_eq!(collected, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_chunk_sizes_respect_cap() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sizes_clone = Arc::clone(&sizes);

        run_parallel(ports(10), 2, 4, move |chunk| {
            let sizes = Arc::clone(&sizes_clone);
            async move {
                sizes.lock().unwrap().push(chunk.len());
                0
            }
        })
        .await;

        let mut collected = sizes.lock().unwrap().clone();
        collected.sort_unstable();
        assert_eq!(collected, vec![2, 4, 4]);
    }

    #[tokio::test]
    async fn test_fan_out_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let running_clone = Arc::clone(&running);
        let peak_clone = Arc::clone(&peak);

        run_parallel(ports(12), 3, 1, move |_chunk| {
            let running = Arc::clone(&running_clone);
            let peak = Arc::clone(&peak_clone);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                0
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_worker_status_ored_and_scan_continues() {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = Arc::clone(&count);

        let rc = run_parallel(ports(6), 2, 2, move |chunk| {
            let count = Arc::clone(&count_clone);
            async move {
                count.fetch_add(chunk.len() as i32, Ordering::SeqCst);
                if chunk[0].port == 1 {
                    2
                } else {
                    0
                }
            }
        })
        .await;

        assert_eq!(rc, 2);
        // Every port was still attempted despite the failing worker
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_panicking_worker_reported() {
        let rc = run_parallel(ports(2), 2, 1, move |chunk| async move {
            if chunk[0].port == 1 {
                panic!("boom");
            }
            0
        })
        .await;

        assert_eq!(rc, SUPERVISOR_INTERNAL);
    }

    #[tokio::test]
    async fn test_empty_list() {
        let rc = run_parallel(Vec::new(), 4, 4, move |_chunk| async move { 0 }).await;
        assert_eq!(rc, 0);
    }
}
