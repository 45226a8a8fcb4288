//! Background memory supervisor (spec.md §5): polls RAM/swap every second and flips two
//! atomics the driver reads between phases. No locking: the supervisor only ever sets these
//! flags, the driver only ever reads them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use sysinfo::System;

const MIN_FREE_RAM_PERCENT: f64 = 2.0;
const SWAP_THRESHOLD_BYTES: u64 = 1024 * 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to the background supervisor thread and the flags it maintains.
pub struct MemorySupervisor {
    pub cancelled: Arc<AtomicBool>,
    pub cancelled_ram: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MemorySupervisor {
    /// Spawn the polling thread. `swap_baseline_bytes` is the swap usage observed at
    /// startup; the supervisor cancels once swap grows past baseline by
    /// `SWAP_THRESHOLD_BYTES` (the "additive 1GiB swap threshold" from spec.md §5).
    pub fn spawn() -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_ram = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_cancelled = cancelled.clone();
        let thread_cancelled_ram = cancelled_ram.clone();
        let thread_stop = stop.clone();

        let handle = std::thread::spawn(move || {
            let mut system = System::new_all();
            system.refresh_memory();
            let swap_baseline = system.used_swap();

            while !thread_stop.load(Ordering::Relaxed) {
                system.refresh_memory();

                let total = system.total_memory();
                let available = system.available_memory();
                let free_percent = if total == 0 {
                    100.0
                } else {
                    (available as f64 / total as f64) * 100.0
                };

                let swap_growth = system.used_swap().saturating_sub(swap_baseline);

                if free_percent < MIN_FREE_RAM_PERCENT {
                    thread_cancelled_ram.store(true, Ordering::Relaxed);
                    thread_cancelled.store(true, Ordering::Relaxed);
                    log::warn!("memory supervisor: free RAM {free_percent:.1}% below threshold, cancelling");
                } else if swap_growth > SWAP_THRESHOLD_BYTES {
                    thread_cancelled_ram.store(true, Ordering::Relaxed);
                    thread_cancelled.store(true, Ordering::Relaxed);
                    log::warn!("memory supervisor: swap grew by {swap_growth} bytes, cancelling");
                }

                std::thread::sleep(POLL_INTERVAL);
            }
        });

        Self {
            cancelled,
            cancelled_ram,
            stop,
            handle: Some(handle),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn is_cancelled_ram(&self) -> bool {
        self.cancelled_ram.load(Ordering::Relaxed)
    }
}

impl Drop for MemorySupervisor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_supervisor_starts_uncancelled() {
        let supervisor = MemorySupervisor::spawn();
        assert!(!supervisor.is_cancelled());
        assert!(!supervisor.is_cancelled_ram());
    }
}
