//! Mutual exclusion between sweeps.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Default interval between attempts in [`RunGate::acquire_blocking`].
pub const DEFAULT_GATE_POLL: Duration = Duration::from_secs(1);

/// Ensures at most one sweep runs at a time.
///
/// Manual and scheduled sweeps share one gate. Clones refer to the same flag.
#[derive(Debug, Clone, Default)]
pub struct RunGate {
    running: Arc<AtomicBool>,
}

impl RunGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a sweep currently holds the gate.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Take the gate if it is free. Returns `None` while a sweep is running.
    pub fn try_acquire(&self) -> Option<RunPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                running: Arc::clone(&self.running),
            })
    }

    /// Wait until the gate is free, checking every `poll`, then take it.
    ///
    /// The wait sleeps on the runtime timer rather than parking the thread.
    pub async fn acquire_blocking(&self, poll: Duration) -> RunPermit {
        let mut waited = false;
        loop {
            if let Some(permit) = self.try_acquire() {
                if waited {
                    tracing::debug!("Run gate released, proceeding");
                }
                return permit;
            }
            if !waited {
                tracing::info!("A sweep is already running, waiting for it to finish");
                waited = true;
            }
            tokio::time::sleep(poll).await;
        }
    }
}

/// Proof of holding the [`RunGate`]. The gate is released when the permit is
/// released or dropped, whichever comes first.
#[must_use = "the gate is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct RunPermit {
    running: Arc<AtomicBool>,
}

impl RunPermit {
    /// Release the gate.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
