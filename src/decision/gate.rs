use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;

/// Serializes completion calls and tracks forced decisions waiting for a turn.
///
/// At most one [`RespondingGuard`] exists at a time; the `responding` flag is
/// true exactly while one is alive. Waiters park on a watch channel instead of
/// polling.
#[derive(Debug)]
pub struct ResponseGate {
    responding: watch::Sender<bool>,
    forced_pending: AtomicUsize,
}

impl Default for ResponseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseGate {
    pub fn new() -> Self {
        let (responding, _) = watch::channel(false);
        Self {
            responding,
            forced_pending: AtomicUsize::new(0),
        }
    }

    pub fn is_responding(&self) -> bool {
        *self.responding.borrow()
    }

    /// Claims the gate if it is free right now.
    pub fn try_acquire(&self) -> Option<RespondingGuard<'_>> {
        let claimed = self.responding.send_if_modified(|responding| {
            if *responding {
                false
            } else {
                *responding = true;
                true
            }
        });
        claimed.then(|| RespondingGuard { gate: self })
    }

    /// Waits until the gate is free, then claims it.
    pub async fn acquire(&self) -> RespondingGuard<'_> {
        let mut observer = self.responding.subscribe();
        loop {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            // The sender lives in `self`, so the channel cannot close here.
            let _ = observer.wait_for(|responding| !*responding).await;
        }
    }

    /// Marks a forced decision as pending until the claim is dropped.
    pub fn claim_priority(&self) -> PriorityClaim<'_> {
        self.forced_pending.fetch_add(1, Ordering::SeqCst);
        PriorityClaim { gate: self }
    }

    pub fn has_priority_claim(&self) -> bool {
        self.forced_pending.load(Ordering::SeqCst) > 0
    }

    fn release(&self) {
        self.responding.send_replace(false);
    }
}

/// Releases the gate on drop.
#[derive(Debug)]
pub struct RespondingGuard<'a> {
    gate: &'a ResponseGate,
}

impl Drop for RespondingGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[derive(Debug)]
pub struct PriorityClaim<'a> {
    gate: &'a ResponseGate,
}

impl Drop for PriorityClaim<'_> {
    fn drop(&mut self) {
        self.gate.forced_pending.fetch_sub(1, Ordering::SeqCst);
    }
}
