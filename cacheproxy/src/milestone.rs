//! One-shot readiness latches with multiple waiters.

use tokio::sync::watch;

/// A latch that starts closed and can be released exactly once; every waiter, whether it
/// arrives before or after release, observes the release.
///
/// Built on [`watch::channel`] rather than a plain [`tokio::sync::Notify`] because a
/// `Notify` only wakes tasks that are *already* waiting when `notify_waiters` is called,
/// which is unsafe for a latch where waiters can arrive at arbitrary times relative to
/// release. A `watch` channel retains its last value, so `wait()` called after release
/// returns immediately.
#[derive(Debug)]
pub struct Milestone {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Milestone {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Release the latch. Idempotent: releasing an already-released milestone is a no-op.
    pub fn release(&self) {
        // `send_if_modified` avoids waking receivers on a redundant release.
        self.tx.send_if_modified(|released| {
            if *released {
                false
            } else {
                *released = true;
                true
            }
        });
    }

    /// Block until the latch is released. Returns immediately if already released.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // `wait_for` checks the current value before awaiting a change, so a release that
        // already happened is observed without blocking.
        let _ = rx.wait_for(|released| *released).await;
    }
}

impl Default for Milestone {
    fn default() -> Self {
        Self::new()
    }
}
