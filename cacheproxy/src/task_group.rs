//! A `sync.WaitGroup`-style counter used to let [`crate::Cache::close`] block until every
//! in-flight download has been reaped.

use std::sync::Mutex;

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct TaskGroup {
    count: Mutex<usize>,
    notify: Notify,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self) {
        *self.count.lock().unwrap() += 1;
    }

    /// Mark one tracked task as finished. Wakes any waiter if the count reaches zero.
    pub fn done(&self) {
        let mut count = self.count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.notify.notify_waiters();
        }
    }

    /// Block until the count reaches zero.
    pub async fn wait(&self) {
        loop {
            // Register interest before checking the count, so a `done()` landing between
            // the check and the await can't be missed.
            let notified = self.notify.notified();
            if *self.count.lock().unwrap() == 0 {
                return;
            }
            notified.await;
        }
    }
}
