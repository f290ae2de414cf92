//! Background work that must run after a response has been written.
//!
//! A handler or middleware that wants something done once the client has its
//! bytes (cache cleanup, for instance) pushes a future onto the response's
//! [`AfterResponse`] list. The server drains the list after the write and
//! flush complete.
//!
//! Tasks run at most once: [`AfterResponse::run`] consumes the list. If the
//! process stops before the list is drained the tasks are lost, which callers
//! must tolerate.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// A boxed unit of post-response work.
pub type DeferredTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// An ordered list of tasks to run after the response is sent.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use restash::background::AfterResponse;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let counter = Arc::new(AtomicUsize::new(0));
/// let mut after = AfterResponse::new();
/// let c = Arc::clone(&counter);
/// after.push(async move {
///     c.fetch_add(1, Ordering::SeqCst);
/// });
///
/// assert_eq!(after.len(), 1);
/// after.run().await;
/// assert_eq!(counter.load(Ordering::SeqCst), 1);
/// # }
/// ```
#[derive(Default)]
pub struct AfterResponse {
    tasks: Vec<DeferredTask>,
}

impl AfterResponse {
    /// Creates an empty task list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `task` to run after the response is sent.
    pub fn push<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(Box::pin(task));
    }

    /// Moves every task of `other` to the end of this list.
    pub fn append(&mut self, mut other: AfterResponse) {
        self.tasks.append(&mut other.tasks);
    }

    /// Returns the number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Runs every queued task in order, consuming the list.
    pub async fn run(mut self) {
        for task in std::mem::take(&mut self.tasks) {
            task.await;
        }
    }
}

impl fmt::Debug for AfterResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AfterResponse")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl Drop for AfterResponse {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            tracing::debug!(
                tasks = self.tasks.len(),
                "post-response tasks dropped without running"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[tokio::test]
    async fn runs_tasks_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut after = AfterResponse::new();
        for i in 0..3 {
            let log = Arc::clone(&log);
            after.push(async move { log.lock().unwrap().push(i) });
        }
        after.run().await;
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn append_keeps_both_lists() {
        let mut first = AfterResponse::new();
        first.push(async {});
        let mut second = AfterResponse::new();
        second.push(async {});
        second.push(async {});
        first.append(second);
        assert_eq!(first.len(), 3);
        first.run().await;
    }

    #[test]
    fn empty_by_default() {
        assert!(AfterResponse::default().is_empty());
    }
}
