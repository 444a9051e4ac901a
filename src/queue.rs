//! Ordered queues of asynchronous work
//!
//! A [`JobQueue`] is an ordered list of one-shot async tasks. The pipeline
//! uses one queue in sequential mode to drive tile captures (the platform
//! supports a single in-flight capture per tab) and a second queue in
//! parallel mode for per-tile decode/composite work, which touches disjoint
//! buffer regions and carries no ordering requirement.

use futures::future::BoxFuture;

use crate::error::StitchResult;

type Job<T> = Box<dyn FnOnce(Option<T>) -> BoxFuture<'static, StitchResult<T>> + Send>;

/// Ordered list of async tasks, run sequentially or in parallel.
///
/// Each task receives the previous task's result when run sequentially,
/// and `None` when run in parallel.
///
/// # Examples
///
/// ```
/// use pagestitch::queue::JobQueue;
///
/// #[tokio::main]
/// async fn main() {
///     let mut queue = JobQueue::new();
///     queue.push(|_| async { Ok(1u32) });
///     queue.push(|prev| async move { Ok(prev.unwrap_or(0) + 1) });
///
///     let last = queue.run_sequential().await.unwrap();
///     assert_eq!(last, Some(2));
/// }
/// ```
pub struct JobQueue<T> {
    jobs: Vec<Job<T>>,
}

impl<T: Send + 'static> JobQueue<T> {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    /// Appends a task.
    ///
    /// The task receives the previous task's result in sequential mode
    /// (`None` for the first task and in parallel mode).
    pub fn push<F, Fut>(&mut self, job: F)
    where
        F: FnOnce(Option<T>) -> Fut + Send + 'static,
        Fut: Future<Output = StitchResult<T>> + Send + 'static,
    {
        self.jobs.push(Box::new(move |input| Box::pin(job(input))));
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Runs all tasks strictly one after another in insertion order.
    ///
    /// Each task's result is passed to the next. Resolves with the last
    /// task's result, or `None` for an empty queue.
    ///
    /// # Errors
    ///
    /// The first task failure is returned and the remaining tasks are not
    /// run.
    pub async fn run_sequential(self) -> StitchResult<Option<T>> {
        let mut last = None;
        for job in self.jobs {
            last = Some(job(last.take()).await?);
        }
        Ok(last)
    }

    /// Runs all tasks with no ordering guarantee and waits for all of them.
    ///
    /// # Errors
    ///
    /// Fails if any task fails.
    pub async fn run_parallel(self) -> StitchResult<Vec<T>> {
        futures::future::try_join_all(self.jobs.into_iter().map(|job| job(None))).await
    }
}

impl<T: Send + 'static> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
