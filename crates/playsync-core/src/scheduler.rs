//! Deferred and background task scheduling.
//!
//! Every task spawned here carries a [`CancellationToken`] derived from one
//! root token, so [`Scheduler::shutdown`] cancels everything still pending.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Unique identifier for a scheduled task.
pub type TaskId = u64;

/// What a scheduled task is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCategory {
    /// Delayed retry of a failed playlist fetch.
    PlaylistRetry,
    /// Play command waiting for a launched backend to settle.
    PlaybackLaunch,
    /// List refresh after a play command.
    PostPlayRefresh,
    /// Bounded connection/device polling loop.
    Polling,
    /// Playlist population after an integration connects.
    PostConnectRefresh,
    /// Recurring player context watch.
    ContextWatch,
    /// Anything else.
    Background,
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlaylistRetry => write!(f, "playlist_retry"),
            Self::PlaybackLaunch => write!(f, "playback_launch"),
            Self::PostPlayRefresh => write!(f, "post_play_refresh"),
            Self::Polling => write!(f, "polling"),
            Self::PostConnectRefresh => write!(f, "post_connect_refresh"),
            Self::ContextWatch => write!(f, "context_watch"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// Handle to a scheduled task.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    id: TaskId,
    category: TaskCategory,
    token: CancellationToken,
}

impl ScheduledTask {
    /// Task id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Task category.
    #[must_use]
    pub const fn category(&self) -> TaskCategory {
        self.category
    }

    /// Cancel the task if it has not finished.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the task was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Decrements the pending counter when a task ends, cancelled or not.
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spawns cancellable tasks on the current tokio runtime.
///
/// Clones share the root token and counters.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    root: CancellationToken,
    task_counter: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

impl Scheduler {
    /// Create a scheduler with a fresh root token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_task_id(&self) -> TaskId {
        self.task_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Run `future` after `delay` unless cancelled first.
    ///
    /// Cancellation also aborts a future that has already started.
    pub fn schedule<F>(&self, category: TaskCategory, delay: Duration, future: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(category, move |_| async move {
            tokio::time::sleep(delay).await;
            future.await;
        })
    }

    /// Spawn a task that receives its own cancellation token.
    ///
    /// Long-running loops use this to observe cancellation between steps.
    pub fn spawn<F, Fut>(&self, category: TaskCategory, task: F) -> ScheduledTask
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_task_id();
        let token = self.root.child_token();
        let guard = PendingGuard::new(&self.pending);
        let future = task(token.clone());
        let task_token = token.clone();

        trace!("Scheduling task {} ({})", id, category);

        tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                () = task_token.cancelled() => {
                    debug!("Task {} ({}) cancelled", id, category);
                }
                () = future => {
                    trace!("Task {} ({}) finished", id, category);
                }
            }
        });

        ScheduledTask {
            id,
            category,
            token,
        }
    }

    /// A token cancelled together with every scheduled task.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Number of tasks spawned and not yet finished.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether [`Self::shutdown`] was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel every scheduled task. Tasks scheduled afterwards never run.
    pub fn shutdown(&self) {
        debug!("Scheduler shutting down with {} pending tasks", self.pending_tasks());
        self.root.cancel();
    }
}
