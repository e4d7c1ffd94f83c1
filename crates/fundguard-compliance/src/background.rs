//! Work handed off the caller's path.
//!
//! Jobs run as blocking tasks on a tokio runtime when one is available and on
//! a detached worker thread otherwise. A panicking job is caught and logged
//! at error level. It never unwinds into the operation that scheduled it.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Where scheduled jobs run.
#[derive(Debug, Clone, Default)]
pub enum Executor {
    /// Blocking tasks on this runtime.
    Runtime(Handle),
    /// One detached thread per job.
    #[default]
    Thread,
    /// On the calling thread. Deterministic, for tests and one-shot tools.
    Inline,
}

impl Executor {
    /// The current tokio runtime, or worker threads outside one.
    pub fn current() -> Self {
        Handle::try_current().map_or(Executor::Thread, Executor::Runtime)
    }

    pub fn spawn(&self, name: &'static str, job: impl FnOnce() + Send + 'static) -> Background {
        match self {
            Executor::Runtime(handle) => Background::Task {
                runtime: handle.clone(),
                task: handle.spawn_blocking(move || guarded(name, job)),
            },
            Executor::Thread => spawn_thread(name, job),
            Executor::Inline => Background::Done(guarded(name, job)),
        }
    }
}

fn spawn_thread(name: &'static str, job: impl FnOnce() + Send + 'static) -> Background {
    // Shared slot so the job survives a failed spawn.
    let slot = Arc::new(Mutex::new(Some(job)));
    let worker_slot = Arc::clone(&slot);
    let spawned = thread::Builder::new()
        .name(format!("fundguard-{name}"))
        .spawn(move || {
            let job = worker_slot.lock().take();
            job.is_none_or(|job| guarded(name, job))
        });

    match spawned {
        Ok(thread) => Background::Thread(thread),
        Err(e) => {
            tracing::error!(job = name, error = %e, "failed to start worker thread, running inline");
            let job = slot.lock().take();
            Background::Done(job.is_some_and(|job| guarded(name, job)))
        }
    }
}

fn guarded(name: &'static str, job: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(job)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(job = name, panic = %panic_message(payload.as_ref()), "background job panicked");
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A scheduled job. Dropping it detaches the job.
#[derive(Debug)]
pub enum Background {
    Task {
        runtime: Handle,
        task: JoinHandle<bool>,
    },
    Thread(thread::JoinHandle<bool>),
    /// Ran inline. `false` if it panicked.
    Done(bool),
}

impl Background {
    /// Whether the job was handed to a tokio runtime.
    pub fn on_runtime(&self) -> bool {
        matches!(self, Background::Task { .. })
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Background::Task { task, .. } => task.is_finished(),
            Background::Thread(thread) => thread.is_finished(),
            Background::Done(_) => true,
        }
    }

    /// Park the calling thread until the job finishes.
    ///
    /// Returns `false` if the job panicked or its runtime shut down first.
    /// In async code prefer [`Background::finished`].
    pub fn join(self) -> bool {
        match self {
            Background::Task { runtime, task } => thread::scope(|s| {
                // block_on refuses to run on a runtime thread
                s.spawn(move || runtime.block_on(task).unwrap_or(false))
                    .join()
                    .unwrap_or(false)
            }),
            Background::Thread(thread) => thread.join().unwrap_or(false),
            Background::Done(completed) => completed,
        }
    }

    /// Wait for the job without blocking the executor. Must be polled from
    /// inside a tokio runtime.
    pub async fn finished(self) -> bool {
        match self {
            Background::Task { task, .. } => task.await.unwrap_or(false),
            Background::Thread(thread) => {
                tokio::task::spawn_blocking(move || thread.join().unwrap_or(false))
                    .await
                    .unwrap_or(false)
            }
            Background::Done(completed) => completed,
        }
    }
}
