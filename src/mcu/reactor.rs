//! Single-threaded event loop with a blocking call bridge.
//!
//! Device state lives on one dedicated thread running a tokio current-thread
//! runtime inside a [`LocalSet`], so it can use `Rc`/`RefCell` freely. Other
//! threads interact with it only by submitting jobs through [`Reactor::call`],
//! which blocks the caller until the job's future completes.

use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::LocalSet;

use crate::error::{short, Error, McuError, Result};

type Job<S> = Box<dyn FnOnce(Rc<S>) + Send>;

/// One-shot result slot shared between a caller and the loop.
struct Completion<T> {
    slot: Mutex<Option<Result<T>>>,
    ready: Condvar,
}

impl<T> Completion<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, result: Result<T>) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(result);
            self.ready.notify_all();
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        return slot.take().unwrap_or(Err(McuError::CallTimeout.into()));
                    }
                }
                None => self.ready.wait(&mut slot),
            }
        }
    }
}

/// Completes the slot with `ReactorStopped` if dropped before a result is set.
struct CompletionGuard<T>(Option<Arc<Completion<T>>>);

impl<T> CompletionGuard<T> {
    fn complete(mut self, result: Result<T>) {
        if let Some(completion) = self.0.take() {
            completion.complete(result);
        }
    }
}

impl<T> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        if let Some(completion) = self.0.take() {
            completion.complete(Err(McuError::ReactorStopped.into()));
        }
    }
}

/// Handle to the loop thread owning a state of type `S`.
pub struct Reactor<S: 'static> {
    jobs: Option<UnboundedSender<Job<S>>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: 'static> Reactor<S> {
    /// Start the loop thread and build its state there.
    ///
    /// `init` runs inside the loop, so it may spawn local tasks.
    ///
    /// # Errors
    ///
    /// Returns the error from `init`, or `McuError::ReactorStopped` if the
    /// thread or runtime could not be started.
    pub fn spawn<F>(name: &str, init: F) -> Result<Self>
    where
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job<S>>();
        let started = Arc::new(Completion::<()>::new());
        let guard = CompletionGuard(Some(started.clone()));

        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("unable to start reactor runtime: {}", e);
                        guard.complete(Err(McuError::Transport(short(&e.to_string())).into()));
                        return;
                    }
                };

                let local = LocalSet::new();
                local.block_on(&runtime, async move {
                    let state = match init() {
                        Ok(state) => Rc::new(state),
                        Err(e) => {
                            guard.complete(Err(e));
                            return;
                        }
                    };
                    guard.complete(Ok(()));

                    while let Some(job) = queue.recv().await {
                        job(state.clone());
                    }
                    debug!("reactor job queue closed");
                });
            })
            .map_err(|_| Error::Mcu(McuError::ReactorStopped))?;

        let reactor = Self {
            jobs: Some(jobs),
            thread: Some(thread),
        };
        started.wait(None)?;
        Ok(reactor)
    }

    /// Run `f` on the loop and block until its future resolves.
    ///
    /// The future runs as a local task, so other jobs keep making progress
    /// while it waits. A timeout abandons the wait but not the job.
    ///
    /// # Errors
    ///
    /// Returns the job's own error, `McuError::CallTimeout` when `timeout`
    /// elapses first, `McuError::CallbackPanicked` if the job panics, or
    /// `McuError::ReactorStopped` if the loop is gone.
    pub fn call<T, F, Fut>(&self, timeout: Option<Duration>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Rc<S>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + 'static,
    {
        let completion = Arc::new(Completion::new());
        let guard = CompletionGuard(Some(completion.clone()));

        let job: Job<S> = Box::new(move |state| {
            tokio::task::spawn_local(async move {
                let result = match tokio::task::spawn_local(async move { f(state).await }).await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => {
                        error!("reactor job panicked");
                        Err(McuError::CallbackPanicked.into())
                    }
                    Err(_) => Err(McuError::ReactorStopped.into()),
                };
                guard.complete(result);
            });
        });

        let jobs = self.jobs.as_ref().ok_or(Error::Mcu(McuError::ReactorStopped))?;
        jobs.send(job)
            .map_err(|_| Error::Mcu(McuError::ReactorStopped))?;

        completion.wait(timeout)
    }

    /// Check whether the loop thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl<S: 'static> Drop for Reactor<S> {
    fn drop(&mut self) {
        // Closing the queue ends the loop
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("reactor thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counter {
        value: Cell<u32>,
    }

    fn counter() -> Reactor<Counter> {
        Reactor::spawn("test-reactor", || {
            Ok(Counter {
                value: Cell::new(0),
            })
        })
        .unwrap()
    }

    #[test]
    fn test_call_returns_value() {
        let reactor = counter();
        let v = reactor
            .call(None, |state| async move {
                state.value.set(state.value.get() + 5);
                Ok(state.value.get())
            })
            .unwrap();
        assert_eq!(v, 5);
        assert!(reactor.is_running());
    }

    #[test]
    fn test_error_propagates() {
        let reactor = counter();
        let result: Result<()> =
            reactor.call(None, |_| async { Err(Error::Mcu(McuError::NotConnected)) });
        assert_eq!(result, Err(Error::Mcu(McuError::NotConnected)));
    }

    #[test]
    fn test_panic_is_reported() {
        let reactor = counter();
        let result: Result<()> = reactor.call(None, |_| async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        assert_eq!(result, Err(Error::Mcu(McuError::CallbackPanicked)));

        // loop survives
        assert_eq!(reactor.call(None, |s| async move { Ok(s.value.get()) }), Ok(0));
    }

    #[test]
    fn test_timeout() {
        let reactor = counter();
        let result: Result<()> = reactor.call(Some(Duration::from_millis(20)), |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });
        assert_eq!(result, Err(Error::Mcu(McuError::CallTimeout)));
    }

    #[test]
    fn test_jobs_interleave() {
        let reactor = Arc::new(counter());
        thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                reactor.call(None, |state| async move {
                    while state.value.get() == 0 {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    Ok(state.value.get())
                })
            });
            thread::sleep(Duration::from_millis(20));
            reactor
                .call(None, |state| async move {
                    state.value.set(9);
                    Ok(())
                })
                .unwrap();
            assert_eq!(waiter.join().unwrap(), Ok(9));
        });
    }

    #[test]
    fn test_init_error() {
        let result = Reactor::<Counter>::spawn("test-reactor", || Err(Error::Mcu(McuError::NotConnected)));
        assert!(matches!(result, Err(Error::Mcu(McuError::NotConnected))));
    }
}
