//! Thread-delegating executor.
//!
//! Wraps a target executor and runs every one of its operations on a
//! dedicated worker thread, so blocking work inside the target never stalls
//! the caller's runtime.
//!
//! # Architecture
//!
//! ```text
//! Caller runtime                    Worker thread (current-thread runtime)
//! ──────────────                    ──────────────────────────────────────
//! create_call(f, x)
//!   ├─ check handles are ours
//!   ├─ box target operation ──────→ receive task
//!   │                                 ├─ spawn onto the worker runtime
//!   │                                 └─ target.create_call(f, x).await
//!   └─ await oneshot reply ◄──────── send result
//! ```
//!
//! The worker is started lazily by the first operation. `close` drains the
//! tasks already submitted, joins the thread and closes the target; the
//! next operation starts a fresh worker.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use federate_ir::{Selector, Type};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::executor::{Executor, ExecutorValue};
use crate::value::Value;

/// Default name of the worker thread.
pub const DEFAULT_THREAD_NAME: &str = "federate-worker";

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Lifecycle of the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No operation has run yet.
    Idle,
    Running,
    /// Shut down by `close`; restarts on the next operation.
    Closed,
}

// ============================================================================
// Worker thread
// ============================================================================

struct Worker {
    sender: Option<mpsc::UnboundedSender<Task>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(name: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::WorkerUnavailable(e.to_string()))?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                info!("Worker thread started");
                runtime.block_on(run_tasks(receiver));
                info!("Worker thread shutting down");
            })
            .map_err(|e| Error::WorkerUnavailable(e.to_string()))?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();

        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                debug!("Worker dropped from its own thread, detaching");
                return;
            }
            debug!("Waiting for worker thread to finish");
            if let Err(e) = handle.join() {
                error!("Worker thread panicked: {:?}", e);
            } else {
                debug!("Worker thread joined successfully");
            }
        }
    }
}

/// Run submitted tasks concurrently until the channel closes, then drain.
async fn run_tasks(mut receiver: mpsc::UnboundedReceiver<Task>) {
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            task = receiver.recv() => match task {
                Some(task) => {
                    in_flight.spawn(task);
                }
                None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Delegated task failed");
                }
            }
        }
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Delegated task failed");
        }
    }
}

/// Join `worker` without blocking the caller's runtime thread.
async fn shutdown(worker: Worker) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            if let Err(e) = runtime.spawn_blocking(move || drop(worker)).await {
                error!(error = %e, "Failed to join worker thread");
            }
        }
        Err(_) => drop(worker),
    }
}

// ============================================================================
// Shared state
// ============================================================================

struct Slot {
    worker: Option<Worker>,
    state: WorkerState,
}

struct Shared<E> {
    target: Arc<E>,
    thread_name: String,
    slot: Mutex<Slot>,
}

impl<E: Executor> Shared<E> {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sender of the running worker, starting one if needed.
    fn sender(&self) -> Result<mpsc::UnboundedSender<Task>> {
        let mut slot = self.slot();
        if slot.worker.is_none() {
            if slot.state == WorkerState::Closed {
                debug!(thread = %self.thread_name, "Restarting worker after close");
            }
            slot.worker = Some(Worker::spawn(&self.thread_name)?);
            slot.state = WorkerState::Running;
        }
        slot.worker
            .as_ref()
            .and_then(|worker| worker.sender.clone())
            .ok_or(Error::WorkerStopped)
    }

    /// Run `work` against the target on the worker thread.
    async fn submit<T, F, Fut>(&self, work: F) -> Result<T>
    where
        F: FnOnce(Arc<E>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let target = Arc::clone(&self.target);
        let task: Task = Box::pin(async move {
            // The caller may have stopped waiting.
            let _ = reply.send(work(target).await);
        });
        self.sender()?
            .send(task)
            .map_err(|_| Error::WorkerStopped)?;
        result.await.map_err(|_| Error::WorkerStopped)?
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Runs a target executor's operations on a dedicated worker thread.
pub struct ThreadDelegatingExecutor<E: Executor> {
    shared: Arc<Shared<E>>,
}

/// A handle of the target executor, tagged with its delegating owner.
pub struct DelegatedValue<E: Executor> {
    inner: E::Handle,
    ty: Type,
    owner: Arc<Shared<E>>,
}

impl<E: Executor> Clone for DelegatedValue<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            ty: self.ty.clone(),
            owner: Arc::clone(&self.owner),
        }
    }
}

impl<E: Executor> fmt::Debug for DelegatedValue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedValue")
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

impl<E: Executor> DelegatedValue<E> {
    /// The target executor's handle.
    pub fn internal_representation(&self) -> &E::Handle {
        &self.inner
    }
}

#[async_trait]
impl<E: Executor> ExecutorValue for DelegatedValue<E> {
    fn type_signature(&self) -> &Type {
        &self.ty
    }

    async fn compute(&self) -> Result<Value> {
        let inner = self.inner.clone();
        self.owner
            .submit(move |_| async move { inner.compute().await })
            .await
    }
}

impl<E: Executor> ThreadDelegatingExecutor<E> {
    pub fn new(target: E) -> Self {
        Self::with_thread_name(target, DEFAULT_THREAD_NAME)
    }

    pub fn with_thread_name(target: E, thread_name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                target: Arc::new(target),
                thread_name: thread_name.into(),
                slot: Mutex::new(Slot {
                    worker: None,
                    state: WorkerState::Idle,
                }),
            }),
        }
    }

    pub fn target(&self) -> &E {
        &self.shared.target
    }

    pub fn state(&self) -> WorkerState {
        self.shared.slot().state
    }

    fn check_owner(&self, value: &DelegatedValue<E>) -> Result<()> {
        if Arc::ptr_eq(&self.shared, &value.owner) {
            Ok(())
        } else {
            Err(Error::ForeignValue)
        }
    }

    fn wrap(&self, inner: E::Handle) -> DelegatedValue<E> {
        DelegatedValue {
            ty: inner.type_signature().clone(),
            inner,
            owner: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl<E: Executor> Executor for ThreadDelegatingExecutor<E> {
    type Handle = DelegatedValue<E>;

    async fn create_value(&self, value: Value, type_hint: Option<Type>) -> Result<Self::Handle> {
        let inner = self
            .shared
            .submit(move |target| async move { target.create_value(value, type_hint).await })
            .await?;
        Ok(self.wrap(inner))
    }

    async fn create_call(
        &self,
        function: &Self::Handle,
        argument: Option<&Self::Handle>,
    ) -> Result<Self::Handle> {
        self.check_owner(function)?;
        if let Some(argument) = argument {
            self.check_owner(argument)?;
        }
        let function = function.inner.clone();
        let argument = argument.map(|a| a.inner.clone());
        let inner = self
            .shared
            .submit(move |target| async move {
                target.create_call(&function, argument.as_ref()).await
            })
            .await?;
        Ok(self.wrap(inner))
    }

    async fn create_struct(
        &self,
        elements: Vec<(Option<String>, Self::Handle)>,
    ) -> Result<Self::Handle> {
        let mut inner_elements = Vec::with_capacity(elements.len());
        for (name, element) in elements {
            self.check_owner(&element)?;
            inner_elements.push((name, element.inner));
        }
        let inner = self
            .shared
            .submit(move |target| async move { target.create_struct(inner_elements).await })
            .await?;
        Ok(self.wrap(inner))
    }

    async fn create_selection(
        &self,
        source: &Self::Handle,
        selector: Selector,
    ) -> Result<Self::Handle> {
        self.check_owner(source)?;
        let source = source.inner.clone();
        let inner = self
            .shared
            .submit(move |target| async move { target.create_selection(&source, selector).await })
            .await?;
        Ok(self.wrap(inner))
    }

    async fn close(&self) {
        let worker = {
            let mut slot = self.shared.slot();
            slot.state = WorkerState::Closed;
            slot.worker.take()
        };
        if let Some(worker) = worker {
            shutdown(worker).await;
        }
        self.shared.target.close().await;
        info!(thread = %self.shared.thread_name, "Delegating executor closed");
    }
}
