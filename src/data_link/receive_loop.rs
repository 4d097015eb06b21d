//! Cooperative polling driver for one open channel.
//!
//! The loop owns a single worker thread. Each iteration drains every event the
//! transport has buffered, forwarding them in order, then waits up to the poll
//! interval for more. Stop requests are honoured between polls and between
//! drained events; `stop()` joins the worker before returning.

use super::{ErrorKind, ReceivedEvent};
use crate::error::{CanError, Result};
use crate::physical::{OpenHandle, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of a receive loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
}

struct Worker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

struct Inner {
    state: LoopState,
    worker: Option<Worker>,
    worker_thread: Option<ThreadId>,
}

/// State shared between the loop handle and its worker
struct Shared {
    inner: Mutex<Inner>,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Polls one handle of a shared transport on a dedicated thread
pub struct ReceiveLoop<T: Transport + ?Sized + 'static> {
    transport: Arc<T>,
    poll_interval: Duration,
    shared: Arc<Shared>,
}

impl<T: Transport + ?Sized + 'static> ReceiveLoop<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_poll_interval(transport, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(transport: Arc<T>, poll_interval: Duration) -> Self {
        Self {
            transport,
            poll_interval,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: LoopState::Idle,
                    worker: None,
                    worker_thread: None,
                }),
                idle: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> LoopState {
        self.shared.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// Starts polling `handle`, forwarding every event to `on_event`.
    ///
    /// Fails with `AlreadyRunning` until a previous worker has exited.
    pub fn start<F>(&self, handle: OpenHandle, on_event: F) -> Result<()>
    where
        F: FnMut(ReceivedEvent) + Send + 'static,
    {
        let mut inner = self.shared.lock();
        if inner.state != LoopState::Idle {
            return Err(CanError::AlreadyRunning);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let poller = Poller {
            transport: Arc::clone(&self.transport),
            handle,
            poll_interval: self.poll_interval,
            stop: Arc::clone(&stop),
            shared: Arc::clone(&self.shared),
        };
        let thread = thread::Builder::new()
            .name(format!("can-rx-{}", handle.raw()))
            .spawn(move || poller.run(on_event))
            .map_err(|e| CanError::InitFailed(format!("failed to spawn receive thread: {}", e)))?;

        inner.worker_thread = Some(thread.thread().id());
        inner.worker = Some(Worker { stop, thread });
        inner.state = LoopState::Running;

        let interval_ms = self.poll_interval.as_millis() as u64;
        tracing::info!(%handle, interval_ms, "receive loop started");
        Ok(())
    }

    /// Starts polling `handle` and returns the queue events are delivered to
    pub fn start_queue(&self, handle: OpenHandle) -> Result<mpsc::Receiver<ReceivedEvent>> {
        let (tx, rx) = mpsc::channel();
        self.start(handle, move |event| {
            let _ = tx.send(event);
        })?;
        Ok(rx)
    }

    /// Stops the worker and waits for it to exit; no-op when idle.
    ///
    /// From inside the event callback this only requests the stop. The loop
    /// stays `Stopping` until the worker exits after the callback returns.
    pub fn stop(&self) {
        let current = thread::current().id();
        let mut inner = self.shared.lock();
        loop {
            match inner.state {
                LoopState::Idle => return,
                LoopState::Stopping if inner.worker_thread == Some(current) => return,
                LoopState::Running if inner.worker.is_some() => break,
                _ => {
                    inner = self
                        .shared
                        .idle
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }

        let Some(worker) = inner.worker.take() else {
            return;
        };
        inner.state = LoopState::Stopping;
        drop(inner);

        worker.stop.store(true, Ordering::Release);
        if worker.thread.thread().id() == current {
            tracing::debug!("receive loop stop requested from its own thread");
        } else if worker.thread.join().is_err() {
            tracing::warn!("receive loop worker panicked");
        }
    }
}

impl<T: Transport + ?Sized + 'static> Drop for ReceiveLoop<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Returns the loop to `Idle` when the worker exits, unwinding included
struct ExitGuard(Arc<Shared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mut inner = self.0.lock();
        inner.state = LoopState::Idle;
        inner.worker = None;
        inner.worker_thread = None;
        self.0.idle.notify_all();
        tracing::info!("receive loop stopped");
    }
}

struct Poller<T: Transport + ?Sized> {
    transport: Arc<T>,
    handle: OpenHandle,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl<T: Transport + ?Sized> Poller<T> {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn run<F: FnMut(ReceivedEvent)>(self, mut on_event: F) {
        let _exit = ExitGuard(Arc::clone(&self.shared));
        let mut closed_reported = false;

        while !self.stopped() {
            // Drain everything buffered before waiting again
            loop {
                if self.stopped() {
                    return;
                }
                match self.transport.receive(&self.handle) {
                    Ok(Some(event)) => on_event(event),
                    Ok(None) => break,
                    Err(CanError::TransportClosed) => {
                        if !closed_reported {
                            tracing::warn!(handle = %self.handle, "polled handle is closed");
                            closed_reported = true;
                        }
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(handle = %self.handle, error = %e, "receive failed");
                        on_event(ReceivedEvent::ErrorEvent(ErrorKind::OtherError));
                        break;
                    }
                }
            }

            if self.stopped() {
                return;
            }
            if self
                .transport
                .wait_for_event(&self.handle, self.poll_interval)
                .is_err()
            {
                thread::sleep(self.poll_interval);
            }
        }
    }
}

#[cfg(test)]
#[path = "receive_loop_tests.rs"]
mod tests;
