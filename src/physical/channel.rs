use super::{OpenHandle, Transport, TransportConfig};
use crate::data_link::{LoopState, ReceiveLoop, ReceivedEvent};
use crate::error::Result;
use crate::types::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Scoped owner of one open handle.
///
/// The handle is released when the channel is closed or dropped, and an
/// active receive loop is joined before the backend handle goes away.
pub struct Channel<T: Transport + ?Sized + 'static> {
    transport: Arc<T>,
    handle: OpenHandle,
    rx_loop: ReceiveLoop<T>,
    closed: AtomicBool,
    on_close: Option<Arc<AtomicBool>>,
}

impl<T: Transport + ?Sized + 'static> Channel<T> {
    /// Opens `channel` on adapter `adapter_index` of `transport`
    pub fn open(
        transport: Arc<T>,
        adapter_index: usize,
        channel: u8,
        config: &TransportConfig,
    ) -> Result<Self> {
        let handle = transport.open(adapter_index, channel, config)?;
        Ok(Self {
            rx_loop: ReceiveLoop::new(Arc::clone(&transport)),
            transport,
            handle,
            closed: AtomicBool::new(false),
            on_close: None,
        })
    }

    /// Flag raised when this channel closes
    pub(crate) fn notify_on_close(mut self, flag: Arc<AtomicBool>) -> Self {
        self.on_close = Some(flag);
        self
    }

    /// Replaces the receive loop's poll interval; only while no loop is running
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        if !self.rx_loop.is_running() {
            self.rx_loop = ReceiveLoop::with_poll_interval(Arc::clone(&self.transport), poll_interval);
        }
        self
    }

    pub fn handle(&self) -> OpenHandle {
        self.handle
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn send(&self, frame: &Frame) -> Result<()> {
        self.transport.send(&self.handle, frame)
    }

    pub fn receive(&self) -> Result<Option<ReceivedEvent>> {
        self.transport.receive(&self.handle)
    }

    /// Starts the background receive loop for this channel
    pub fn start_receiving<F>(&self, on_event: F) -> Result<()>
    where
        F: FnMut(ReceivedEvent) + Send + 'static,
    {
        self.rx_loop.start(self.handle, on_event)
    }

    /// Starts the background receive loop, delivering into a queue
    pub fn receive_queue(&self) -> Result<mpsc::Receiver<ReceivedEvent>> {
        self.rx_loop.start_queue(self.handle)
    }

    pub fn stop_receiving(&self) {
        self.rx_loop.stop();
    }

    pub fn receive_state(&self) -> LoopState {
        self.rx_loop.state()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops receiving and releases the handle; later calls do nothing
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.rx_loop.stop();
        let result = self.transport.close(&self.handle);
        if let Some(flag) = &self.on_close {
            flag.store(true, Ordering::Release);
        }
        result
    }
}

impl<T: Transport + ?Sized + 'static> Drop for Channel<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(handle = %self.handle, error = %e, "failed to close channel on drop");
        }
    }
}
