//! Physical layer: adapter backends behind the `Transport` capability trait.
//!
//! Backends provided here:
//! - [`vendor::VendorTransport`], adapting a vendor driver binding
//! - [`loopback::LoopbackSimulator`], an in-process virtual bus
//!
//! Any other backend (SocketCAN, a serial-line adapter, ...) only needs to
//! implement [`Transport`].
//!
//! # Examples
//!
//! ```rust
//! use canlink::physical::{can::TransportConfig, loopback::LoopbackSimulator, Transport};
//! use canlink::types::Frame;
//!
//! let bus = LoopbackSimulator::new(&["sim0"], 1);
//! let handle = bus.open(0, 0, &TransportConfig::new(500).unwrap()).unwrap();
//! bus.send(&handle, &Frame::data_frame(0x100, false, &[1, 2, 3]).unwrap()).unwrap();
//! bus.close(&handle).unwrap();
//! ```

pub mod can;
pub mod channel;
pub mod loopback;
pub mod vendor;

pub use can::{CanBitrate, CanOptions, TransportConfig};
pub use channel::Channel;

use crate::data_link::ReceivedEvent;
use crate::error::Result;
use crate::types::Frame;
use std::fmt;
use std::time::Duration;

/// One adapter as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterDescriptor {
    pub name: String,
    pub hardware_id: String,
}

/// Token naming one open channel of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenHandle(u64);

impl OpenHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OpenHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Capability trait implemented by every adapter backend
pub trait Transport: Send + Sync {
    fn list_adapters(&self) -> Result<Vec<AdapterDescriptor>>;
    fn open(&self, adapter_index: usize, channel: u8, config: &TransportConfig)
        -> Result<OpenHandle>;
    fn send(&self, handle: &OpenHandle, frame: &Frame) -> Result<()>;
    /// Non-blocking poll; `None` when nothing is pending
    fn receive(&self, handle: &OpenHandle) -> Result<Option<ReceivedEvent>>;
    fn close(&self, handle: &OpenHandle) -> Result<()>;

    /// Blocks for at most `timeout` until an event may be pending
    fn wait_for_event(&self, _handle: &OpenHandle, timeout: Duration) -> Result<()> {
        std::thread::sleep(timeout);
        Ok(())
    }
}
