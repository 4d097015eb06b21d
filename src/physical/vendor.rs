//! Adapter from a vendor SDK binding to the `Transport` trait.
//!
//! A binding implements [`VendorDriver`], the five calls the SDK offers
//! (enumerate, open, read, write, close). [`VendorTransport`] adds handle
//! bookkeeping, exclusive channel claims and decoding of the SDK's raw
//! messages into [`ReceivedEvent`]s.

use super::{AdapterDescriptor, CanOptions, OpenHandle, Transport, TransportConfig};
use crate::data_link::{ErrorKind, InfoKind, ReceivedEvent};
use crate::error::{CanError, Result};
use crate::hardware_id::decode_hardware_id;
use crate::types::{Config, Frame, MAX_DLC};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;

// Info codes carried in data[0] of an info message
pub const INFO_START: u8 = 1;
pub const INFO_STOP: u8 = 2;
pub const INFO_RESET: u8 = 3;

// Error codes carried in data[0] of an error message
pub const ERROR_STUFF: u8 = 1;
pub const ERROR_FORM: u8 = 2;
pub const ERROR_ACK: u8 = 3;
pub const ERROR_BIT: u8 = 4;
pub const ERROR_CRC: u8 = 6;
pub const ERROR_OTHER: u8 = 7;

/// Native channel handle issued by the driver
pub type NativeHandle = u64;

/// Failure reported by a driver binding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("driver not installed")]
    NotInstalled,
    #[error("resource already claimed")]
    Busy,
    #[error("{0}")]
    Native(String),
}

/// Device entry reported by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    pub description: String,
    pub hardware_id: Vec<u8>,
}

/// Message kinds used by the driver's FIFOs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFrameType {
    Data,
    Info,
    Error,
    Other(u8),
}

/// Message layout used by the driver's FIFOs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage {
    pub identifier: u32,
    pub extended: bool,
    pub remote: bool,
    pub frame_type: RawFrameType,
    pub dlc: u8,
    pub data: [u8; MAX_DLC],
    pub timestamp: u64,
    pub self_reception: bool,
}

impl RawMessage {
    /// Encodes a frame for transmission
    pub fn from_frame(frame: &Frame, self_reception: bool) -> Self {
        let mut data = [0u8; MAX_DLC];
        data[..frame.data().len()].copy_from_slice(frame.data());
        Self {
            identifier: frame.id(),
            extended: frame.is_extended(),
            remote: frame.is_remote_request(),
            frame_type: RawFrameType::Data,
            dlc: frame.dlc(),
            data,
            timestamp: 0,
            self_reception,
        }
    }

    /// Status message with `code` in the first data byte
    pub fn info(code: u8) -> Self {
        Self::status(RawFrameType::Info, code)
    }

    /// Error message with `code` in the first data byte
    pub fn error(code: u8) -> Self {
        Self::status(RawFrameType::Error, code)
    }

    fn status(frame_type: RawFrameType, code: u8) -> Self {
        let mut data = [0u8; MAX_DLC];
        data[0] = code;
        Self {
            identifier: 0,
            extended: false,
            remote: false,
            frame_type,
            dlc: 1,
            data,
            timestamp: 0,
            self_reception: false,
        }
    }

    /// Decodes into an event; anything malformed becomes `ErrorEvent(OtherError)`
    pub fn decode(&self) -> ReceivedEvent {
        let malformed = ReceivedEvent::ErrorEvent(ErrorKind::OtherError);
        match self.frame_type {
            RawFrameType::Data => {
                if self.dlc as usize > MAX_DLC {
                    return malformed;
                }
                let frame = if self.remote {
                    Frame::remote_frame(self.identifier, self.extended, self.dlc)
                } else {
                    Frame::data_frame(
                        self.identifier,
                        self.extended,
                        &self.data[..self.dlc as usize],
                    )
                };
                match frame {
                    Ok(frame) => ReceivedEvent::DataFrame(frame.with_timestamp(self.timestamp)),
                    Err(_) => malformed,
                }
            }
            RawFrameType::Info if self.dlc > 0 => match self.data[0] {
                INFO_START => ReceivedEvent::InfoEvent(InfoKind::Started),
                INFO_STOP => ReceivedEvent::InfoEvent(InfoKind::Stopped),
                INFO_RESET => ReceivedEvent::InfoEvent(InfoKind::Reset),
                _ => malformed,
            },
            RawFrameType::Error if self.dlc > 0 => {
                let kind = match self.data[0] {
                    ERROR_STUFF => ErrorKind::StuffError,
                    ERROR_FORM => ErrorKind::FormError,
                    ERROR_ACK => ErrorKind::AckError,
                    ERROR_BIT => ErrorKind::BitError,
                    ERROR_CRC => ErrorKind::CrcError,
                    // ERROR_OTHER and codes this crate does not know
                    _ => ErrorKind::OtherError,
                };
                ReceivedEvent::ErrorEvent(kind)
            }
            _ => malformed,
        }
    }
}

/// The five-call surface of a vendor SDK
pub trait VendorDriver: Send + Sync {
    fn enumerate_devices(&self) -> std::result::Result<Vec<RawDevice>, DriverError>;
    fn open_channel(
        &self,
        device_index: usize,
        channel: u8,
        config: &TransportConfig,
    ) -> std::result::Result<NativeHandle, DriverError>;
    fn read_frame(&self, native: NativeHandle)
        -> std::result::Result<Option<RawMessage>, DriverError>;
    fn write_frame(
        &self,
        native: NativeHandle,
        message: &RawMessage,
    ) -> std::result::Result<(), DriverError>;
    fn close_channel(&self, native: NativeHandle);

    /// Waits for the receive FIFO to become non-empty; drivers without a
    /// receive event simply sleep
    fn wait_rx(&self, _native: NativeHandle, timeout: Duration) {
        std::thread::sleep(timeout);
    }
}

#[derive(Debug, Clone, Copy)]
struct NativeChannel {
    native: NativeHandle,
    device: usize,
    channel: u8,
    options: CanOptions,
}

/// `Transport` over a vendor driver binding.
///
/// Reads and writes share the channel table; `open` and `close` take it
/// exclusively, so `close` returns only after in-flight polls finished.
pub struct VendorTransport<D: VendorDriver> {
    driver: D,
    next_handle: AtomicU64,
    channels: RwLock<HashMap<OpenHandle, NativeChannel>>,
}

impl<D: VendorDriver> VendorTransport<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            next_handle: AtomicU64::new(0),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn channels(&self) -> RwLockReadGuard<'_, HashMap<OpenHandle, NativeChannel>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn channels_mut(&self) -> RwLockWriteGuard<'_, HashMap<OpenHandle, NativeChannel>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open handles
    pub fn open_channels(&self) -> usize {
        self.channels().len()
    }
}

impl<D: VendorDriver> Transport for VendorTransport<D> {
    fn list_adapters(&self) -> Result<Vec<AdapterDescriptor>> {
        let devices = match self.driver.enumerate_devices() {
            Ok(devices) => devices,
            Err(DriverError::NotInstalled) => {
                tracing::info!("no vendor driver installed");
                return Ok(Vec::new());
            }
            Err(e) => return Err(CanError::EnumerationFailed(e.to_string())),
        };

        Ok(devices
            .into_iter()
            .map(|d| AdapterDescriptor {
                hardware_id: decode_hardware_id(&d.hardware_id),
                name: d.description,
            })
            .collect())
    }

    fn open(
        &self,
        adapter_index: usize,
        channel: u8,
        config: &TransportConfig,
    ) -> Result<OpenHandle> {
        config.validate()?;
        let available = self.list_adapters()?.len();
        if adapter_index >= available {
            return Err(CanError::AdapterUnavailable {
                index: adapter_index,
                available,
            });
        }

        // Held across open_channel so two callers cannot claim the same channel
        let mut channels = self.channels_mut();
        if channels
            .values()
            .any(|c| c.device == adapter_index && c.channel == channel)
        {
            return Err(CanError::DeviceBusy);
        }

        let native = self
            .driver
            .open_channel(adapter_index, channel, config)
            .map_err(|e| match e {
                DriverError::Busy => CanError::DeviceBusy,
                other => CanError::InitFailed(other.to_string()),
            })?;

        let handle = OpenHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        channels.insert(
            handle,
            NativeChannel {
                native,
                device: adapter_index,
                channel,
                options: config.options,
            },
        );

        tracing::info!(
            %handle,
            native,
            adapter_index,
            channel,
            bitrate_kbps = config.bitrate.kbps(),
            "vendor channel opened"
        );
        Ok(handle)
    }

    fn send(&self, handle: &OpenHandle, frame: &Frame) -> Result<()> {
        let channels = self.channels();
        let channel = channels.get(handle).ok_or(CanError::TransportClosed)?;
        let message =
            RawMessage::from_frame(frame, channel.options.contains(CanOptions::SELF_RECEPTION));
        self.driver
            .write_frame(channel.native, &message)
            .map_err(|e| CanError::WriteFailed(e.to_string()))?;
        tracing::debug!(%handle, id = frame.id(), dlc = frame.dlc(), "frame written");
        Ok(())
    }

    fn receive(&self, handle: &OpenHandle) -> Result<Option<ReceivedEvent>> {
        let channels = self.channels();
        let channel = channels.get(handle).ok_or(CanError::TransportClosed)?;
        let message = self
            .driver
            .read_frame(channel.native)
            .map_err(|e| CanError::ReadFailed(e.to_string()))?;
        Ok(message.map(|m| m.decode()))
    }

    fn close(&self, handle: &OpenHandle) -> Result<()> {
        // Removal and the native close happen under the lock so an in-flight
        // open cannot reuse the channel before the driver released it
        let mut channels = self.channels_mut();
        if let Some(channel) = channels.remove(handle) {
            self.driver.close_channel(channel.native);
            tracing::info!(%handle, native = channel.native, "vendor channel closed");
        }
        Ok(())
    }

    fn wait_for_event(&self, handle: &OpenHandle, timeout: Duration) -> Result<()> {
        // Held across the wait so close cannot release the native channel under it
        let channels = self.channels();
        let channel = channels.get(handle).ok_or(CanError::TransportClosed)?;
        self.driver.wait_rx(channel.native, timeout);
        Ok(())
    }
}

#[cfg(test)]
#[path = "vendor_tests.rs"]
mod tests;
