//! In-process virtual bus.
//!
//! Every adapter exposes the same number of channels; channel `n` of every
//! adapter is wired to one shared bus `n`. A frame sent on a handle reaches all
//! other open handles on that bus, and the sender itself when the channel was
//! opened with `CanOptions::SELF_RECEPTION`.

use super::{AdapterDescriptor, CanOptions, OpenHandle, Transport, TransportConfig};
use crate::data_link::{InfoKind, ReceivedEvent};
use crate::error::{CanError, Result};
use crate::hardware_id::decode_hardware_id;
use crate::types::{Config, Frame, Timestamp};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const RX_QUEUE_SIZE: usize = 1024;

#[derive(Debug)]
struct Endpoint {
    adapter: usize,
    channel: u8,
    options: CanOptions,
    rx: VecDeque<ReceivedEvent>,
}

impl Endpoint {
    fn push(&mut self, event: ReceivedEvent) -> bool {
        if self.rx.len() >= RX_QUEUE_SIZE {
            return false;
        }
        self.rx.push_back(event);
        true
    }
}

#[derive(Debug, Default)]
struct BusState {
    next_handle: u64,
    open: HashMap<OpenHandle, Endpoint>,
    bus_off: HashSet<usize>,
}

/// Loopback backend for tests and demos
#[derive(Debug)]
pub struct LoopbackSimulator {
    adapters: Vec<AdapterDescriptor>,
    channels: u8,
    epoch: Instant,
    state: Mutex<BusState>,
    rx_ready: Condvar,
}

impl LoopbackSimulator {
    /// Creates a simulator with one adapter per name, each exposing `channels` channels
    pub fn new(names: &[&str], channels: u8) -> Self {
        let adapters = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut raw = [0u8; 16];
                let serial = format!("HWSIM{:04}", i);
                raw[..serial.len()].copy_from_slice(serial.as_bytes());
                AdapterDescriptor {
                    name: name.to_string(),
                    hardware_id: decode_hardware_id(&raw),
                }
            })
            .collect();

        Self {
            adapters,
            channels,
            epoch: Instant::now(),
            state: Mutex::new(BusState::default()),
            rx_ready: Condvar::new(),
        }
    }

    /// Queues `event` on the receive path of `handle`, as if raised by the controller
    pub fn inject(&self, handle: &OpenHandle, event: ReceivedEvent) -> Result<()> {
        let mut state = self.state();
        let endpoint = state
            .open
            .get_mut(handle)
            .ok_or(CanError::TransportClosed)?;
        if matches!(event, ReceivedEvent::ErrorEvent(_))
            && !endpoint.options.contains(CanOptions::ERROR_FRAMES)
        {
            return Ok(());
        }
        endpoint.push(event);
        self.rx_ready.notify_all();
        Ok(())
    }

    /// Puts an adapter into or out of bus-off; transmits fail while it is set
    pub fn set_bus_off(&self, adapter_index: usize, bus_off: bool) {
        let mut state = self.state();
        if bus_off {
            state.bus_off.insert(adapter_index);
        } else {
            state.bus_off.remove(&adapter_index);
        }
    }

    /// Number of events waiting on `handle`
    pub fn pending(&self, handle: &OpenHandle) -> usize {
        self.state().open.get(handle).map_or(0, |e| e.rx.len())
    }

    /// Number of currently open handles
    pub fn open_channels(&self) -> usize {
        self.state().open.len()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> Timestamp {
        self.epoch.elapsed().as_micros() as Timestamp
    }
}

impl Transport for LoopbackSimulator {
    fn list_adapters(&self) -> Result<Vec<AdapterDescriptor>> {
        Ok(self.adapters.clone())
    }

    fn open(
        &self,
        adapter_index: usize,
        channel: u8,
        config: &TransportConfig,
    ) -> Result<OpenHandle> {
        config.validate()?;
        if adapter_index >= self.adapters.len() {
            return Err(CanError::AdapterUnavailable {
                index: adapter_index,
                available: self.adapters.len(),
            });
        }
        if channel >= self.channels {
            return Err(CanError::InitFailed(format!(
                "adapter {} has no channel {}",
                adapter_index, channel
            )));
        }

        let mut state = self.state();
        if state
            .open
            .values()
            .any(|e| e.adapter == adapter_index && e.channel == channel)
        {
            return Err(CanError::DeviceBusy);
        }

        let handle = OpenHandle::new(state.next_handle);
        state.next_handle += 1;

        let mut endpoint = Endpoint {
            adapter: adapter_index,
            channel,
            options: config.options,
            rx: VecDeque::new(),
        };
        endpoint.push(ReceivedEvent::InfoEvent(InfoKind::Started));
        state.open.insert(handle, endpoint);

        tracing::info!(
            %handle,
            adapter = %self.adapters[adapter_index].name,
            channel,
            bitrate_kbps = config.bitrate.kbps(),
            "loopback channel opened"
        );
        Ok(handle)
    }

    fn send(&self, handle: &OpenHandle, frame: &Frame) -> Result<()> {
        let timestamp = self.now();
        let mut state = self.state();
        let (adapter, channel, options) = match state.open.get(handle) {
            Some(e) => (e.adapter, e.channel, e.options),
            None => return Err(CanError::TransportClosed),
        };

        if options.contains(CanOptions::LISTEN_ONLY) {
            return Err(CanError::WriteFailed("channel is listen-only".into()));
        }
        if state.bus_off.contains(&adapter) {
            return Err(CanError::WriteFailed("bus off".into()));
        }

        let stamped = frame.with_timestamp(timestamp);
        for (peer, endpoint) in state.open.iter_mut() {
            if endpoint.channel != channel {
                continue;
            }
            if peer == handle && !options.contains(CanOptions::SELF_RECEPTION) {
                continue;
            }
            if !endpoint.push(ReceivedEvent::DataFrame(stamped)) {
                tracing::debug!(handle = %peer, "receive queue full, frame dropped");
            }
        }
        self.rx_ready.notify_all();

        tracing::debug!(%handle, id = frame.id(), dlc = frame.dlc(), "frame sent");
        Ok(())
    }

    fn receive(&self, handle: &OpenHandle) -> Result<Option<ReceivedEvent>> {
        let mut state = self.state();
        let endpoint = state
            .open
            .get_mut(handle)
            .ok_or(CanError::TransportClosed)?;
        Ok(endpoint.rx.pop_front())
    }

    fn close(&self, handle: &OpenHandle) -> Result<()> {
        let mut state = self.state();
        if state.open.remove(handle).is_some() {
            tracing::info!(%handle, "loopback channel closed");
            self.rx_ready.notify_all();
        }
        Ok(())
    }

    fn wait_for_event(&self, handle: &OpenHandle, timeout: Duration) -> Result<()> {
        let state = self.state();
        if !state.open.contains_key(handle) {
            return Err(CanError::TransportClosed);
        }
        let _state = self
            .rx_ready
            .wait_timeout_while(state, timeout, |s| {
                s.open.get(handle).is_some_and(|e| e.rx.is_empty())
            })
            .unwrap_or_else(PoisonError::into_inner);
        Ok(())
    }
}

#[cfg(test)]
#[path = "loopback_tests.rs"]
mod tests;
