//! Adapter selection across one or more registered transports.
//!
//! The registry keeps the last enumeration as a snapshot. Opening a channel
//! through the registry, or closing one it opened, invalidates the snapshot
//! since claims change what is available.

use crate::error::{CanError, Result};
use crate::physical::{AdapterDescriptor, Channel, Transport, TransportConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An adapter located by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterRef {
    pub backend: String,
    pub index: usize,
    pub descriptor: AdapterDescriptor,
}

impl AdapterRef {
    /// `backend/name`, unique across the registry
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.backend, self.descriptor.name)
    }
}

struct Backend {
    name: String,
    transport: Arc<dyn Transport>,
}

#[derive(Default)]
pub struct AdapterRegistry {
    backends: Vec<Backend>,
    snapshot: Option<Vec<AdapterRef>>,
    stale: Arc<AtomicBool>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a transport under `name`
    pub fn register(&mut self, name: &str, transport: Arc<dyn Transport>) -> &mut Self {
        self.backends.push(Backend {
            name: name.to_string(),
            transport,
        });
        self.invalidate();
        self
    }

    pub fn backend(&self, name: &str) -> Option<&Arc<dyn Transport>> {
        self.backends
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.transport)
    }

    /// Drops the snapshot; the next lookup re-enumerates
    pub fn invalidate(&mut self) {
        self.snapshot = None;
        self.stale.store(false, Ordering::Release);
    }

    /// Re-enumerates every backend
    pub fn refresh(&mut self) -> Result<&[AdapterRef]> {
        let mut adapters = Vec::new();
        for backend in &self.backends {
            for (index, descriptor) in backend.transport.list_adapters()?.into_iter().enumerate() {
                adapters.push(AdapterRef {
                    backend: backend.name.clone(),
                    index,
                    descriptor,
                });
            }
        }
        tracing::debug!(count = adapters.len(), "adapters enumerated");

        self.stale.store(false, Ordering::Release);
        Ok(self.snapshot.insert(adapters).as_slice())
    }

    /// Last snapshot, enumerating first if it is missing or stale
    pub fn adapters(&mut self) -> Result<&[AdapterRef]> {
        if self.stale.load(Ordering::Acquire) {
            self.snapshot = None;
        }
        if self.snapshot.is_none() {
            self.refresh()?;
        }
        Ok(self.snapshot.as_deref().unwrap_or_default())
    }

    /// Finds an adapter by name, hardware id or `backend/name`
    pub fn find(&mut self, name: &str) -> Result<Option<AdapterRef>> {
        Ok(self
            .adapters()?
            .iter()
            .find(|a| {
                a.descriptor.name == name
                    || a.descriptor.hardware_id == name
                    || a.qualified_name() == name
            })
            .cloned())
    }

    /// Opens a channel on a located adapter
    pub fn open(
        &mut self,
        adapter: &AdapterRef,
        channel: u8,
        config: &TransportConfig,
    ) -> Result<Channel<dyn Transport>> {
        let transport = self.backend(&adapter.backend).cloned();
        let Some(transport) = transport else {
            return Err(CanError::AdapterUnavailable {
                index: adapter.index,
                available: self.adapters()?.len(),
            });
        };

        // Claims change availability, successful or not
        self.invalidate();
        let opened = Channel::open(transport, adapter.index, channel, config)?;
        Ok(opened.notify_on_close(Arc::clone(&self.stale)))
    }

    /// Looks `name` up and opens a channel on it
    pub fn open_by_name(
        &mut self,
        name: &str,
        channel: u8,
        config: &TransportConfig,
    ) -> Result<Channel<dyn Transport>> {
        let available = self.adapters()?.len();
        let adapter = self
            .find(name)?
            .ok_or(CanError::AdapterUnavailable {
                index: available,
                available,
            })?;
        self.open(&adapter, channel, config)
    }
}
