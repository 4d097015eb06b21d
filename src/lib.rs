// Layer modules
pub mod data_link; // Received events and the polling receive loop
pub mod physical; // Transport trait and adapter backends

pub mod hardware_id;
pub mod registry;

// Re-exports for convenience
pub use data_link::{ErrorKind, InfoKind, LoopState, ReceiveLoop, ReceivedEvent};
pub use hardware_id::decode_hardware_id;
pub use physical::{
    AdapterDescriptor, CanBitrate, CanOptions, Channel, OpenHandle, Transport, TransportConfig,
};
pub use registry::{AdapterRef, AdapterRegistry};
pub use types::Frame;

// Common types and traits
pub mod error;
pub mod types;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
