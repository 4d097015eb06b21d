use crate::error::{FrameError, Result};
use std::fmt;

/// CAN ID type
pub type CanId = u32;

/// Adapter-relative timestamp, opaque unit
pub type Timestamp = u64;

/// Largest 11-bit identifier
pub const MAX_STANDARD_ID: CanId = 0x7FF;
/// Largest 29-bit identifier
pub const MAX_EXTENDED_ID: CanId = 0x1FFF_FFFF;
/// Classic CAN payload bound
pub const MAX_DLC: usize = 8;

/// Immutable classic CAN frame, either carrying data or requesting it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    id: CanId,
    extended: bool,
    data: [u8; MAX_DLC],
    dlc: u8,
    remote: bool,
    timestamp: Timestamp,
}

impl Frame {
    /// Builds a data frame, validating the identifier range and payload length
    pub fn data_frame(id: CanId, extended: bool, data: &[u8]) -> Result<Self> {
        check_id(id, extended)?;
        if data.len() > MAX_DLC {
            return Err(FrameError::PayloadTooLong(data.len()).into());
        }

        let mut buf = [0u8; MAX_DLC];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            extended,
            data: buf,
            dlc: data.len() as u8,
            remote: false,
            timestamp: 0,
        })
    }

    /// Builds a remote transmission request for `requested_len` bytes
    pub fn remote_frame(id: CanId, extended: bool, requested_len: u8) -> Result<Self> {
        check_id(id, extended)?;
        if requested_len as usize > MAX_DLC {
            return Err(FrameError::RequestedLengthTooLong(requested_len).into());
        }

        Ok(Self {
            id,
            extended,
            data: [0u8; MAX_DLC],
            dlc: requested_len,
            remote: true,
            timestamp: 0,
        })
    }

    /// Returns a copy of this frame stamped with `timestamp`
    pub fn with_timestamp(self, timestamp: Timestamp) -> Self {
        Self { timestamp, ..self }
    }

    pub fn id(&self) -> CanId {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn is_remote_request(&self) -> bool {
        self.remote
    }

    /// Payload bytes; always empty for remote requests
    pub fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.dlc as usize]
        }
    }

    /// Declared length: payload length, or the requested length of a remote frame
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

fn check_id(id: CanId, extended: bool) -> Result<()> {
    let max = if extended {
        MAX_EXTENDED_ID
    } else {
        MAX_STANDARD_ID
    };
    if id > max {
        return Err(FrameError::IdentifierOutOfRange {
            identifier: id,
            extended,
        }
        .into());
    }
    Ok(())
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Time: {}  ID: {:#X}  DLC: {}",
            self.timestamp, self.id, self.dlc
        )?;
        if self.remote {
            return write!(f, " Remote Frame");
        }
        write!(f, " Data:")?;
        for byte in self.data() {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Configuration trait that must be implemented by all transport configurations
pub trait Config: Send + Sync {
    fn validate(&self) -> Result<()>;
}
