//! Data link layer: the events a transport delivers on its receive path and
//! the loop that polls for them.

pub mod receive_loop;

pub use receive_loop::{LoopState, ReceiveLoop, DEFAULT_POLL_INTERVAL};

use crate::types::Frame;
use std::fmt;

/// Controller status notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoKind {
    Started,
    Stopped,
    Reset,
}

/// CAN error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StuffError, // Bit stuffing error
    FormError,  // Form error
    AckError,   // No acknowledgment received
    BitError,   // Transmitted bit not seen on the bus
    CrcError,   // CRC error
    OtherError, // Anything else, including undecodable events
}

/// One item read from a transport's receive path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivedEvent {
    DataFrame(Frame),
    InfoEvent(InfoKind),
    ErrorEvent(ErrorKind),
}

impl ReceivedEvent {
    /// The frame carried by a `DataFrame` event
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            ReceivedEvent::DataFrame(frame) => Some(frame),
            _ => None,
        }
    }
}

impl fmt::Display for InfoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoKind::Started => write!(f, "CAN started"),
            InfoKind::Stopped => write!(f, "CAN stopped"),
            InfoKind::Reset => write!(f, "CAN reset"),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::StuffError => write!(f, "stuff error"),
            ErrorKind::FormError => write!(f, "form error"),
            ErrorKind::AckError => write!(f, "acknowledgment error"),
            ErrorKind::BitError => write!(f, "bit error"),
            ErrorKind::CrcError => write!(f, "CRC error"),
            ErrorKind::OtherError => write!(f, "other error"),
        }
    }
}

impl fmt::Display for ReceivedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceivedEvent::DataFrame(frame) => write!(f, "{}", frame),
            ReceivedEvent::InfoEvent(kind) => write!(f, "{}...", kind),
            ReceivedEvent::ErrorEvent(kind) => write!(f, "{}...", kind),
        }
    }
}
