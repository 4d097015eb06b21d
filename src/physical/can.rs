use crate::error::{CanError, Result};
use crate::types::Config;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Supported CAN bitrates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum CanBitrate {
    Rate10K,  // 10kbit/sec
    Rate20K,  // 20kbit/sec
    Rate125K, // 125kbit/sec
    Rate250K, // 250kbit/sec
    Rate500K, // 500kbit/sec
    Rate800K, // 800kbit/sec
    Rate1M,   // 1Mbit/sec
}

impl CanBitrate {
    pub const ALL: [CanBitrate; 7] = [
        CanBitrate::Rate10K,
        CanBitrate::Rate20K,
        CanBitrate::Rate125K,
        CanBitrate::Rate250K,
        CanBitrate::Rate500K,
        CanBitrate::Rate800K,
        CanBitrate::Rate1M,
    ];

    /// Maps a rate in kbit/s onto a supported profile
    pub fn from_kbps(kbps: u32) -> Result<Self> {
        match kbps {
            10 => Ok(CanBitrate::Rate10K),
            20 => Ok(CanBitrate::Rate20K),
            125 => Ok(CanBitrate::Rate125K),
            250 => Ok(CanBitrate::Rate250K),
            500 => Ok(CanBitrate::Rate500K),
            800 => Ok(CanBitrate::Rate800K),
            1000 => Ok(CanBitrate::Rate1M),
            other => Err(CanError::UnsupportedBitrate(other)),
        }
    }

    pub fn kbps(&self) -> u32 {
        match self {
            CanBitrate::Rate10K => 10,
            CanBitrate::Rate20K => 20,
            CanBitrate::Rate125K => 125,
            CanBitrate::Rate250K => 250,
            CanBitrate::Rate500K => 500,
            CanBitrate::Rate800K => 800,
            CanBitrate::Rate1M => 1000,
        }
    }
}

impl TryFrom<u32> for CanBitrate {
    type Error = CanError;

    fn try_from(kbps: u32) -> Result<Self> {
        CanBitrate::from_kbps(kbps)
    }
}

impl From<CanBitrate> for u32 {
    fn from(bitrate: CanBitrate) -> u32 {
        bitrate.kbps()
    }
}

bitflags! {
    /// Controller operating options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CanOptions: u32 {
        const NONE = 0;
        const SELF_RECEPTION = 1;
        const ERROR_FRAMES = 2;
        const LISTEN_ONLY = 4;
    }
}

impl Default for CanOptions {
    fn default() -> Self {
        CanOptions::SELF_RECEPTION | CanOptions::ERROR_FRAMES
    }
}

/// Channel configuration applied at open time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    #[serde(rename = "bitrate_kbps")]
    pub bitrate: CanBitrate,
    pub accept_all: bool,
    pub options: CanOptions,
}

impl TransportConfig {
    /// Pass-all configuration at `bitrate_kbps` with default options
    pub fn new(bitrate_kbps: u32) -> Result<Self> {
        Ok(Self::with_bitrate(CanBitrate::from_kbps(bitrate_kbps)?))
    }

    pub fn with_bitrate(bitrate: CanBitrate) -> Self {
        Self {
            bitrate,
            ..Self::default()
        }
    }

    pub fn options(mut self, options: CanOptions) -> Self {
        self.options = options;
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bitrate: CanBitrate::Rate250K,
            accept_all: true,
            options: CanOptions::default(),
        }
    }
}

impl Config for TransportConfig {
    fn validate(&self) -> Result<()> {
        if !self.accept_all {
            return Err(CanError::InitFailed(
                "only pass-all acceptance filtering is supported".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_supported_rate_round_trips() {
        for rate in CanBitrate::ALL {
            assert_eq!(CanBitrate::from_kbps(rate.kbps()), Ok(rate));
        }
    }

    #[test]
    fn unknown_rate_is_rejected() {
        for kbps in [0, 80, 50, 100, 333, 2000] {
            assert_eq!(
                TransportConfig::new(kbps),
                Err(CanError::UnsupportedBitrate(kbps))
            );
        }
    }

    #[test]
    fn default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.bitrate, CanBitrate::Rate250K);
        assert!(config.accept_all);
        assert!(config.options.contains(CanOptions::SELF_RECEPTION));
        assert!(config.options.contains(CanOptions::ERROR_FRAMES));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn narrow_filter_fails_validation() {
        let config = TransportConfig {
            accept_all: false,
            ..TransportConfig::default()
        };
        assert!(matches!(config.validate(), Err(CanError::InitFailed(_))));
    }

    #[test]
    fn config_from_toml() {
        let config: TransportConfig = toml::from_str("bitrate_kbps = 500").unwrap();
        assert_eq!(config.bitrate, CanBitrate::Rate500K);
        assert!(config.accept_all);

        let bad = toml::from_str::<TransportConfig>("bitrate_kbps = 80");
        assert!(bad.is_err());
    }
}
