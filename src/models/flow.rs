//! # Flow and NMOS Read-Model Types
//!
//! Shapes consumed from the flow catalogue and the NMOS registry read model.
//! The transport triple is treated as an opaque descriptor sent to devices.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub flow_id: String,
    pub display_name: String,
    pub multicast_ip: String,
    pub source_ip: String,
    pub port: u16,
    /// NMOS sender expected to carry this flow, when known
    pub sender_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NmosReceiver {
    pub id: String,
    pub device_id: String,
    /// IS-04 format URN, e.g. `urn:x-nmos:format:audio`
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NmosSender {
    pub id: String,
    pub flow_id: Option<String>,
    pub label: String,
}

/// Media format precedence used by safe-switch ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    Audio,
    Video,
    Data,
    Mux,
    Unknown,
}

impl MediaFormat {
    /// Accepts IS-04 URNs as well as bare names
    pub fn from_format(format: &str) -> Self {
        let name = format.rsplit(':').next().unwrap_or(format);
        match name.to_ascii_lowercase().as_str() {
            "audio" => Self::Audio,
            "video" => Self::Video,
            "data" => Self::Data,
            "mux" => Self::Mux,
            _ => Self::Unknown,
        }
    }

    pub fn precedence(&self) -> u8 {
        match self {
            Self::Audio => 0,
            Self::Video => 1,
            Self::Data => 2,
            Self::Mux => 3,
            Self::Unknown => 99,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_urn() {
        assert_eq!(MediaFormat::from_format("urn:x-nmos:format:audio"), MediaFormat::Audio);
        assert_eq!(MediaFormat::from_format("urn:x-nmos:format:mux"), MediaFormat::Mux);
        assert_eq!(MediaFormat::from_format("video"), MediaFormat::Video);
        assert_eq!(MediaFormat::from_format(""), MediaFormat::Unknown);
    }

    #[test]
    fn test_precedence_order() {
        assert!(MediaFormat::Audio.precedence() < MediaFormat::Video.precedence());
        assert!(MediaFormat::Video.precedence() < MediaFormat::Data.precedence());
        assert!(MediaFormat::Data.precedence() < MediaFormat::Mux.precedence());
        assert_eq!(MediaFormat::Unknown.precedence(), 99);
    }
}
