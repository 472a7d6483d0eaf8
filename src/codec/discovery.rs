use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Discovery responses are `'$'` followed by a JSON object.
pub const DISCOVERY_MARKER: u8 = b'$';

/// Fields of a discovery response. Only the first three are guaranteed by
/// the firmware; the rest show up on newer releases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub serial_number: String,
    pub ip_address: String,
    pub state_counter: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

impl DiscoveryResponse {
    pub fn parse(datagram: &[u8]) -> Result<Self> {
        let body = match datagram.split_first() {
            Some((&DISCOVERY_MARKER, body)) => body,
            _ => return Err(Error::MalformedPayload("missing '$' discovery marker".into())),
        };
        let response: DiscoveryResponse = serde_json::from_slice(body)?;
        if response.serial_number.is_empty() {
            return Err(Error::MalformedPayload("discovery response without serial number".into()));
        }
        Ok(response)
    }

    /// Encode as the device does. Used by fake devices in tests and tools.
    pub fn encode(&self) -> Vec<u8> {
        let mut datagram = vec![DISCOVERY_MARKER];
        // Serializing a plain struct of strings and integers cannot fail
        datagram.extend(serde_json::to_vec(self).unwrap_or_default());
        datagram
    }
}

/// True when the datagram looks like a discovery response.
pub fn is_discovery_response(datagram: &[u8]) -> bool {
    datagram.first() == Some(&DISCOVERY_MARKER)
}
