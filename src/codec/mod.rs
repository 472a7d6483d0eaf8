//! # PixelAir Wire Codec
//!
//! Encoding and decoding of the datagrams exchanged with PixelAir devices.
//!
//! ## Key Types
//!
//! - [`OscMessage`] - OSC 1.0 requests (discovery, `/getState`, control routes)
//! - [`DiscoveryResponse`] - `'$'`-prefixed JSON discovery answers
//! - [`FragmentHeader`] / [`FragmentReassembler`] - segmented state payloads
//!
//! ## Example
//!
//! ```ignore
//! use pixelair::codec::{discovery_request, DiscoveryResponse};
//!
//! let request = discovery_request();
//! let response = DiscoveryResponse::parse(&datagram)?;
//! ```

pub mod osc;
pub mod fragment;
pub mod discovery;

pub use osc::{OscArg, OscMessage};
pub use fragment::{FragmentHeader, FragmentReassembler, Reassembly, FRAGMENT_MARKER};
pub use discovery::{DiscoveryResponse, DISCOVERY_MARKER};

/// OSC route answered with a discovery response.
pub const DISCOVERY_ROUTE: &str = "/fluoraDiscovery";

/// OSC route answered with the full (possibly fragmented) device state.
pub const GET_STATE_ROUTE: &str = "/getState";

/// Discovery request, identical for broadcast and unicast.
pub fn discovery_request() -> Vec<u8> {
    OscMessage::new(DISCOVERY_ROUTE).encode()
}

pub fn get_state_request() -> Vec<u8> {
    OscMessage::new(GET_STATE_ROUTE).encode()
}
