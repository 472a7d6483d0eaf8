use crate::error::{Error, Result};
use pnet_base::MacAddr;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Instant;

/// A validated MAC address.
///
/// Accepts colon, hyphen or no separators in any case; always displays as
/// lowercase colon-separated octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareAddress(MacAddr);

impl HardwareAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        let [a, b, c, d, e, f] = octets;
        HardwareAddress(MacAddr::new(a, b, c, d, e, f))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidParameter(format!("Invalid MAC address: {}", text));

        let digits: String = text.chars().filter(|c| *c != ':' && *c != '-').collect();
        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let colon_separated = (0..6).map(|i| &digits[i * 2..i * 2 + 2]).collect::<Vec<_>>().join(":");
        colon_separated.parse::<MacAddr>().map(HardwareAddress).map_err(|_| invalid())
    }

    /// Neighbour-table form: colon or hyphen separated, octets may drop a
    /// leading zero (`a:b:c:d:e:f`).
    pub(crate) fn parse_loose(text: &str) -> Option<Self> {
        text.replace('-', ":").parse::<MacAddr>().ok().map(HardwareAddress)
    }

    pub fn octets(&self) -> [u8; 6] {
        let MacAddr(a, b, c, d, e, f) = self.0;
        [a, b, c, d, e, f]
    }

    pub fn is_zero(&self) -> bool {
        self.0 == MacAddr::zero()
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == MacAddr::broadcast()
    }
}

impl From<MacAddr> for HardwareAddress {
    fn from(mac: MacAddr) -> Self {
        HardwareAddress(mac)
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for HardwareAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        HardwareAddress::parse(s)
    }
}

/// The stable half of a device handle: what it *is*, not where it is.
///
/// Never mutated in place; [`DeviceIdentity::with_serial`] and
/// [`DeviceIdentity::with_hardware_address`] return new values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    serial_number: Option<String>,
    hardware_address: Option<HardwareAddress>,
}

impl DeviceIdentity {
    pub fn new(serial_number: Option<String>, hardware_address: Option<HardwareAddress>) -> Result<Self> {
        let serial_number = serial_number.filter(|s| !s.is_empty());
        if serial_number.is_none() && hardware_address.is_none() {
            return Err(Error::InvalidParameter(
                "At least one of serial number or MAC address must be provided".into(),
            ));
        }
        Ok(DeviceIdentity { serial_number, hardware_address })
    }

    pub fn from_serial(serial: impl Into<String>) -> Result<Self> {
        Self::new(Some(serial.into()), None)
    }

    pub fn from_mac(mac: &str) -> Result<Self> {
        Self::new(None, Some(HardwareAddress::parse(mac)?))
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn hardware_address(&self) -> Option<HardwareAddress> {
        self.hardware_address
    }

    /// Copy with the serial filled in if it was missing.
    pub fn with_serial(&self, serial: &str) -> Self {
        let mut next = self.clone();
        if next.serial_number.is_none() && !serial.is_empty() {
            next.serial_number = Some(serial.to_string());
        }
        next
    }

    /// Copy with the hardware address filled in if it was missing.
    pub fn with_hardware_address(&self, mac: HardwareAddress) -> Self {
        let mut next = self.clone();
        if next.hardware_address.is_none() {
            next.hardware_address = Some(mac);
        }
        next
    }

    pub fn is_complete(&self) -> bool {
        self.serial_number.is_some() && self.hardware_address.is_some()
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.serial_number, &self.hardware_address) {
            (Some(sn), Some(mac)) => write!(f, "{} ({})", sn, mac),
            (Some(sn), None) => write!(f, "{}", sn),
            (None, Some(mac)) => write!(f, "{}", mac),
            (None, None) => write!(f, "<unknown>"),
        }
    }
}

/// How an address was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    Arp,
    BroadcastScan,
}

/// A network address bound to a device at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub ip: IpAddr,
    pub resolved_at: Instant,
    pub source: AddressSource,
}

impl ResolvedAddress {
    pub fn new(ip: IpAddr, source: AddressSource) -> Self {
        ResolvedAddress { ip, resolved_at: Instant::now(), source }
    }
}
