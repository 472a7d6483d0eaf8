use super::engine::{DiscoveredDevice, DiscoveryEngine};
use crate::device::identity::{AddressSource, DeviceIdentity, HardwareAddress, ResolvedAddress};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Outcome of a successful resolution: where the device is now, and its
/// identity with any missing half filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub address: ResolvedAddress,
    pub identity: DeviceIdentity,
}

/// Maps a [`DeviceIdentity`] to a live address.
///
/// The neighbour table is tried first; on a miss a targeted scan runs. The
/// resolver never hands out an address no device has confirmed or the
/// table does not hold.
#[derive(Clone)]
pub struct Resolver {
    engine: DiscoveryEngine,
    // MAC -> serial pairs confirmed by earlier scans
    known_serials: Arc<RwLock<HashMap<HardwareAddress, String>>>,
}

impl Resolver {
    pub fn new(engine: DiscoveryEngine) -> Self {
        Resolver { engine, known_serials: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn engine(&self) -> &DiscoveryEngine {
        &self.engine
    }

    pub async fn resolve(&self, identity: &DeviceIdentity, timeout: Duration) -> Result<Resolution> {
        if let Some(mac) = identity.hardware_address() {
            if let Some(ip) = self.engine.lookup_ip(mac).await {
                log::debug!(target: "pixelair::resolver", "Resolved {} to {} via neighbour table", identity, ip);
                let identity = match self.known_serial(&mac) {
                    Some(serial) => identity.with_serial(&serial),
                    None => identity.clone(),
                };
                return Ok(Resolution { address: ResolvedAddress::new(ip, AddressSource::Arp), identity });
            }
        }

        let found = match (identity.serial_number(), identity.hardware_address()) {
            (Some(serial), _) => self.engine.find_by_serial(serial, timeout).await,
            (None, Some(mac)) => self.engine.find_by_mac(&mac, timeout).await,
            (None, None) => Err(Error::InvalidParameter("empty device identity".into())),
        };

        let device = match found {
            Ok(device) => device,
            Err(e) => {
                if matches!(e, Error::DeviceNotFound(_)) {
                    log::warn!(target: "pixelair::resolver", "Could not resolve {}", identity);
                }
                return Err(e);
            }
        };

        let identity = self.backfill(identity, &device).await;
        log::info!(
            target: "pixelair::resolver",
            "Resolved {} to {} via broadcast scan", identity, device.ip_address
        );
        Ok(Resolution { address: ResolvedAddress::new(device.ip_address, AddressSource::BroadcastScan), identity })
    }

    async fn backfill(&self, identity: &DeviceIdentity, device: &DiscoveredDevice) -> DeviceIdentity {
        let mut next = identity.with_serial(&device.serial_number);

        if next.hardware_address().is_none() {
            let mac = match device.mac_address {
                Some(mac) => Some(mac),
                None => self.engine.lookup_mac(device.ip_address).await,
            };
            if let Some(mac) = mac {
                next = next.with_hardware_address(mac);
            }
        }

        if let (Some(mac), Some(serial)) = (next.hardware_address(), next.serial_number()) {
            self.known_serials
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(mac, serial.to_string());
        }
        next
    }

    fn known_serial(&self, mac: &HardwareAddress) -> Option<String> {
        self.known_serials.read().unwrap_or_else(|e| e.into_inner()).get(mac).cloned()
    }
}
