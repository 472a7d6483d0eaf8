//! # PixelAir Runtime
//!
//! Wires the shared transport, discovery engine and resolver together from
//! one [`ClientConfig`].
//!
//! ## Key Types
//!
//! - [`PixelAirRuntime`] - owns the transport, hands out sessions
//! - [`ClientConfig`] - ports, timeouts and broadcast settings
//!
//! ## Lifecycle
//!
//! 1. Load configuration: `PixelAirRuntime::load("pixelair.json")`
//! 2. Start the transport: `runtime.start()`
//! 3. Discover or open sessions: `runtime.discovery()`, `runtime.session(identity)`
//! 4. Stop gracefully: `runtime.stop()`
//!
//! ## Example
//!
//! ```ignore
//! let runtime = PixelAirRuntime::load("pixelair.json")?;
//! runtime.start()?;
//! let devices = runtime.discovery().scan(runtime.config().scan_timeout()).await?;
//! let session = runtime.session_for(&devices[0])?;
//! ```

pub mod config;

pub use config::ClientConfig;

use crate::arp::{HardwareAddressLookup, SystemArpTable};
use crate::device::identity::{AddressSource, DeviceIdentity, ResolvedAddress};
use crate::device::session::DeviceSession;
use crate::device::state::StateDecoder;
use crate::discovery::{DiscoveredDevice, DiscoveryEngine, Resolver};
use crate::error::Result;
use crate::transport::Transport;
use std::path::Path;
use std::sync::Arc;

pub struct PixelAirRuntime {
    config: Arc<ClientConfig>,
    transport: Arc<Transport>,
    resolver: Resolver,
}

impl PixelAirRuntime {
    pub fn new(config: ClientConfig, lookup: Arc<dyn HardwareAddressLookup>) -> Self {
        Self::build(config, lookup, None)
    }

    /// Like [`new`](Self::new), with a decoder for full-state payloads.
    pub fn with_decoder(
        config: ClientConfig,
        lookup: Arc<dyn HardwareAddressLookup>,
        decoder: Arc<dyn StateDecoder>,
    ) -> Self {
        Self::build(config, lookup, Some(decoder))
    }

    /// Read a JSON config and use the system neighbour table.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = ClientConfig::load(path)?;
        log::info!(target: "pixelair::runtime", "Loaded config (listen port {})", config.listen_port);
        Ok(Self::new(config, Arc::new(SystemArpTable)))
    }

    fn build(config: ClientConfig, lookup: Arc<dyn HardwareAddressLookup>, decoder: Option<Arc<dyn StateDecoder>>) -> Self {
        let config = Arc::new(config);
        let transport = Transport::new(config.transport_config());
        let mut engine = DiscoveryEngine::new(transport.clone(), config.clone(), lookup);
        if let Some(decoder) = decoder {
            engine = engine.with_decoder(decoder);
        }
        PixelAirRuntime { config, transport, resolver: Resolver::new(engine) }
    }

    pub fn start(&self) -> Result<()> {
        self.transport.start()
    }

    pub fn stop(&self) {
        self.transport.stop();
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn discovery(&self) -> &DiscoveryEngine {
        self.resolver.engine()
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// An unresolved session; call [`DeviceSession::resolve_ip`] before use.
    pub fn session(&self, identity: DeviceIdentity) -> DeviceSession {
        DeviceSession::new(identity, self.resolver.clone())
    }

    /// A session already bound to the address a scan reported.
    pub fn session_for(&self, device: &DiscoveredDevice) -> Result<DeviceSession> {
        let identity = DeviceIdentity::new(Some(device.serial_number.clone()), device.mac_address)?;
        let address = ResolvedAddress::new(device.ip_address, AddressSource::BroadcastScan);
        Ok(DeviceSession::with_address(identity, self.resolver.clone(), address))
    }
}

impl Drop for PixelAirRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}
