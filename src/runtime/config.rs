use crate::error::{Error, Result};
use crate::transport::TransportConfig;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Client configuration.
/// All timing values are in milliseconds unless otherwise specified
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientConfig {
    /// Local port the shared socket binds on all interfaces (default: 12345)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Port devices answer discovery requests on (default: 9090)
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Port for routed requests such as /getState (default: 9090)
    #[serde(default = "default_command_port")]
    pub command_port: u16,
    /// Port for control commands (default: 6767)
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Destinations for discovery broadcasts (default: 255.255.255.255)
    #[serde(default = "default_broadcast_addresses")]
    pub broadcast_addresses: Vec<Ipv4Addr>,
    /// Discovery requests sent per scan (default: 1)
    #[serde(default = "default_broadcast_count")]
    pub broadcast_count: u32,
    /// Gap between repeated discovery requests (default: 1000)
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval_ms: u64,
    /// Collection window of a broadcast scan (default: 5000)
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_ms: u64,
    /// Per-device bound on full-state enrichment during a scan (default: 3000)
    #[serde(default = "default_info_timeout")]
    pub info_timeout_ms: u64,
    /// Request/response timeout (default: 10000)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Inactivity window for partial fragment assemblies (default: 10000)
    #[serde(default = "default_fragment_timeout")]
    pub fragment_timeout_ms: u64,
    /// Base poll interval (default: 1000)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Upper bound of the poll backoff (default: 60000)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Minimum time between re-resolutions started by the poller (default: 300000)
    #[serde(default = "default_resolve_cooldown")]
    pub resolve_cooldown_ms: u64,
    /// Receive buffer for a single datagram (default: 65536)
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            listen_port: default_listen_port(),
            discovery_port: default_discovery_port(),
            command_port: default_command_port(),
            control_port: default_control_port(),
            broadcast_addresses: default_broadcast_addresses(),
            broadcast_count: default_broadcast_count(),
            broadcast_interval_ms: default_broadcast_interval(),
            scan_timeout_ms: default_scan_timeout(),
            info_timeout_ms: default_info_timeout(),
            request_timeout_ms: default_request_timeout(),
            fragment_timeout_ms: default_fragment_timeout(),
            poll_interval_ms: default_poll_interval(),
            max_backoff_ms: default_max_backoff(),
            resolve_cooldown_ms: default_resolve_cooldown(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }
}

fn default_listen_port() -> u16 { 12345 }
fn default_discovery_port() -> u16 { 9090 }
fn default_command_port() -> u16 { 9090 }
fn default_control_port() -> u16 { 6767 }
fn default_broadcast_addresses() -> Vec<Ipv4Addr> { vec![Ipv4Addr::BROADCAST] }
fn default_broadcast_count() -> u32 { 1 }
fn default_broadcast_interval() -> u64 { 1000 }
fn default_scan_timeout() -> u64 { 5000 }
fn default_info_timeout() -> u64 { 3000 }
fn default_request_timeout() -> u64 { 10000 }
fn default_fragment_timeout() -> u64 { 10000 }
fn default_poll_interval() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 60000 }
fn default_resolve_cooldown() -> u64 { 300000 }
fn default_recv_buffer_size() -> usize { 65536 }

impl ClientConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: ClientConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClientConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make timers or buffers meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.broadcast_addresses.is_empty() {
            return Err(Error::Config("broadcast_addresses must not be empty".into()));
        }
        if self.broadcast_count == 0 {
            return Err(Error::Config("broadcast_count must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        if self.recv_buffer_size < 64 {
            return Err(Error::Config("recv_buffer_size must be at least 64".into()));
        }
        Ok(())
    }

    pub fn scan_timeout(&self) -> Duration { Duration::from_millis(self.scan_timeout_ms) }
    pub fn info_timeout(&self) -> Duration { Duration::from_millis(self.info_timeout_ms) }
    pub fn request_timeout(&self) -> Duration { Duration::from_millis(self.request_timeout_ms) }
    pub fn fragment_timeout(&self) -> Duration { Duration::from_millis(self.fragment_timeout_ms) }
    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
    pub fn max_backoff(&self) -> Duration { Duration::from_millis(self.max_backoff_ms) }
    pub fn resolve_cooldown(&self) -> Duration { Duration::from_millis(self.resolve_cooldown_ms) }
    pub fn broadcast_interval(&self) -> Duration { Duration::from_millis(self.broadcast_interval_ms) }

    /// Socket settings for the shared [`Transport`](crate::transport::Transport).
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            listen_port: self.listen_port,
            broadcast_addresses: self.broadcast_addresses.clone(),
            recv_buffer_size: self.recv_buffer_size,
            fragment_window: self.fragment_timeout(),
        }
    }
}
