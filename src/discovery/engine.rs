use crate::arp::HardwareAddressLookup;
use crate::codec::{discovery_request, get_state_request, DiscoveryResponse};
use crate::device::identity::HardwareAddress;
use crate::device::state::{DeviceState, StateDecoder};
use crate::error::{Error, Result};
use crate::runtime::config::ClientConfig;
use crate::transport::{exchange, Matcher, Subscription, Transport};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinHandle, JoinSet};

/// One device as seen by a discovery scan.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredDevice {
    pub serial_number: String,
    pub ip_address: IpAddr,
    pub state_counter: u64,
    pub mac_address: Option<HardwareAddress>,
    pub model: Option<String>,
    pub nickname: Option<String>,
    pub firmware_version: Option<String>,
    /// Present once the record has been enriched with a full-state fetch.
    pub state: Option<DeviceState>,
}

impl DiscoveredDevice {
    /// The reported `ip_address` wins over the datagram source; the source is
    /// only used when the report is unparsable.
    pub fn from_response(response: DiscoveryResponse, source: SocketAddr) -> Self {
        let ip_address = response.ip_address.parse().unwrap_or_else(|_| {
            log::debug!(
                target: "pixelair::discovery",
                "{} reported unparsable ip {:?}, using {}",
                response.serial_number, response.ip_address, source.ip()
            );
            source.ip()
        });
        let mac_address = response.mac_address.as_deref().and_then(|mac| HardwareAddress::parse(mac).ok());

        DiscoveredDevice {
            serial_number: response.serial_number,
            ip_address,
            state_counter: response.state_counter,
            mac_address,
            model: response.model,
            nickname: response.nickname,
            firmware_version: response.firmware_version,
            state: None,
        }
    }

    /// Fill the descriptive fields the discovery response lacked.
    pub fn enrich(&mut self, state: DeviceState) {
        if self.model.is_none() {
            self.model = state.model.clone();
        }
        if self.nickname.is_none() {
            self.nickname = state.nickname.clone();
        }
        if self.firmware_version.is_none() {
            self.firmware_version = state.firmware_version.clone();
        }
        if self.mac_address.is_none() {
            self.mac_address = state.mac_address.as_deref().and_then(|mac| HardwareAddress::parse(mac).ok());
        }
        self.state = Some(state);
    }
}

/// Broadcast discovery and targeted lookups over the shared transport.
///
/// Cheap to clone; clones share the transport, lookup and decoder.
#[derive(Clone)]
pub struct DiscoveryEngine {
    transport: Arc<Transport>,
    config: Arc<ClientConfig>,
    lookup: Arc<dyn HardwareAddressLookup>,
    decoder: Option<Arc<dyn StateDecoder>>,
    scope: Matcher,
}

impl DiscoveryEngine {
    pub fn new(
        transport: Arc<Transport>,
        config: Arc<ClientConfig>,
        lookup: Arc<dyn HardwareAddressLookup>,
    ) -> Self {
        DiscoveryEngine { transport, config, lookup, decoder: None, scope: Matcher::any() }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn StateDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Only accept responses that also satisfy `scope`. Lets several engines
    /// share one transport without seeing each other's devices.
    pub fn with_scope(mut self, scope: Matcher) -> Self {
        self.scope = scope;
        self
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn decoder(&self) -> Option<&Arc<dyn StateDecoder>> {
        self.decoder.as_ref()
    }

    pub fn scope(&self) -> Matcher {
        self.scope
    }

    fn require_decoder(&self) -> Result<&Arc<dyn StateDecoder>> {
        self.decoder
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("no state decoder configured".into()))
    }

    /// Broadcast and collect every response for the full `timeout`.
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        let devices = self.collect(timeout, |_| false).await?;
        log::info!(target: "pixelair::discovery", "Scan found {} device(s)", devices.len());
        Ok(devices)
    }

    /// [`scan`](Self::scan), then fetch the full state of every device
    /// concurrently. A device that fails to answer stays basic.
    pub async fn scan_with_info(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        self.require_decoder()?;
        let devices = self.scan(timeout).await?;
        Ok(self.enrich_all(devices).await)
    }

    /// Collect until `serial` answers or `timeout` passes. Collection stops
    /// at the first matching response, so a later duplicate from the same
    /// serial in that window is not considered.
    pub async fn find_by_serial(&self, serial: &str, timeout: Duration) -> Result<DiscoveredDevice> {
        let devices = self.collect(timeout, |d| d.serial_number == serial).await?;
        match devices.into_iter().find(|d| d.serial_number == serial) {
            Some(device) => Ok(device),
            None => {
                log::warn!(target: "pixelair::discovery", "No device with serial {} answered", serial);
                Err(Error::DeviceNotFound(format!("serial {}", serial)))
            }
        }
    }

    /// Neighbour table first (verified by a unicast discovery), then a scan
    /// matched on reported MACs, then full-state enrichment of the rest.
    ///
    /// All steps share one deadline of `timeout`. With a decoder configured
    /// the scan takes half of what remains, leaving the rest for enrichment.
    pub async fn find_by_mac(&self, mac: &HardwareAddress, timeout: Duration) -> Result<DiscoveredDevice> {
        let mac = *mac;
        let deadline = Instant::now() + timeout;

        if let Some(ip) = self.lookup_ip(mac).await {
            log::debug!(target: "pixelair::discovery", "Neighbour table maps {} to {}", mac, ip);
            let budget = deadline.saturating_duration_since(Instant::now()).min(self.config.info_timeout());
            match self.verify_device(ip, budget).await {
                Ok(mut device) => {
                    device.mac_address = Some(mac);
                    return Ok(device);
                }
                Err(e) => log::debug!(target: "pixelair::discovery", "{} did not verify: {}", ip, e),
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let window = if self.decoder.is_some() { remaining / 2 } else { remaining };
        let devices = self.collect(window, |d| d.mac_address == Some(mac)).await?;
        if let Some(device) = devices.iter().find(|d| d.mac_address == Some(mac)) {
            return Ok(device.clone());
        }

        // The broadcast may have populated the neighbour table
        for device in &devices {
            if self.lookup_mac(device.ip_address).await == Some(mac) {
                let mut device = device.clone();
                device.mac_address = Some(mac);
                return Ok(device);
            }
        }

        let unmatched: Vec<DiscoveredDevice> = devices.into_iter().filter(|d| d.mac_address.is_none()).collect();
        let remaining = deadline.saturating_duration_since(Instant::now());
        if self.decoder.is_some() && !unmatched.is_empty() && !remaining.is_zero() {
            match tokio::time::timeout(remaining, self.enrich_all(unmatched)).await {
                Ok(enriched) => {
                    if let Some(device) = enriched.into_iter().find(|d| d.mac_address == Some(mac)) {
                        return Ok(device);
                    }
                }
                Err(_) => log::debug!(target: "pixelair::discovery", "Enrichment cut off after {:?}", timeout),
            }
        }

        log::warn!(target: "pixelair::discovery", "No device with MAC {} answered", mac);
        Err(Error::DeviceNotFound(format!("MAC {}", mac)))
    }

    /// Unicast discovery to a single address.
    pub async fn verify_device(&self, ip: IpAddr, timeout: Duration) -> Result<DiscoveredDevice> {
        let destination = SocketAddr::new(ip, self.config.discovery_port);
        let matcher = Matcher::discovery().from_ip(ip).within(&self.scope);
        let response = exchange(&self.transport, destination, &discovery_request(), matcher, timeout).await?;
        let parsed = DiscoveryResponse::parse(&response)?;
        Ok(DiscoveredDevice::from_response(parsed, destination))
    }

    /// Request, reassemble and decode the full state of the device at `ip`.
    pub async fn fetch_state(&self, ip: IpAddr, timeout: Duration) -> Result<DeviceState> {
        let decoder = self.require_decoder()?;
        let destination = SocketAddr::new(ip, self.config.command_port);
        let matcher = Matcher::state().from_ip(ip).within(&self.scope);
        let payload = exchange(&self.transport, destination, &get_state_request(), matcher, timeout).await?;
        decoder.decode(&payload)
    }

    /// Rescan every `interval` until stopped, reporting each device once per
    /// cycle. Must be called from within a tokio runtime.
    pub fn continuous<F>(&self, interval: Duration, fetch_full_info: bool, callback: F) -> Result<ContinuousDiscovery>
    where
        F: Fn(&DiscoveredDevice) + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(Error::InvalidParameter("discovery interval must be positive".into()));
        }
        if fetch_full_info {
            self.require_decoder()?;
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::InvalidParameter("continuous discovery needs a tokio runtime".into()))?;

        let engine = self.clone();
        let window = self.config.scan_timeout().min(interval);
        let task = handle.spawn(async move {
            let mut cycle: u64 = 0;
            loop {
                let started = Instant::now();
                cycle += 1;
                let result = if fetch_full_info {
                    engine.scan_with_info(window).await
                } else {
                    engine.scan(window).await
                };
                match result {
                    Ok(devices) => devices.iter().for_each(|device| callback(device)),
                    Err(e) => log::warn!(target: "pixelair::discovery", "Discovery cycle {} failed: {}", cycle, e),
                }
                tokio::time::sleep(interval.saturating_sub(started.elapsed())).await;
            }
        });

        log::info!(target: "pixelair::discovery", "Continuous discovery every {:?}", interval);
        Ok(ContinuousDiscovery { task: Some(task) })
    }

    /// Broadcast and gather responses until `timeout` or until `done` accepts
    /// one. Deduplicated by serial, last response wins.
    async fn collect<P>(&self, timeout: Duration, done: P) -> Result<Vec<DiscoveredDevice>>
    where
        P: Fn(&DiscoveredDevice) -> bool,
    {
        let mut subscription = Subscription::new(&self.transport, Matcher::discovery().within(&self.scope));
        let request = discovery_request();
        let repetitions = self.config.broadcast_count.max(1);
        let deadline = Instant::now() + timeout;

        let mut found: HashMap<String, DiscoveredDevice> = HashMap::new();
        let mut sent = 0;
        let mut next_broadcast = Instant::now();

        loop {
            let now = Instant::now();
            if sent < repetitions && now >= next_broadcast {
                match self.transport.send_broadcast(&request, self.config.discovery_port) {
                    Ok(()) => {}
                    Err(e) if sent == 0 => return Err(e),
                    Err(e) => log::warn!(target: "pixelair::discovery", "Repeat broadcast failed: {}", e),
                }
                sent += 1;
                next_broadcast = now + self.config.broadcast_interval();
            }
            if now >= deadline {
                break;
            }

            let wake = if sent < repetitions { deadline.min(next_broadcast) } else { deadline };
            let Some((datagram, source)) = subscription.recv_within(wake.saturating_duration_since(now)).await? else {
                continue;
            };

            match DiscoveryResponse::parse(&datagram) {
                Ok(response) => {
                    let device = DiscoveredDevice::from_response(response, source);
                    log::debug!(
                        target: "pixelair::discovery",
                        "{} at {} (counter {})", device.serial_number, device.ip_address, device.state_counter
                    );
                    let stop = done(&device);
                    found.insert(device.serial_number.clone(), device);
                    if stop {
                        break;
                    }
                }
                Err(e) => log::debug!(target: "pixelair::discovery", "Ignoring datagram from {}: {}", source, e),
            }
        }

        let mut devices: Vec<DiscoveredDevice> = found.into_values().collect();
        devices.sort_by(|a, b| a.serial_number.cmp(&b.serial_number));
        Ok(devices)
    }

    /// Fetch full state for every record concurrently, each bounded by the
    /// info timeout. Dropping the future aborts the outstanding fetches.
    async fn enrich_all(&self, devices: Vec<DiscoveredDevice>) -> Vec<DiscoveredDevice> {
        let info_timeout = self.config.info_timeout();
        let mut tasks = JoinSet::new();
        for (position, mut device) in devices.into_iter().enumerate() {
            let engine = self.clone();
            tasks.spawn(async move {
                match engine.fetch_state(device.ip_address, info_timeout).await {
                    Ok(state) => device.enrich(state),
                    Err(e) => log::debug!(
                        target: "pixelair::discovery",
                        "State of {} unavailable: {}", device.serial_number, e
                    ),
                }
                (position, device)
            });
        }

        let mut enriched = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => enriched.push(entry),
                Err(e) => log::error!(target: "pixelair::discovery", "Enrichment task failed: {}", e),
            }
        }
        enriched.sort_by_key(|(position, _)| *position);
        enriched.into_iter().map(|(_, device)| device).collect()
    }

    pub(crate) async fn lookup_ip(&self, mac: HardwareAddress) -> Option<IpAddr> {
        let lookup = self.lookup.clone();
        tokio::task::spawn_blocking(move || lookup.lookup_ip_by_mac(&mac)).await.ok().flatten()
    }

    pub(crate) async fn lookup_mac(&self, ip: IpAddr) -> Option<HardwareAddress> {
        let lookup = self.lookup.clone();
        tokio::task::spawn_blocking(move || lookup.lookup_mac_by_ip(ip)).await.ok().flatten()
    }
}

/// Handle of a running [`DiscoveryEngine::continuous`] loop.
pub struct ContinuousDiscovery {
    task: Option<JoinHandle<()>>,
}

impl ContinuousDiscovery {
    /// Abort the cycle in progress and wait for the loop to exit. No callback
    /// runs after this returns.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            log::info!(target: "pixelair::discovery", "Continuous discovery stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ContinuousDiscovery {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
