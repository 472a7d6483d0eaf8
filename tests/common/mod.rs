//! Loopback stand-ins for PixelAir devices.

#![allow(dead_code)]

use pixelair::codec::fragment::segment_payload;
use pixelair::codec::{DiscoveryResponse, OscMessage, DISCOVERY_ROUTE, GET_STATE_ROUTE};
use pixelair::{ClientConfig, DeviceState};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub fn announcement(serial: &str, ip: &str) -> DiscoveryResponse {
    DiscoveryResponse {
        serial_number: serial.into(),
        ip_address: ip.into(),
        state_counter: 0,
        mac_address: None,
        model: None,
        nickname: None,
        firmware_version: None,
    }
}

/// What a fake device answers with.
#[derive(Clone, Default)]
pub struct Behavior {
    /// Sent, in order, for every discovery request.
    pub announcements: Vec<DiscoveryResponse>,
    /// JSON-encoded answer to `/getState`; no answer when `None`.
    pub state: Option<DeviceState>,
    /// Split the state into fragments of this many body bytes.
    pub fragment_body: Option<usize>,
    /// Bump the counter on every discovery request.
    pub auto_increment: bool,
}

/// A device simulated by a std thread on a loopback UDP socket.
pub struct FakeDevice {
    pub addr: SocketAddr,
    /// State counter reported in the first announcement.
    pub counter: Arc<AtomicU64>,
    /// When false the device ignores everything.
    pub responsive: Arc<AtomicBool>,
    pub discovery_requests: Arc<AtomicUsize>,
    pub state_requests: Arc<AtomicUsize>,
    /// Every message that was neither discovery nor `/getState`.
    pub commands: Arc<Mutex<Vec<OscMessage>>>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FakeDevice {
    pub fn spawn(behavior: Behavior) -> Self {
        Self::spawn_on("127.0.0.1:0", behavior)
    }

    pub fn spawn_on(bind: &str, behavior: Behavior) -> Self {
        let socket = UdpSocket::bind(bind).unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let addr = socket.local_addr().unwrap();

        let counter = Arc::new(AtomicU64::new(
            behavior.announcements.first().map(|a| a.state_counter).unwrap_or_default(),
        ));
        let responsive = Arc::new(AtomicBool::new(true));
        let discovery_requests = Arc::new(AtomicUsize::new(0));
        let state_requests = Arc::new(AtomicUsize::new(0));
        let commands = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let counter = counter.clone();
            let responsive = responsive.clone();
            let discovery_requests = discovery_requests.clone();
            let state_requests = state_requests.clone();
            let commands = commands.clone();
            let running = running.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 2048];
                let mut transaction: u8 = 0;
                while running.load(Ordering::Relaxed) {
                    let Ok((size, src)) = socket.recv_from(&mut buf) else { continue };
                    if !responsive.load(Ordering::SeqCst) {
                        continue;
                    }
                    let Ok(message) = OscMessage::decode(&buf[..size]) else { continue };

                    if message.address == DISCOVERY_ROUTE {
                        discovery_requests.fetch_add(1, Ordering::SeqCst);
                        if behavior.auto_increment {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }
                        for (i, announcement) in behavior.announcements.iter().enumerate() {
                            let mut announcement = announcement.clone();
                            if i == 0 {
                                announcement.state_counter = counter.load(Ordering::SeqCst);
                            }
                            let _ = socket.send_to(&announcement.encode(), src);
                        }
                    } else if message.address == GET_STATE_ROUTE {
                        state_requests.fetch_add(1, Ordering::SeqCst);
                        let Some(state) = &behavior.state else { continue };
                        let payload = serde_json::to_vec(state).unwrap();
                        match behavior.fragment_body {
                            Some(body) => {
                                transaction = transaction.wrapping_add(1);
                                let mut parts = segment_payload(&payload, transaction, body).unwrap();
                                // Deliver out of order
                                parts.rotate_left(1);
                                for part in parts {
                                    let _ = socket.send_to(&part, src);
                                }
                            }
                            None => {
                                let _ = socket.send_to(&payload, src);
                            }
                        }
                    } else {
                        commands.lock().unwrap().push(message);
                    }
                }
            })
        };

        FakeDevice {
            addr,
            counter,
            responsive,
            discovery_requests,
            state_requests,
            commands,
            running,
            handle: Some(handle),
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Client settings aimed at one fake device, with short timers.
pub fn client_config(device_port: u16) -> ClientConfig {
    ClientConfig {
        listen_port: 0,
        discovery_port: device_port,
        command_port: device_port,
        control_port: device_port,
        broadcast_addresses: vec![Ipv4Addr::LOCALHOST],
        scan_timeout_ms: 300,
        info_timeout_ms: 300,
        request_timeout_ms: 300,
        fragment_timeout_ms: 300,
        poll_interval_ms: 50,
        max_backoff_ms: 200,
        ..ClientConfig::default()
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_for<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
