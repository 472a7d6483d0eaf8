use super::registry::{Handler, HandlerId, Matcher, Registration, Registry};
use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// How long the dispatcher blocks in `recv_from` before re-checking `running`.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Socket settings of a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub listen_port: u16,
    pub broadcast_addresses: Vec<Ipv4Addr>,
    pub recv_buffer_size: usize,
    /// Inactivity window for partial fragment assemblies
    pub fragment_window: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            listen_port: 12345,
            broadcast_addresses: vec![Ipv4Addr::BROADCAST],
            recv_buffer_size: 65536,
            fragment_window: Duration::from_secs(10),
        }
    }
}

struct Running {
    socket: Arc<UdpSocket>,
    running: Arc<AtomicBool>,
    dispatcher: thread::JoinHandle<()>,
}

/// The one UDP socket every discovery scan and device session shares.
///
/// A single dispatcher thread drains the socket and fans each datagram out
/// to the handlers whose [`Matcher`] accepts it.
pub struct Transport {
    config: TransportConfig,
    registry: Arc<Registry>,
    state: Mutex<Option<Running>>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Arc<Self> {
        Arc::new(Transport {
            config,
            registry: Arc::new(Registry::new()),
            state: Mutex::new(None),
        })
    }

    /// Bind the socket and start the dispatcher thread.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_some() {
            return Err(Error::InvalidParameter("transport is already running".into()));
        }

        let socket = Arc::new(bind_socket(self.config.listen_port)?);
        let running = Arc::new(AtomicBool::new(true));

        let dispatcher = {
            let socket = socket.clone();
            let running = running.clone();
            let registry = self.registry.clone();
            let buffer_size = self.config.recv_buffer_size;
            thread::Builder::new()
                .name("pixelair-dispatch".to_string())
                .spawn(move || dispatch_loop(&socket, &running, &registry, buffer_size))?
        };

        log::info!(
            target: "pixelair::transport",
            "Listening on {}", socket.local_addr().map(|a| a.to_string()).unwrap_or_default()
        );

        *state = Some(Running { socket, running, dispatcher });
        Ok(())
    }

    /// Close the socket and drop every registered handler.
    pub fn stop(&self) {
        let taken = self.state.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(run) = taken {
            run.running.store(false, Ordering::SeqCst);
            if run.dispatcher.join().is_err() {
                log::error!(target: "pixelair::transport", "Dispatcher thread panicked");
            }
            log::info!(target: "pixelair::transport", "Stopped");
        }
        self.registry.clear();
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket()?.local_addr()?)
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|run| run.socket.clone())
            .ok_or(Error::TransportNotRunning)
    }

    /// Fire-and-forget unicast.
    pub fn send(&self, data: &[u8], destination: SocketAddr) -> Result<()> {
        let socket = self.socket()?;
        socket.send_to(data, destination)?;
        log::trace!(target: "pixelair::transport", "Sent {} bytes to {}", data.len(), destination);
        Ok(())
    }

    /// Fire-and-forget to every configured broadcast address on `port`.
    ///
    /// Succeeds if at least one destination accepted the datagram.
    pub fn send_broadcast(&self, data: &[u8], port: u16) -> Result<()> {
        let socket = self.socket()?;
        let mut last_error = None;
        let mut sent = 0;
        for address in &self.config.broadcast_addresses {
            let destination = SocketAddr::V4(SocketAddrV4::new(*address, port));
            match socket.send_to(data, destination) {
                Ok(_) => sent += 1,
                Err(e) => {
                    log::debug!(target: "pixelair::transport", "Broadcast to {} failed: {}", destination, e);
                    last_error = Some(e);
                }
            }
        }
        match (sent, last_error) {
            (0, Some(e)) => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Attach a handler. It stays registered until the returned guard is
    /// dropped, [`Transport::unregister`] is called, or the transport stops.
    pub fn register(&self, matcher: Matcher, handler: Handler) -> Registration {
        let id = self.registry.insert(matcher, handler);
        Registration::new(id, &self.registry)
    }

    pub fn unregister(&self, id: HandlerId) -> bool {
        self.registry.remove(id)
    }

    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind_socket(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into()).map_err(|e| {
        log::error!(target: "pixelair::transport", "Failed to bind {}: {}", addr, e);
        Error::from(e)
    })?;
    socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;

    Ok(socket.into())
}

fn dispatch_loop(socket: &UdpSocket, running: &AtomicBool, registry: &Registry, buffer_size: usize) {
    let mut buf = vec![0u8; buffer_size];

    while running.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((size, src)) => {
                let delivered = registry.dispatch(&buf[..size], src);
                if delivered == 0 {
                    log::trace!(target: "pixelair::transport", "Unclaimed datagram ({} bytes) from {}", size, src);
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            // ICMP port-unreachable surfaces here on some platforms
            Err(ref e) if e.kind() == ErrorKind::ConnectionReset => {}
            Err(e) => {
                log::warn!(target: "pixelair::transport", "RX Error: {}", e);
                thread::sleep(RECV_POLL_INTERVAL);
            }
        }
    }
}
