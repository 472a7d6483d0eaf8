use super::registry::{Matcher, Registration};
use super::udp::Transport;
use crate::codec::fragment::{FragmentReassembler, Reassembly};
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// A registration whose datagrams are queued for an async consumer.
///
/// Dropping the subscription unregisters it.
pub struct Subscription {
    rx: UnboundedReceiver<(Vec<u8>, SocketAddr)>,
    _registration: Registration,
}

impl Subscription {
    pub fn new(transport: &Transport, matcher: Matcher) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let registration = transport.register(
            matcher,
            Arc::new(move |data: &[u8], src: SocketAddr| {
                // Receiver gone means the consumer is shutting down
                let _ = tx.send((data.to_vec(), src));
            }),
        );
        Subscription { rx, _registration: registration }
    }

    pub async fn recv(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        self.rx.recv().await
    }

    /// `None` when nothing arrived within `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<(Vec<u8>, SocketAddr)> {
        tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()
    }

    /// Like [`recv_timeout`](Self::recv_timeout), but a transport stopped
    /// under the subscription is `TransportNotRunning` rather than `None`.
    pub async fn recv_within(&mut self, timeout: Duration) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        recv_within(&mut self.rx, timeout).await
    }
}

/// Like [`Subscription`], but only yields whole payloads: fragments are
/// reassembled on the dispatcher thread before they are queued.
pub struct AssembledSubscription {
    rx: UnboundedReceiver<(Vec<u8>, SocketAddr)>,
    _registration: Registration,
}

impl AssembledSubscription {
    pub fn new(transport: &Transport, matcher: Matcher, window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let reassembler = Mutex::new(FragmentReassembler::new(window));
        let registration = transport.register(
            matcher,
            Arc::new(move |data: &[u8], src: SocketAddr| {
                let outcome = reassembler.lock().unwrap_or_else(|e| e.into_inner()).accept(data, src);
                if let Reassembly::Complete(payload) = outcome {
                    let _ = tx.send((payload, src));
                }
            }),
        );
        AssembledSubscription { rx, _registration: registration }
    }

    pub async fn recv(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        self.rx.recv().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<(Vec<u8>, SocketAddr)> {
        tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()
    }

    pub async fn recv_within(&mut self, timeout: Duration) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        recv_within(&mut self.rx, timeout).await
    }
}

// The sender lives in the registry; a closed channel means `Transport::stop`
// dropped the registration.
async fn recv_within(
    rx: &mut UnboundedReceiver<(Vec<u8>, SocketAddr)>,
    timeout: Duration,
) -> Result<Option<(Vec<u8>, SocketAddr)>> {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(item)) => Ok(Some(item)),
        Ok(None) => Err(Error::TransportNotRunning),
        Err(_) => Ok(None),
    }
}

/// Send `payload` to `destination` and await the first complete response
/// accepted by `matcher`.
///
/// The handler is registered before the request leaves, so a fast reply is
/// never missed. It is released when this future completes or is dropped.
/// Partial assemblies expire after the transport's fragment window or
/// `timeout`, whichever is shorter.
pub async fn exchange(
    transport: &Transport,
    destination: SocketAddr,
    payload: &[u8],
    matcher: Matcher,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let window = transport.config().fragment_window.min(timeout);
    let mut subscription = AssembledSubscription::new(transport, matcher, window);
    transport.send(payload, destination)?;

    match subscription.recv_within(timeout).await? {
        Some((response, _)) => Ok(response),
        None => Err(Error::ResponseTimeout {
            target: destination.to_string(),
            timeout_ms: timeout.as_millis(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fragment::segment_payload;
    use crate::transport::udp::TransportConfig;
    use std::net::{Ipv4Addr, UdpSocket};

    fn started() -> Arc<Transport> {
        let transport = Transport::new(TransportConfig {
            listen_port: 0,
            broadcast_addresses: vec![Ipv4Addr::LOCALHOST],
            ..TransportConfig::default()
        });
        transport.start().unwrap();
        transport
    }

    fn loopback(transport: &Transport) -> SocketAddr {
        let port = transport.local_addr().unwrap().port();
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    #[tokio::test]
    async fn test_subscription_receives_and_unregisters_on_drop() {
        let transport = started();
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();

        {
            let mut sub = Subscription::new(&transport, Matcher::discovery());
            assert_eq!(transport.handler_count(), 1);
            peer.send_to(b"${}", loopback(&transport)).unwrap();
            let (data, src) = sub.recv_timeout(Duration::from_secs(2)).await.unwrap();
            assert_eq!(data, b"${}");
            assert_eq!(src, peer.local_addr().unwrap());
        }
        assert_eq!(transport.handler_count(), 0);
        transport.stop();
    }

    #[tokio::test]
    async fn test_exchange_reassembles_fragments() {
        let transport = started();
        let device = UdpSocket::bind("127.0.0.1:0").unwrap();
        let device_addr = device.local_addr().unwrap();
        let client = loopback(&transport);

        let payload: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
        let expected = payload.clone();
        let responder = std::thread::spawn(move || {
            let mut buf = [0u8; 512];
            let (_, from) = device.recv_from(&mut buf).unwrap();
            assert_eq!(from.port(), client.port());
            let mut parts = segment_payload(&payload, 7, 1000).unwrap();
            parts.reverse();
            for part in parts {
                device.send_to(&part, client).unwrap();
            }
        });

        let response = exchange(
            &transport,
            device_addr,
            b"request",
            Matcher::state().from_port(device_addr.port()),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        responder.join().unwrap();
        assert_eq!(response, expected);
        assert_eq!(transport.handler_count(), 0);
        transport.stop();
    }

    #[tokio::test]
    async fn test_exchange_timeout_releases_registration() {
        let transport = started();
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();

        let err = exchange(
            &transport,
            silent.local_addr().unwrap(),
            b"ping",
            Matcher::any(),
            Duration::from_millis(150),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::ResponseTimeout { timeout_ms: 150, .. }));
        assert_eq!(transport.handler_count(), 0);
        transport.stop();
    }
}
