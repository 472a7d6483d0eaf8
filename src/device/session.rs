use super::identity::{DeviceIdentity, ResolvedAddress};
use super::poller::PollState;
use super::state::DeviceState;
use crate::codec::{discovery_request, get_state_request, DiscoveryResponse, OscMessage};
use crate::discovery::{DiscoveryEngine, Resolver};
use crate::error::{Error, Result};
use crate::logging::device_tag;
use crate::runtime::config::ClientConfig;
use crate::transport::{exchange, Matcher, PacketKind, Transport};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Where a session stands with respect to its device's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No address known yet.
    Unresolved,
    /// Address known, no exchange has confirmed it.
    Resolved(ResolvedAddress),
    /// The last exchange at this address succeeded.
    Active(ResolvedAddress),
    /// An exchange at this address timed out; re-resolve before retrying.
    Stale(ResolvedAddress),
}

impl SessionState {
    pub fn address(&self) -> Option<ResolvedAddress> {
        match self {
            SessionState::Unresolved => None,
            SessionState::Resolved(a) | SessionState::Active(a) | SessionState::Stale(a) => Some(*a),
        }
    }

    /// Requests are only attempted in these states.
    pub fn is_usable(&self) -> bool {
        matches!(self, SessionState::Resolved(_) | SessionState::Active(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unresolved => write!(f, "unresolved"),
            SessionState::Resolved(a) => write!(f, "resolved ({})", a.ip),
            SessionState::Active(a) => write!(f, "active ({})", a.ip),
            SessionState::Stale(a) => write!(f, "stale ({})", a.ip),
        }
    }
}

/// A request a session can exchange with its device.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Unicast discovery; answered with serial and state counter.
    Discovery,
    /// Full state; answered with a possibly fragmented payload.
    GetState,
    /// Any other routed OSC message answered on the command port.
    Routed(OscMessage),
}

impl Request {
    fn encode(&self) -> Vec<u8> {
        match self {
            Request::Discovery => discovery_request(),
            Request::GetState => get_state_request(),
            Request::Routed(message) => message.encode(),
        }
    }

    fn port(&self, config: &ClientConfig) -> u16 {
        match self {
            Request::Discovery => config.discovery_port,
            Request::GetState | Request::Routed(_) => config.command_port,
        }
    }

    fn response_kind(&self) -> PacketKind {
        match self {
            Request::Discovery => PacketKind::Discovery,
            Request::GetState | Request::Routed(_) => PacketKind::State,
        }
    }
}

pub(super) struct SessionInner {
    pub(super) transport: Arc<Transport>,
    pub(super) engine: DiscoveryEngine,
    pub(super) resolver: Resolver,
    pub(super) identity: RwLock<DeviceIdentity>,
    pub(super) state: RwLock<SessionState>,
    pub(super) device_state: RwLock<Option<DeviceState>>,
    pub(super) poll: Mutex<PollState>,
    pub(super) poll_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    pub(super) cancelled: AtomicBool,
}

/// Handle to one physical device.
///
/// Clones share the same session. Address changes are never detected by a
/// timer: only a timed-out exchange marks the session stale, and only
/// [`resolve_ip`](Self::resolve_ip) binds it to a new address.
#[derive(Clone)]
pub struct DeviceSession {
    pub(super) inner: Arc<SessionInner>,
}

impl DeviceSession {
    pub fn new(identity: DeviceIdentity, resolver: Resolver) -> Self {
        Self::with_state(identity, resolver, SessionState::Unresolved)
    }

    /// A session bound to an address that is already known, e.g. from a scan.
    pub fn with_address(identity: DeviceIdentity, resolver: Resolver, address: ResolvedAddress) -> Self {
        Self::with_state(identity, resolver, SessionState::Resolved(address))
    }

    fn with_state(identity: DeviceIdentity, resolver: Resolver, state: SessionState) -> Self {
        let engine = resolver.engine().clone();
        DeviceSession {
            inner: Arc::new(SessionInner {
                transport: engine.transport().clone(),
                engine,
                resolver,
                identity: RwLock::new(identity),
                state: RwLock::new(state),
                device_state: RwLock::new(None),
                poll: Mutex::new(PollState::default()),
                poll_task: tokio::sync::Mutex::new(None),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.inner.identity.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn session_state(&self) -> SessionState {
        *self.inner.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// The last state fetched from the device, with optimistic updates from
    /// control commands applied.
    pub fn device_state(&self) -> Option<DeviceState> {
        self.inner.device_state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(super) fn config(&self) -> &ClientConfig {
        self.inner.engine.config()
    }

    pub(super) fn tag(&self) -> String {
        let identity = self.identity();
        device_tag(identity.serial_number(), self.session_state().address().map(|a| a.ip))
    }

    /// Replace the state only if it still refers to `expected`; a concurrent
    /// re-resolution wins over a late exchange outcome.
    fn transition_from(&self, expected: ResolvedAddress, next: SessionState) {
        let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
        if state.address() == Some(expected) && *state != next {
            log::debug!(target: "pixelair::session", "{} {} -> {}", self.tag_for(&state), *state, next);
            *state = next;
        }
    }

    fn tag_for(&self, state: &SessionState) -> String {
        let identity = self.identity();
        device_tag(identity.serial_number(), state.address().map(|a| a.ip))
    }

    /// Bind the session to the device's current address.
    ///
    /// On failure the state is left as it was.
    pub async fn resolve_ip(&self, timeout: Duration) -> Result<ResolvedAddress> {
        let identity = self.identity();
        let resolution = match self.inner.resolver.resolve(&identity, timeout).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!(target: "pixelair::session", "{} Resolve failed: {}", self.tag(), e);
                return Err(e);
            }
        };

        let previous = self.session_state().address();
        *self.inner.identity.write().unwrap_or_else(|e| e.into_inner()) = resolution.identity;
        *self.inner.state.write().unwrap_or_else(|e| e.into_inner()) = SessionState::Resolved(resolution.address);

        match previous {
            Some(old) if old.ip != resolution.address.ip => log::info!(
                target: "pixelair::session",
                "{} Address changed: {} -> {} ({:?})", self.tag(), old.ip, resolution.address.ip, resolution.address.source
            ),
            None => log::info!(
                target: "pixelair::session",
                "{} Resolved via {:?}", self.tag(), resolution.address.source
            ),
            _ => {}
        }
        Ok(resolution.address)
    }

    /// Exchange one request with the device.
    ///
    /// Success marks the session active; a timeout marks it stale and is
    /// returned as-is. Nothing is retried.
    pub async fn request(&self, request: &Request, timeout: Duration) -> Result<Vec<u8>> {
        let address = match self.session_state() {
            SessionState::Resolved(a) | SessionState::Active(a) => a,
            SessionState::Unresolved => return Err(Error::NotResolved("unresolved".into())),
            SessionState::Stale(a) => return Err(Error::NotResolved(format!("stale address {}", a.ip))),
        };

        let destination = SocketAddr::new(address.ip, request.port(self.config()));
        let matcher = Matcher { kind: Some(request.response_kind()), ..Matcher::default() }
            .from_ip(address.ip)
            .within(&self.inner.engine.scope());

        match exchange(&self.inner.transport, destination, &request.encode(), matcher, timeout).await {
            Ok(payload) => {
                self.transition_from(address, SessionState::Active(address));
                Ok(payload)
            }
            Err(e @ Error::ResponseTimeout { .. }) => {
                log::warn!(target: "pixelair::session", "{} {}", self.tag(), e);
                self.transition_from(address, SessionState::Stale(address));
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch and decode the full state. The result replaces the cached state
    /// and with it the known control routes.
    pub async fn fetch_state(&self, timeout: Duration) -> Result<DeviceState> {
        let decoder = self
            .inner
            .engine
            .decoder()
            .cloned()
            .ok_or_else(|| Error::InvalidParameter("no state decoder configured".into()))?;

        let payload = self.request(&Request::GetState, timeout).await?;
        let state = decoder.decode(&payload)?;
        *self.inner.device_state.write().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        log::debug!(target: "pixelair::session", "{} State updated ({} bytes)", self.tag(), payload.len());
        Ok(state)
    }

    /// The device's state counter, read with a unicast discovery request.
    pub async fn fetch_counter(&self, timeout: Duration) -> Result<u64> {
        let payload = self.request(&Request::Discovery, timeout).await?;
        let response = DiscoveryResponse::parse(&payload)?;

        let identity = self.identity();
        match identity.serial_number() {
            Some(serial) if serial != response.serial_number => {
                // Another device now holds this address
                if let Some(address) = self.session_state().address() {
                    self.transition_from(address, SessionState::Stale(address));
                }
                log::warn!(
                    target: "pixelair::session",
                    "{} Address answered as {}", self.tag(), response.serial_number
                );
                return Err(Error::DeviceNotFound(format!("serial {}", serial)));
            }
            Some(_) => {}
            None => {
                *self.inner.identity.write().unwrap_or_else(|e| e.into_inner()) =
                    identity.with_serial(&response.serial_number);
            }
        }
        Ok(response.state_counter)
    }

    pub(super) fn update_device_state<F: FnOnce(&mut DeviceState)>(&self, update: F) {
        if let Some(state) = self.inner.device_state.write().unwrap_or_else(|e| e.into_inner()).as_mut() {
            update(state);
        }
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("identity", &self.identity())
            .field("state", &self.session_state())
            .finish()
    }
}
