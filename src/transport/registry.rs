use crate::codec::discovery::is_discovery_response;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Coarse classification of an inbound datagram by its leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// `'$'`-prefixed discovery response
    Discovery,
    /// Anything else: full-state payloads, single or fragmented
    State,
}

impl PacketKind {
    pub fn classify(datagram: &[u8]) -> Self {
        if is_discovery_response(datagram) {
            PacketKind::Discovery
        } else {
            PacketKind::State
        }
    }
}

/// Decides which inbound datagrams a handler sees. Unset fields match anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Matcher {
    pub source_ip: Option<IpAddr>,
    pub source_port: Option<u16>,
    pub kind: Option<PacketKind>,
}

impl Matcher {
    pub fn any() -> Self {
        Matcher::default()
    }

    pub fn discovery() -> Self {
        Matcher { kind: Some(PacketKind::Discovery), ..Matcher::default() }
    }

    pub fn state() -> Self {
        Matcher { kind: Some(PacketKind::State), ..Matcher::default() }
    }

    pub fn from_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    pub fn from_port(mut self, port: u16) -> Self {
        self.source_port = Some(port);
        self
    }

    /// Narrow `self` with every field `scope` sets.
    pub fn within(mut self, scope: &Matcher) -> Self {
        if scope.source_ip.is_some() {
            self.source_ip = scope.source_ip;
        }
        if scope.source_port.is_some() {
            self.source_port = scope.source_port;
        }
        if scope.kind.is_some() {
            self.kind = scope.kind;
        }
        self
    }

    pub fn accepts(&self, datagram: &[u8], source: SocketAddr) -> bool {
        if let Some(ip) = self.source_ip {
            if ip != source.ip() {
                return false;
            }
        }
        if let Some(port) = self.source_port {
            if port != source.port() {
                return false;
            }
        }
        match self.kind {
            Some(kind) => PacketKind::classify(datagram) == kind,
            None => true,
        }
    }
}

/// Stable handle of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Invoked on the dispatcher thread; must not block.
pub type Handler = Arc<dyn Fn(&[u8], SocketAddr) + Send + Sync>;

#[derive(Clone)]
struct Entry {
    id: HandlerId,
    matcher: Matcher,
    handler: Handler,
}

/// Matcher -> handler table shared by the dispatcher and every consumer.
///
/// Copy-on-write: dispatch works on an immutable snapshot, so a datagram is
/// never delivered twice to one handler and a registration made mid-dispatch
/// takes effect from the next datagram on.
pub struct Registry {
    next_id: AtomicU64,
    entries: RwLock<Arc<Vec<Entry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { next_id: AtomicU64::new(1), entries: RwLock::new(Arc::new(Vec::new())) }
    }

    pub fn insert(&self, matcher: Matcher, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut next: Vec<Entry> = entries.iter().cloned().collect();
        next.push(Entry { id, matcher, handler });
        *entries = Arc::new(next);
        id
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if !entries.iter().any(|e| e.id == id) {
            return false;
        }
        let next: Vec<Entry> = entries.iter().filter(|e| e.id != id).cloned().collect();
        *entries = Arc::new(next);
        true
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        *entries = Arc::new(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<Vec<Entry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Deliver one datagram to every accepting handler. Returns the fan-out.
    pub fn dispatch(&self, datagram: &[u8], source: SocketAddr) -> usize {
        let snapshot = self.snapshot();
        let mut delivered = 0;
        for entry in snapshot.iter() {
            if entry.matcher.accepts(datagram, source) {
                (entry.handler)(datagram, source);
                delivered += 1;
            }
        }
        delivered
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a handler registered until dropped or explicitly released.
pub struct Registration {
    id: HandlerId,
    registry: Weak<Registry>,
}

impl Registration {
    pub(crate) fn new(id: HandlerId, registry: &Arc<Registry>) -> Self {
        Registration { id, registry: Arc::downgrade(registry) }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn src(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, Arc::new(move |_: &[u8], _: SocketAddr| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_matcher_fields() {
        let m = Matcher::discovery().from_ip("10.0.0.5".parse().unwrap());
        assert!(m.accepts(b"${}", src("10.0.0.5:9090")));
        assert!(!m.accepts(b"${}", src("10.0.0.6:9090")));
        assert!(!m.accepts(b"F\x01\x00\x01", src("10.0.0.5:9090")));

        let m = Matcher::any().from_port(4000);
        assert!(m.accepts(b"anything", src("1.2.3.4:4000")));
        assert!(!m.accepts(b"anything", src("1.2.3.4:4001")));

        assert!(Matcher::state().accepts(b"", src("1.2.3.4:1")));
    }

    #[test]
    fn test_within_narrows() {
        let scope = Matcher::any().from_port(5000);
        let m = Matcher::discovery().within(&scope);
        assert_eq!(m.kind, Some(PacketKind::Discovery));
        assert_eq!(m.source_port, Some(5000));
        assert_eq!(m.source_ip, None);
    }

    #[test]
    fn test_fan_out_to_all_matching() {
        let registry = Registry::new();
        let (a, ha) = counter();
        let (b, hb) = counter();
        let (c, hc) = counter();
        registry.insert(Matcher::discovery(), ha);
        registry.insert(Matcher::any(), hb);
        registry.insert(Matcher::state(), hc);

        assert_eq!(registry.dispatch(b"${}", src("10.0.0.1:1")), 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(c.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_and_registration_drop() {
        let registry = Arc::new(Registry::new());
        let (count, handler) = counter();
        let id = registry.insert(Matcher::any(), handler.clone());
        assert!(registry.remove(id));
        assert!(!registry.remove(id));

        let id = registry.insert(Matcher::any(), handler);
        {
            let _guard = Registration::new(id, &registry);
            registry.dispatch(b"x", src("1.1.1.1:1"));
        }
        assert!(registry.is_empty());
        registry.dispatch(b"x", src("1.1.1.1:1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registration_during_dispatch_sees_next_datagram() {
        let registry = Arc::new(Registry::new());
        let (late_count, late_handler) = counter();
        let pending = Arc::new(Mutex::new(Some(late_handler)));

        let reg = registry.clone();
        let adder: Handler = Arc::new(move |_: &[u8], _: SocketAddr| {
            if let Some(h) = pending.lock().unwrap().take() {
                reg.insert(Matcher::any(), h);
            }
        });
        registry.insert(Matcher::any(), adder);

        // The handler added mid-dispatch is not part of this snapshot
        assert_eq!(registry.dispatch(b"first", src("1.1.1.1:1")), 1);
        assert_eq!(late_count.load(Ordering::SeqCst), 0);

        assert_eq!(registry.dispatch(b"second", src("1.1.1.1:1")), 2);
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_during_dispatch_is_consistent() {
        let registry = Arc::new(Registry::new());
        let (count, handler) = counter();
        let victim = registry.insert(Matcher::any(), handler);

        let reg = registry.clone();
        let remover: Handler = Arc::new(move |_: &[u8], _: SocketAddr| {
            reg.remove(victim);
        });
        // Registered after the victim, so the victim runs first on this pass.
        registry.insert(Matcher::any(), remover);

        registry.dispatch(b"one", src("1.1.1.1:1"));
        registry.dispatch(b"two", src("1.1.1.1:1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
