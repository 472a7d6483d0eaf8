use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Marker byte opening every fragment ('F').
pub const FRAGMENT_MARKER: u8 = 0x46;

/// Fragment header (4 bytes), followed by the part body.
/// Layout:
/// - Marker: 1 byte (0x46)
/// - Transaction key: 1 byte
/// - Part index: 1 byte (0-based)
/// - Total parts: 1 byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentHeader {
    pub transaction: u8,
    pub index: u8,
    pub total: u8,
}

impl FragmentHeader {
    pub const HEADER_LENGTH: usize = 4;

    pub fn new(transaction: u8, index: u8, total: u8) -> Self {
        FragmentHeader { transaction, index, total }
    }

    pub fn serialize(&self) -> [u8; 4] {
        [FRAGMENT_MARKER, self.transaction, self.index, self.total]
    }

    /// `None` when the datagram carries no fragment header.
    pub fn parse(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < Self::HEADER_LENGTH || buffer[0] != FRAGMENT_MARKER {
            return None;
        }
        Some(FragmentHeader { transaction: buffer[1], index: buffer[2], total: buffer[3] })
    }

    fn is_valid(&self) -> bool {
        self.total > 0 && self.index < self.total
    }
}

/// Split a payload into marked fragments of at most `max_body` bytes each.
///
/// The header counts parts in one byte, so a payload needing more than 255
/// parts is `InvalidParameter`.
pub fn segment_payload(payload: &[u8], transaction: u8, max_body: usize) -> Result<Vec<Vec<u8>>> {
    let max_body = max_body.max(1);
    let mut chunks: Vec<&[u8]> = payload.chunks(max_body).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }
    let total = u8::try_from(chunks.len()).map_err(|_| {
        Error::InvalidParameter(format!(
            "payload of {} bytes needs {} fragments of {} bytes, at most {} allowed",
            payload.len(),
            chunks.len(),
            max_body,
            u8::MAX
        ))
    })?;

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut datagram = FragmentHeader::new(transaction, i as u8, total).serialize().to_vec();
            datagram.extend_from_slice(chunk);
            datagram
        })
        .collect())
}

/// Outcome of feeding one datagram to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// A whole payload is ready.
    Complete(Vec<u8>),
    /// Stored, more parts outstanding.
    Pending,
    /// Dropped as malformed; it does not count toward any assembly.
    Dropped,
}

/// Accumulator for one (origin, transaction) pair.
#[derive(Debug)]
struct FragmentAssembly {
    expected_parts: u8,
    parts: BTreeMap<u8, Vec<u8>>,
    first_seen: Instant,
    last_activity: Instant,
}

impl FragmentAssembly {
    fn is_complete(&self) -> bool {
        self.parts.len() == self.expected_parts as usize
    }

    fn concat(self) -> Vec<u8> {
        let size = self.parts.values().map(Vec::len).sum();
        let mut buffer = Vec::with_capacity(size);
        // BTreeMap iterates in index order regardless of arrival order
        for (_, data) in self.parts {
            buffer.extend_from_slice(&data);
        }
        buffer
    }
}

/// Reassembles fragmented payloads.
/// Key: (origin address, transaction key). Partial assemblies that see no
/// new part within `window` are discarded and never emitted.
pub struct FragmentReassembler {
    window: Duration,
    assemblies: HashMap<(SocketAddr, u8), FragmentAssembly>,
}

impl FragmentReassembler {
    pub fn new(window: Duration) -> Self {
        FragmentReassembler { window, assemblies: HashMap::new() }
    }

    pub fn accept(&mut self, datagram: &[u8], origin: SocketAddr) -> Reassembly {
        self.accept_at(datagram, origin, Instant::now())
    }

    /// Process a datagram observed at `now`.
    pub fn accept_at(&mut self, datagram: &[u8], origin: SocketAddr, now: Instant) -> Reassembly {
        self.prune(now);

        let header = match FragmentHeader::parse(datagram) {
            Some(h) => h,
            None => return Reassembly::Complete(datagram.to_vec()),
        };

        if !header.is_valid() {
            log::debug!(
                target: "pixelair::fragment",
                "dropping fragment {}/{} (txn {}) from {}: index out of range",
                header.index, header.total, header.transaction, origin
            );
            return Reassembly::Dropped;
        }

        let key = (origin, header.transaction);
        let body = datagram[FragmentHeader::HEADER_LENGTH..].to_vec();

        let assembly = self.assemblies.entry(key).or_insert_with(|| FragmentAssembly {
            expected_parts: header.total,
            parts: BTreeMap::new(),
            first_seen: now,
            last_activity: now,
        });

        if assembly.expected_parts != header.total {
            log::debug!(
                target: "pixelair::fragment",
                "dropping fragment from {} (txn {}): total {} disagrees with {}",
                origin, header.transaction, header.total, assembly.expected_parts
            );
            return Reassembly::Dropped;
        }

        // Duplicates overwrite
        assembly.parts.insert(header.index, body);
        assembly.last_activity = now;

        if !assembly.is_complete() {
            return Reassembly::Pending;
        }

        match self.assemblies.remove(&key) {
            Some(done) => {
                log::trace!(
                    target: "pixelair::fragment",
                    "assembled {} parts from {} (txn {}) in {:?}",
                    done.expected_parts, origin, header.transaction, now.duration_since(done.first_seen)
                );
                Reassembly::Complete(done.concat())
            }
            None => Reassembly::Pending,
        }
    }

    /// Drop every assembly idle for longer than the window.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.assemblies.retain(|(origin, txn), assembly| {
            let keep = now.saturating_duration_since(assembly.last_activity) <= window;
            if !keep {
                log::debug!(
                    target: "pixelair::fragment",
                    "discarding incomplete payload from {} (txn {}): {}/{} parts",
                    origin, txn, assembly.parts.len(), assembly.expected_parts
                );
            }
            keep
        });
    }

    pub fn pending(&self) -> usize {
        self.assemblies.len()
    }
}
