pub mod registry;
pub mod subscription;
pub mod udp;

pub use registry::{Handler, HandlerId, Matcher, PacketKind, Registration, Registry};
pub use subscription::{exchange, AssembledSubscription, Subscription};
pub use udp::{Transport, TransportConfig};
