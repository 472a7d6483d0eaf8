pub mod arp;
pub mod codec;
pub mod device;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod transport;

pub use arp::{HardwareAddressLookup, StaticArpTable, SystemArpTable};
pub use codec::{DiscoveryResponse, FragmentReassembler, OscArg, OscMessage};
pub use device::{
    AddressSource, ControlRoutes, DeviceIdentity, DeviceMode, DeviceSession, DeviceState, EffectInfo,
    HardwareAddress, JsonStateDecoder, ListenerId, Request, ResolvedAddress, SceneInfo, SessionState,
    StateDecoder, StateListener,
};
pub use discovery::{ContinuousDiscovery, DiscoveredDevice, DiscoveryEngine, Resolution, Resolver};
pub use error::{Error, Result};
pub use runtime::{ClientConfig, PixelAirRuntime};
pub use transport::{Matcher, PacketKind, Transport};
