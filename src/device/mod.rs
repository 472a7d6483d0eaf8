//! # Device Sessions
//!
//! A [`DeviceSession`] is the long-lived handle an application keeps per
//! physical device. It carries the device's [`DeviceIdentity`], tracks the
//! address it was last reached at, and exposes state polling and control.
//!
//! ## Lifecycle
//!
//! 1. `Unresolved` until [`DeviceSession::resolve_ip`] succeeds
//! 2. `Resolved` / `Active` while exchanges succeed
//! 3. `Stale` after a timed-out exchange; `resolve_ip` again to recover

pub mod identity;
pub mod state;
pub mod session;
pub mod poller;
pub mod control;

pub use identity::{AddressSource, DeviceIdentity, HardwareAddress, ResolvedAddress};
pub use state::{
    ControlRoutes, DeviceMode, DeviceState, EffectInfo, JsonStateDecoder, PaletteRoutes, PaletteState,
    SceneInfo, StateDecoder,
};
pub use session::{DeviceSession, Request, SessionState};
pub use poller::{ListenerId, StateListener};
