//! # Device Discovery
//!
//! Finding PixelAir devices on the local network and keeping a logical
//! device bound to its current address.
//!
//! ## Key Types
//!
//! - [`DiscoveryEngine`] - broadcast scans, targeted lookups, continuous mode
//! - [`Resolver`] - identity to address, neighbour table first
//! - [`DiscoveredDevice`] - one scan record
//!
//! ## Example
//!
//! ```ignore
//! let engine = DiscoveryEngine::new(transport, config, Arc::new(SystemArpTable));
//! for device in engine.scan(Duration::from_secs(5)).await? {
//!     println!("{} at {}", device.serial_number, device.ip_address);
//! }
//! ```

pub mod engine;
pub mod resolver;

pub use engine::{ContinuousDiscovery, DiscoveredDevice, DiscoveryEngine};
pub use resolver::{Resolution, Resolver};
