//! Logging setup.
//!
//! The library logs through the `log` facade under the `pixelair` target
//! hierarchy (`pixelair::transport`, `pixelair::discovery`, ...). Binaries and
//! tests install `env_logger` through the helpers below; `RUST_LOG` always
//! wins over the default filter.

use env_logger::{Builder, Env};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "pixelair=info";

/// Install `env_logger` with `default_filter` as the fallback.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_filter: &str) {
    let _ = Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}

/// Install `env_logger` with [`DEFAULT_FILTER`].
pub fn init_from_env() {
    init(DEFAULT_FILTER);
}

/// Log prefix used for per-device messages.
pub(crate) fn device_tag(serial: Option<&str>, ip: Option<std::net::IpAddr>) -> String {
    match (serial, ip) {
        (Some(s), _) => format!("[{}]", s),
        (None, Some(ip)) => format!("[{}]", ip),
        (None, None) => "[unresolved]".to_string(),
    }
}
