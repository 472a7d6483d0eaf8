//! Fire-and-forget control commands.
//!
//! Every command is an OSC message to the control port on a route the
//! device advertised in its last fetched state, with `[value, 0]` arguments.
//! The cached state is updated optimistically; the next poll corrects it.

use super::session::DeviceSession;
use super::state::{ControlRoutes, DeviceMode};
use crate::codec::{OscArg, OscMessage};
use crate::error::{Error, Result};
use std::net::SocketAddr;

fn missing_route(what: &str) -> Error {
    Error::InvalidParameter(format!(
        "{} control route not available; fetch the device state first",
        what
    ))
}

impl DeviceSession {
    fn routes(&self) -> ControlRoutes {
        self.device_state().map(|s| s.routes).unwrap_or_default()
    }

    /// Power, brightness and mode routes are all known.
    pub fn has_control_routes(&self) -> bool {
        self.routes().is_complete()
    }

    fn send_control(&self, route: &str, value: OscArg) -> Result<()> {
        let address = match self.session_state().address() {
            Some(a) if self.session_state().is_usable() => a,
            _ => return Err(Error::NotResolved(self.session_state().to_string())),
        };
        let message = OscMessage::new(route).with_arg(value).with_arg(OscArg::Int(0));
        let destination = SocketAddr::new(address.ip, self.config().control_port);
        self.inner.transport.send(&message.encode(), destination)?;
        log::debug!(target: "pixelair::control", "{} Sent {} to {}", self.tag(), route, destination);
        Ok(())
    }

    pub fn turn_on(&self) -> Result<()> {
        self.set_power(true)
    }

    pub fn turn_off(&self) -> Result<()> {
        self.set_power(false)
    }

    fn set_power(&self, on: bool) -> Result<()> {
        let route = self.routes().is_displaying.ok_or_else(|| missing_route("Power"))?;
        self.send_control(&route, OscArg::Int(on as i32))?;
        self.update_device_state(|s| s.is_on = on);
        log::info!(target: "pixelair::control", "{} Set power to {}", self.tag(), if on { "ON" } else { "OFF" });
        Ok(())
    }

    /// `brightness` in `0.0..=1.0`, sent rounded to two decimals.
    pub fn set_brightness(&self, brightness: f32) -> Result<()> {
        let route = self.routes().brightness.ok_or_else(|| missing_route("Brightness"))?;
        if !(0.0..=1.0).contains(&brightness) {
            return Err(Error::InvalidParameter(format!(
                "Brightness must be between 0.0 and 1.0, got {}",
                brightness
            )));
        }
        let brightness = (brightness * 100.0).round() / 100.0;
        self.send_control(&route, OscArg::Float(brightness))?;
        self.update_device_state(|s| s.brightness = brightness);
        log::info!(target: "pixelair::control", "{} Set brightness to {:.0}%", self.tag(), brightness * 100.0);
        Ok(())
    }

    pub fn set_mode(&self, mode: DeviceMode) -> Result<()> {
        let route = self.routes().mode.ok_or_else(|| missing_route("Mode"))?;
        self.send_control(&route, OscArg::Int(u8::from(mode) as i32))?;
        self.update_device_state(|s| s.mode = mode);
        log::info!(target: "pixelair::control", "{} Set mode to {}", self.tag(), mode);
        Ok(())
    }

    /// Select an effect by id: `auto`, `scene:<index>` or `manual:<index>`.
    pub fn set_effect(&self, effect_id: &str) -> Result<()> {
        if effect_id == "auto" {
            return self.set_mode(DeviceMode::Auto);
        }
        if let Some(index) = effect_id.strip_prefix("scene:") {
            let index = index
                .parse()
                .map_err(|_| Error::InvalidParameter(format!("Invalid scene effect ID: {}", effect_id)))?;
            return self.select(DeviceMode::Scene, index);
        }
        if let Some(index) = effect_id.strip_prefix("manual:") {
            let index = index
                .parse()
                .map_err(|_| Error::InvalidParameter(format!("Invalid manual effect ID: {}", effect_id)))?;
            return self.select(DeviceMode::Manual, index);
        }
        Err(Error::InvalidParameter(format!("Unknown effect ID: {}", effect_id)))
    }

    /// Select an effect by its display name, as listed in
    /// [`DeviceState::effect_list`](super::state::DeviceState::effect_list).
    pub fn set_effect_by_name(&self, display_name: &str) -> Result<()> {
        let effect = self
            .device_state()
            .unwrap_or_default()
            .effects()
            .into_iter()
            .find(|e| e.display_name == display_name)
            .ok_or_else(|| Error::InvalidParameter(format!("Unknown effect: {}", display_name)))?;
        self.set_effect(&effect.id)
    }

    /// Switch to `mode` if needed, then set its scene/animation index.
    fn select(&self, mode: DeviceMode, index: u32) -> Result<()> {
        let routes = self.routes();
        let mode_route = routes.mode.ok_or_else(|| missing_route("Mode"))?;
        let index_route = match mode {
            DeviceMode::Scene => routes.active_scene_index.ok_or_else(|| missing_route("Scene index"))?,
            DeviceMode::Manual => routes.manual_animation_index.ok_or_else(|| missing_route("Manual animation index"))?,
            DeviceMode::Auto => return self.set_mode(DeviceMode::Auto),
        };
        let index_arg = i32::try_from(index)
            .map_err(|_| Error::InvalidParameter(format!("Effect index out of range: {}", index)))?;

        if self.device_state().map(|s| s.mode) != Some(mode) {
            self.send_control(&mode_route, OscArg::Int(u8::from(mode) as i32))?;
            self.update_device_state(|s| s.mode = mode);
        }
        self.send_control(&index_route, OscArg::Int(index_arg))?;
        self.update_device_state(|s| match mode {
            DeviceMode::Scene => s.active_scene_index = index,
            _ => s.active_manual_animation_index = index,
        });
        log::info!(target: "pixelair::control", "{} Set {} index to {}", self.tag(), mode, index);
        Ok(())
    }
}
