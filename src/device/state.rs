use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Display mode of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DeviceMode {
    Auto = 0,
    #[default]
    Scene = 1,
    Manual = 2,
}

impl TryFrom<u8> for DeviceMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(DeviceMode::Auto),
            1 => Ok(DeviceMode::Scene),
            2 => Ok(DeviceMode::Manual),
            other => Err(Error::InvalidParameter(format!("Unknown device mode: {}", other))),
        }
    }
}

impl From<DeviceMode> for u8 {
    fn from(mode: DeviceMode) -> u8 {
        mode as u8
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceMode::Auto => "AUTO",
            DeviceMode::Scene => "SCENE",
            DeviceMode::Manual => "MANUAL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneInfo {
    pub label: String,
    pub index: u32,
}

/// A user-facing effect that hides the underlying mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectInfo {
    /// `auto`, `scene:<index>` or `manual:<index>`
    pub id: String,
    pub display_name: String,
}

/// Hue and saturation of one mode, both in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PaletteState {
    pub hue: f32,
    pub saturation: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteRoutes {
    pub hue: Option<String>,
    pub saturation: Option<String>,
}

/// OSC routes a device advertises in its state. They differ per device and
/// firmware, so control is impossible until a state has been fetched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlRoutes {
    pub brightness: Option<String>,
    pub is_displaying: Option<String>,
    pub mode: Option<String>,
    pub active_scene_index: Option<String>,
    pub manual_animation_index: Option<String>,
    pub auto_palette: PaletteRoutes,
    pub scene_palette: PaletteRoutes,
    pub manual_palette: PaletteRoutes,
}

impl ControlRoutes {
    /// Power, brightness and mode routes are all known.
    pub fn is_complete(&self) -> bool {
        self.is_displaying.is_some() && self.brightness.is_some() && self.mode.is_some()
    }
}

/// Decoded view of a full-state payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceState {
    pub serial_number: Option<String>,
    pub model: Option<String>,
    pub nickname: Option<String>,
    pub firmware_version: Option<String>,
    pub is_on: bool,
    pub brightness: f32,
    pub mode: DeviceMode,
    pub rssi: i32,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub scenes: Vec<SceneInfo>,
    pub active_scene_index: u32,
    pub manual_animations: Vec<String>,
    pub active_manual_animation_index: u32,
    pub auto_palette: PaletteState,
    pub scene_palette: PaletteState,
    pub manual_palette: PaletteState,
    pub routes: ControlRoutes,
}

/// Animation id prefixes each model family can play.
const ANIMATION_MODEL_PREFIXES: &[(&str, &[&str])] = &[
    ("fluora", &["generic", "fluora", "fluora/audio"]),
    ("monos", &["generic", "monos"]),
];

/// `"fluora::Rainbow"` -> `"Rainbow"`
fn animation_display_name(animation_id: &str) -> &str {
    match animation_id.split_once("::") {
        Some((_, name)) => name,
        None => animation_id,
    }
}

fn is_animation_compatible(animation_id: &str, model: Option<&str>) -> bool {
    let Some(model) = model.filter(|m| !m.is_empty()) else {
        return true;
    };
    let Some((prefix, _)) = animation_id.split_once("::") else {
        return true;
    };

    let prefix = prefix.to_lowercase();
    let model = model.to_lowercase();
    for (family, allowed) in ANIMATION_MODEL_PREFIXES {
        if model.contains(*family) {
            return allowed.contains(&prefix.as_str());
        }
    }
    prefix == "generic"
}

impl DeviceState {
    fn active_palette(&self) -> &PaletteState {
        match self.mode {
            DeviceMode::Auto => &self.auto_palette,
            DeviceMode::Scene => &self.scene_palette,
            DeviceMode::Manual => &self.manual_palette,
        }
    }

    /// Hue of the active mode's palette.
    pub fn hue(&self) -> f32 {
        self.active_palette().hue
    }

    pub fn saturation(&self) -> f32 {
        self.active_palette().saturation
    }

    /// Every selectable effect: Auto, each scene, then each manual animation
    /// the model can play.
    pub fn effects(&self) -> Vec<EffectInfo> {
        let mut effects = vec![EffectInfo { id: "auto".into(), display_name: "Auto".into() }];

        effects.extend(self.scenes.iter().map(|scene| EffectInfo {
            id: format!("scene:{}", scene.index),
            display_name: format!("Scene: {}", scene.label),
        }));

        let model = self.model.as_deref();
        effects.extend(
            self.manual_animations
                .iter()
                .enumerate()
                .filter(|(_, id)| is_animation_compatible(id, model))
                .map(|(i, id)| EffectInfo {
                    id: format!("manual:{}", i),
                    display_name: animation_display_name(id).to_string(),
                }),
        );
        effects
    }

    pub fn effect_list(&self) -> Vec<String> {
        self.effects().into_iter().map(|e| e.display_name).collect()
    }

    pub fn current_effect(&self) -> Option<String> {
        match self.mode {
            DeviceMode::Auto => Some("Auto".into()),
            DeviceMode::Scene => self
                .scenes
                .iter()
                .find(|s| s.index == self.active_scene_index)
                .map(|s| format!("Scene: {}", s.label)),
            DeviceMode::Manual => self
                .manual_animations
                .get(self.active_manual_animation_index as usize)
                .map(|id| animation_display_name(id).to_string()),
        }
    }

    pub fn current_effect_id(&self) -> String {
        match self.mode {
            DeviceMode::Auto => "auto".into(),
            DeviceMode::Scene => format!("scene:{}", self.active_scene_index),
            DeviceMode::Manual => format!("manual:{}", self.active_manual_animation_index),
        }
    }
}

/// Turns a reassembled full-state payload into a [`DeviceState`].
///
/// The device encodes its state as a FlatBuffer; decoding it is left to the
/// embedder.
pub trait StateDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<DeviceState>;
}

impl<F> StateDecoder for F
where
    F: Fn(&[u8]) -> Result<DeviceState> + Send + Sync,
{
    fn decode(&self, payload: &[u8]) -> Result<DeviceState> {
        self(payload)
    }
}

/// Decodes states serialized as JSON. Handy for simulators and captures
/// converted offline.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStateDecoder;

impl StateDecoder for JsonStateDecoder {
    fn decode(&self, payload: &[u8]) -> Result<DeviceState> {
        Ok(serde_json::from_slice(payload)?)
    }
}
