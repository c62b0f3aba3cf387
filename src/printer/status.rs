// src/printer/status.rs
//! Typed status snapshot and the merge that folds pushed fragments into it.
//!
//! Every leaf is optional: a field missing from a fragment keeps the value it
//! already had, a present field replaces it. A leaf of the wrong type counts
//! as missing. Arrays (the gcode position) are replaced as a whole.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Objects requested from `printer.objects.subscribe`.
pub fn subscription_objects() -> Value {
    serde_json::json!({
        "objects": {
            "print_stats": null,
            "display_status": null,
            "virtual_sdcard": ["file_position", "progress"],
            "gcode_move": ["gcode_position"],
            "toolhead": ["estimated_print_time"],
            "extruder": ["temperature", "target"],
            "heater_bed": ["temperature", "target"],
        }
    })
}

/// Decode one leaf, reading a value of the wrong type as absent so the rest of
/// its section still applies.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn take_newer<T>(current: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *current = incoming;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintStatsInfo {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub total_layer: Option<u32>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub current_layer: Option<u32>,
}

impl PrintStatsInfo {
    fn merge(&mut self, other: PrintStatsInfo) {
        take_newer(&mut self.total_layer, other.total_layer);
        take_newer(&mut self.current_layer, other.current_layer);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintStats {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub print_duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub filament_used: Option<f64>,
    /// standby, printing, paused, complete, cancelled or error.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub info: Option<PrintStatsInfo>,
}

impl PrintStats {
    fn merge(&mut self, other: PrintStats) {
        take_newer(&mut self.filename, other.filename);
        take_newer(&mut self.total_duration, other.total_duration);
        take_newer(&mut self.print_duration, other.print_duration);
        take_newer(&mut self.filament_used, other.filament_used);
        take_newer(&mut self.state, other.state);
        take_newer(&mut self.message, other.message);
        if let Some(info) = other.info {
            self.info.get_or_insert_with(Default::default).merge(info);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayStatus {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DisplayStatus {
    fn merge(&mut self, other: DisplayStatus) {
        take_newer(&mut self.progress, other.progress);
        take_newer(&mut self.message, other.message);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualSdCard {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub file_position: Option<u64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl VirtualSdCard {
    fn merge(&mut self, other: VirtualSdCard) {
        take_newer(&mut self.file_position, other.file_position);
        take_newer(&mut self.progress, other.progress);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GcodeMove {
    /// X, Y, Z, E.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub gcode_position: Option<Vec<f64>>,
}

impl GcodeMove {
    fn merge(&mut self, other: GcodeMove) {
        take_newer(&mut self.gcode_position, other.gcode_position);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Toolhead {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub estimated_print_time: Option<f64>,
}

impl Toolhead {
    fn merge(&mut self, other: Toolhead) {
        take_newer(&mut self.estimated_print_time, other.estimated_print_time);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaterStatus {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
}

impl HeaterStatus {
    fn merge(&mut self, other: HeaterStatus) {
        take_newer(&mut self.temperature, other.temperature);
        take_newer(&mut self.target, other.target);
    }
}

/// Last known state of every subscribed subsystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_stats: Option<PrintStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_status: Option<DisplayStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_sdcard: Option<VirtualSdCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcode_move: Option<GcodeMove>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolhead: Option<Toolhead>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extruder: Option<HeaterStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heater_bed: Option<HeaterStatus>,
}

macro_rules! merge_section {
    ($self:ident, $other:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(section) = $other.$field {
                $self.$field.get_or_insert_with(Default::default).merge(section);
            }
        )+
    };
}

/// Parse one subsystem, tolerating a malformed section by skipping it.
fn section<T: DeserializeOwned>(raw: &serde_json::Map<String, Value>, key: &str) -> Option<T> {
    let value = raw.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::debug!("Ignoring malformed '{}' status section: {}", key, e);
            None
        }
    }
}

impl StatusSnapshot {
    /// Decode a pushed fragment. Unknown subsystems are ignored and a section
    /// that does not fit its schema is skipped instead of failing the whole
    /// fragment.
    pub fn from_fragment(fragment: &Value) -> StatusSnapshot {
        let Some(raw) = fragment.as_object() else {
            return StatusSnapshot::default();
        };
        StatusSnapshot {
            print_stats: section(raw, "print_stats"),
            display_status: section(raw, "display_status"),
            virtual_sdcard: section(raw, "virtual_sdcard"),
            gcode_move: section(raw, "gcode_move"),
            toolhead: section(raw, "toolhead"),
            extruder: section(raw, "extruder"),
            heater_bed: section(raw, "heater_bed"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == StatusSnapshot::default()
    }

    /// Fold `fragment` into this snapshot in place.
    pub fn merge(&mut self, fragment: StatusSnapshot) {
        merge_section!(
            self,
            fragment,
            print_stats,
            display_status,
            virtual_sdcard,
            gcode_move,
            toolhead,
            extruder,
            heater_bed,
        );
    }

    /// Non-destructive form of [`StatusSnapshot::merge`].
    pub fn merged(&self, fragment: StatusSnapshot) -> StatusSnapshot {
        let mut next = self.clone();
        next.merge(fragment);
        next
    }

    /// Active file name, `None` when nothing is loaded.
    pub fn filename(&self) -> Option<&str> {
        self.print_stats
            .as_ref()
            .and_then(|stats| stats.filename.as_deref())
            .filter(|name| !name.is_empty())
    }

    pub fn print_state(&self) -> Option<&str> {
        self.print_stats.as_ref().and_then(|stats| stats.state.as_deref())
    }
}
