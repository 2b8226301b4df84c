//! Messages exchanged with the iron-pi driver
//!
//! Field names are camelCase on the wire so the driver sees the same shapes
//! regardless of which codec is plugged in.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// Message for an `outputs` field of the wrong shape
pub const OUTPUTS_SHAPE: &str =
    "outputs property must be an array of objects with the format {address: number, levels: Array<boolean>}";

/// Message for a `leds` field of the wrong shape
pub const LEDS_SHAPE: &str = "leds property must be an array of objects with the format \
     {address: number, colors: string, onTime: number, offTime: number, idleTime: number}";

/// A device found on the bus during hardware detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedDevice {
    pub address: u8,
    /// Model identifier reported by the driver (e.g. "iron-pi-io16")
    pub model: String,
}

/// Snapshot of the hardware the driver has detected
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareInfo {
    pub devices: Vec<DetectedDevice>,
}

/// Input channel values of a single device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInputState {
    pub address: u8,
    #[serde(default)]
    pub digital_inputs: Vec<bool>,
    #[serde(default)]
    pub digital_input_event_counts: Vec<u32>,
    #[serde(default)]
    pub analog_inputs: Vec<f64>,
}

/// Point-in-time report of input values across devices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInputStates {
    pub inputs: Vec<DeviceInputState>,
}

/// Desired output levels of a single device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceOutputState {
    pub address: u8,
    pub levels: Vec<bool>,
}

/// Command setting the outputs of one or more devices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOutputs {
    pub outputs: Vec<DeviceOutputState>,
}

impl SetOutputs {
    /// Build a command from an untyped JSON value
    ///
    /// Rejects a missing or non-array `outputs` field, or any element that is
    /// not an object, with [`ClientError::InvalidArgument`].
    pub fn from_value(value: Value) -> Result<Self, ClientError> {
        require_records(&value, "outputs", OUTPUTS_SHAPE)?;
        serde_json::from_value(value).map_err(|e| ClientError::InvalidArgument {
            message: format!("{}: {}", OUTPUTS_SHAPE, e),
        })
    }
}

/// Blink pattern for the LEDs of a single device
///
/// `colors` is a sequence of color letters the pattern cycles through;
/// times are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedCommand {
    pub address: u8,
    pub colors: String,
    pub on_time: u32,
    pub off_time: u32,
    pub idle_time: u32,
}

/// Command setting LED patterns on one or more devices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLeds {
    pub leds: Vec<LedCommand>,
}

impl SetLeds {
    /// Build a command from an untyped JSON value
    ///
    /// Rejects a missing or non-array `leds` field, or any element that is
    /// not an object, with [`ClientError::InvalidArgument`].
    pub fn from_value(value: Value) -> Result<Self, ClientError> {
        require_records(&value, "leds", LEDS_SHAPE)?;
        serde_json::from_value(value).map_err(|e| ClientError::InvalidArgument {
            message: format!("{}: {}", LEDS_SHAPE, e),
        })
    }
}

/// A decoded notification from the driver
///
/// Either, both or neither payload may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFromDriver {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_info: Option<HardwareInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_input_states: Option<DeviceInputStates>,
}

fn require_records(value: &Value, field: &str, shape: &str) -> Result<(), ClientError> {
    match value.get(field) {
        Some(Value::Array(items)) if items.iter().all(Value::is_object) => Ok(()),
        _ => Err(ClientError::InvalidArgument {
            message: shape.to_string(),
        }),
    }
}
