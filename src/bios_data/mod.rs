// Data structures exchanged with the HP BIOS through the GPU power commands
pub mod codec;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::FirmwareError;

// Custom Total Graphics Power (TGP) limit
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomTgp {
    Off = 0x00,
    On = 0x01,
}

// Processing Power AI Boost (PPAB)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AiBoost {
    Off = 0x00,
    On = 0x01,
}

// GPU device power state, as defined by the BIOS D-notify states
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    D1 = 0x01,
    D2 = 0x02,
    D3 = 0x03,
    D4 = 0x04,
    D5 = 0x05,
}

impl DeviceState {
    pub const ALL: [DeviceState; 5] = [
        DeviceState::D1,
        DeviceState::D2,
        DeviceState::D3,
        DeviceState::D4,
        DeviceState::D5,
    ];
}

/// GPU power settings as laid out by the BIOS.
///
/// The wire form is exactly [`codec::GPU_POWER_DATA_SIZE`] bytes, one per
/// field in declaration order. See [`codec::encode`] and [`codec::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuPowerConfig {
    pub custom_tgp: CustomTgp,
    pub ai_boost: AiBoost,
    pub device_state: DeviceState,

    // Sensor threshold in degrees Celsius, 0 leaves the BIOS default
    pub peak_temperature: u8,
}

/// GPU power presets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuPowerLevel {
    Minimum = 0x00,
    Medium = 0x01,
    Maximum = 0x02,
}

impl GpuPowerConfig {
    // Build the GPU power settings matching a preset
    pub fn from_preset(level: GpuPowerLevel) -> Self {
        let custom_tgp = if level == GpuPowerLevel::Minimum {
            CustomTgp::Off
        } else {
            CustomTgp::On
        };

        let ai_boost = if level == GpuPowerLevel::Maximum {
            AiBoost::On
        } else {
            AiBoost::Off
        };

        Self {
            custom_tgp,
            ai_boost,
            device_state: DeviceState::D1,
            peak_temperature: 0,
        }
    }
}

impl From<GpuPowerLevel> for GpuPowerConfig {
    fn from(level: GpuPowerLevel) -> Self {
        Self::from_preset(level)
    }
}

impl fmt::Display for GpuPowerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let threshold = match self.peak_temperature {
            0 => "default".to_string(),
            t => format!("{t} °C"),
        };

        write!(
            f,
            "custom TGP: {:?}, AI boost: {:?}, device state: {:?}, \
             peak temperature: {}",
            self.custom_tgp, self.ai_boost, self.device_state, threshold
        )
    }
}

impl fmt::Display for GpuPowerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GpuPowerLevel::Minimum => "minimum",
            GpuPowerLevel::Medium => "medium",
            GpuPowerLevel::Maximum => "maximum",
        };

        f.write_str(name)
    }
}

impl FromStr for GpuPowerLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "min" | "minimum" => Ok(GpuPowerLevel::Minimum),
            "med" | "medium" => Ok(GpuPowerLevel::Medium),
            "max" | "maximum" => Ok(GpuPowerLevel::Maximum),
            other => Err(format!(
                "Unknown GPU power level \"{other}\", \
                 expected minimum, medium or maximum"
            )),
        }
    }
}

// Byte conversions, unknown values are always rejected

impl TryFrom<u8> for CustomTgp {
    type Error = FirmwareError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(CustomTgp::Off),
            0x01 => Ok(CustomTgp::On),
            v => Err(FirmwareError::malformed(format!(
                "unknown custom TGP state {v:#04x}"
            ))),
        }
    }
}

impl TryFrom<u8> for AiBoost {
    type Error = FirmwareError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(AiBoost::Off),
            0x01 => Ok(AiBoost::On),
            v => Err(FirmwareError::malformed(format!(
                "unknown AI boost state {v:#04x}"
            ))),
        }
    }
}

impl TryFrom<u8> for DeviceState {
    type Error = FirmwareError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(DeviceState::D1),
            0x02 => Ok(DeviceState::D2),
            0x03 => Ok(DeviceState::D3),
            0x04 => Ok(DeviceState::D4),
            0x05 => Ok(DeviceState::D5),
            v => Err(FirmwareError::malformed(format!(
                "unknown GPU device state {v:#04x}"
            ))),
        }
    }
}

impl From<CustomTgp> for u8 {
    fn from(value: CustomTgp) -> Self {
        value as u8
    }
}

impl From<AiBoost> for u8 {
    fn from(value: AiBoost) -> Self {
        value as u8
    }
}

impl From<DeviceState> for u8 {
    fn from(value: DeviceState) -> Self {
        value as u8
    }
}
