use crate::{
    bios_data::{AiBoost, CustomTgp, DeviceState, GpuPowerConfig},
    errors::FirmwareError,
};

// Size of the GPU power data structure on the wire, changing it
// is a protocol change and must never happen silently
pub const GPU_POWER_DATA_SIZE: usize = 4;

// Field offsets inside the GPU power data structure
const CUSTOM_TGP_OFFSET: usize = 0;
const AI_BOOST_OFFSET: usize = 1;
const DEVICE_STATE_OFFSET: usize = 2;
const PEAK_TEMPERATURE_OFFSET: usize = 3;

// Convert the GPU power settings to the BIOS byte layout
pub fn encode(config: &GpuPowerConfig) -> [u8; GPU_POWER_DATA_SIZE] {
    let mut bytes = [0u8; GPU_POWER_DATA_SIZE];

    bytes[CUSTOM_TGP_OFFSET] = config.custom_tgp.into();
    bytes[AI_BOOST_OFFSET] = config.ai_boost.into();
    bytes[DEVICE_STATE_OFFSET] = config.device_state.into();
    bytes[PEAK_TEMPERATURE_OFFSET] = config.peak_temperature;

    bytes
}

// Parse the BIOS byte layout back into GPU power settings.
// Fails if the buffer has the wrong size or holds an unknown enum value
pub fn decode(bytes: &[u8]) -> Result<GpuPowerConfig, FirmwareError> {
    let bytes: &[u8; GPU_POWER_DATA_SIZE] =
        bytes.try_into().map_err(|_| {
            FirmwareError::malformed(format!(
                "expected {} bytes of GPU power data, got {}",
                GPU_POWER_DATA_SIZE,
                bytes.len()
            ))
        })?;

    Ok(GpuPowerConfig {
        custom_tgp: CustomTgp::try_from(bytes[CUSTOM_TGP_OFFSET])?,
        ai_boost: AiBoost::try_from(bytes[AI_BOOST_OFFSET])?,
        device_state: DeviceState::try_from(bytes[DEVICE_STATE_OFFSET])?,
        peak_temperature: bytes[PEAK_TEMPERATURE_OFFSET],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Every valid enum combination with a few thresholds
    fn all_configs() -> Vec<GpuPowerConfig> {
        let mut configs = Vec::new();

        for custom_tgp in [CustomTgp::Off, CustomTgp::On] {
            for ai_boost in [AiBoost::Off, AiBoost::On] {
                for device_state in DeviceState::ALL {
                    for peak_temperature in [0, 1, 75, 87, u8::MAX] {
                        configs.push(GpuPowerConfig {
                            custom_tgp,
                            ai_boost,
                            device_state,
                            peak_temperature,
                        });
                    }
                }
            }
        }

        configs
    }

    #[test]
    fn decode_inverts_encode() {
        for config in all_configs() {
            let bytes = encode(&config);

            assert_eq!(bytes.len(), GPU_POWER_DATA_SIZE);
            assert_eq!(decode(&bytes), Ok(config));
        }
    }

    #[test]
    fn layout_matches_bios() {
        let config = GpuPowerConfig {
            custom_tgp: CustomTgp::On,
            ai_boost: AiBoost::Off,
            device_state: DeviceState::D1,
            peak_temperature: 87,
        };

        assert_eq!(encode(&config), [0x01, 0x00, 0x01, 87]);
    }

    #[test]
    fn wrong_sizes_are_rejected() {
        let short: &[u8] = &[0x01, 0x01, 0x01];
        let long: &[u8] = &[0x01, 0x01, 0x01, 0x00, 0x00];

        for bytes in [short, long] {
            assert!(matches!(
                decode(bytes),
                Err(FirmwareError::MalformedPayload { .. })
            ));
        }

        assert!(decode(&[]).is_err());
    }

    #[test]
    fn unknown_custom_tgp_value_is_rejected() {
        assert!(matches!(
            decode(&[0x02, 0x00, 0x01, 0x00]),
            Err(FirmwareError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn unknown_ai_boost_value_is_rejected() {
        assert!(matches!(
            decode(&[0x01, 0x02, 0x01, 0x00]),
            Err(FirmwareError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn unknown_device_state_is_rejected() {
        assert!(matches!(
            decode(&[0x01, 0x00, 0x06, 0x00]),
            Err(FirmwareError::MalformedPayload { .. })
        ));
    }
}
