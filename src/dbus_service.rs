use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};
use zbus::{Connection, fdo, interface};

use crate::{
    bios_data::{AiBoost, GpuPowerConfig, GpuPowerLevel, codec},
    errors::FirmwareError,
    gpu_settings::GpuPowerSettings,
};

const SERVICE_NAME: &str = "com.github.OmenGpuPower1";
const GPU_OBJECT_PATH: &str = "/com/github/OmenGpuPower1/Gpu";

type Result<T> = std::result::Result<T, DbusServiceError>;

#[derive(Debug, Error)]
pub enum DbusServiceError {
    #[error("DBus service DBus connection error: {reason}")]
    DBusConnection { reason: String, error: zbus::Error },
    #[error("DBus service DBus object error: {reason}")]
    DBusObject { reason: String, error: zbus::Error },
}

// GPU power D-Bus interface
struct GpuInterface {
    settings: Arc<GpuPowerSettings>,
}

fn to_fdo(err: FirmwareError) -> fdo::Error {
    match err {
        FirmwareError::MalformedPayload { .. } => {
            fdo::Error::InvalidArgs(err.to_string())
        }
        FirmwareError::FirmwareCallTimeout { .. } => {
            fdo::Error::TimedOut(err.to_string())
        }
        _ => fdo::Error::Failed(err.to_string()),
    }
}

// Raw bytes of the cached settings, empty while nothing was read
fn cached_bytes(gpu_power: Option<GpuPowerConfig>) -> Vec<u8> {
    gpu_power
        .map(|gpu_power| codec::encode(&gpu_power).to_vec())
        .unwrap_or_default()
}

#[interface(name = "com.github.OmenGpuPower1.Gpu")]
impl GpuInterface {
    // Last GPU power settings read from the BIOS, never triggers a read
    #[zbus(property)]
    async fn cached_gpu_power(&self) -> Vec<u8> {
        cached_bytes(self.settings.cached().await)
    }

    // Return the raw GPU power settings bytes, in BIOS order
    async fn get_gpu_power(&self, force_refresh: bool) -> fdo::Result<(u8, u8, u8, u8)> {
        let gpu_power = self
            .settings
            .get_gpu_power(force_refresh)
            .await
            .map_err(to_fdo)?;

        let [custom_tgp, ai_boost, device_state, peak_temperature] =
            codec::encode(&gpu_power);

        Ok((custom_tgp, ai_boost, device_state, peak_temperature))
    }

    async fn set_gpu_power(
        &self,
        custom_tgp: u8,
        ai_boost: u8,
        device_state: u8,
        peak_temperature: u8,
    ) -> fdo::Result<()> {
        let config =
            codec::decode(&[custom_tgp, ai_boost, device_state, peak_temperature])
                .map_err(to_fdo)?;

        self.settings.set_from_config(&config).await.map_err(to_fdo)
    }

    async fn set_gpu_power_level(&self, level: &str) -> fdo::Result<()> {
        let level: GpuPowerLevel = level.parse().map_err(fdo::Error::InvalidArgs)?;

        self.settings.set_from_preset(level).await.map_err(to_fdo)
    }

    async fn get_ai_boost(&self, force_refresh: bool) -> fdo::Result<bool> {
        let ai_boost = self
            .settings
            .get_ai_boost_state(force_refresh)
            .await
            .map_err(to_fdo)?;

        Ok(ai_boost == AiBoost::On)
    }
}

pub struct DBusService {
    settings: Arc<GpuPowerSettings>,
}

impl DBusService {
    pub fn new(settings: Arc<GpuPowerSettings>) -> Self {
        Self { settings }
    }

    // Serve the GPU interface on the system bus until cancelled
    pub async fn run(&mut self, run_token: CancellationToken) -> Result<()> {
        let connection = Connection::system().await.map_err(|error| {
            DbusServiceError::DBusConnection {
                reason: "Failed to establish connection with the bus"
                    .to_string(),
                error,
            }
        })?;

        trace!("DBus connection enstablished");

        self.initialize_service(&connection).await?;

        info!("DBus service: Running as {SERVICE_NAME}");

        run_token.cancelled().await;

        info!("DBus service: Quiting");

        Ok(())
    }

    async fn initialize_service(&self, connection: &Connection) -> Result<()> {
        trace!("Creating D-Bus object at {GPU_OBJECT_PATH}");

        connection
            .object_server()
            .at(
                GPU_OBJECT_PATH,
                GpuInterface {
                    settings: self.settings.clone(),
                },
            )
            .await
            .map_err(|error| DbusServiceError::DBusObject {
                reason: "Error while initializing GPU object".to_string(),
                error,
            })?;

        // NOTE:    The name request must happen AFTER setting up the
        //          server object or messages might be lost
        connection.request_name(SERVICE_NAME).await.map_err(|error| {
            error!("Failed to acquire {SERVICE_NAME}");

            DbusServiceError::DBusConnection {
                reason: "Failed to acquire service name".to_string(),
                error,
            }
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_property_is_empty_until_read() {
        assert!(cached_bytes(None).is_empty());
        assert_eq!(
            cached_bytes(Some(GpuPowerConfig::from_preset(
                GpuPowerLevel::Maximum
            ))),
            vec![0x01, 0x01, 0x01, 0x00]
        );
    }

    #[test]
    fn firmware_errors_map_to_dbus_errors() {
        assert!(matches!(
            to_fdo(FirmwareError::malformed("bad")),
            fdo::Error::InvalidArgs(_)
        ));
        assert!(matches!(
            to_fdo(FirmwareError::FirmwareCallFailed { status: 0x05 }),
            fdo::Error::Failed(_)
        ));
    }
}
