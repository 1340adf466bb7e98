use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    bios_call::{BiosCtl, Command, opcode},
    bios_data::{
        AiBoost, GpuPowerConfig, GpuPowerLevel,
        codec::{self, GPU_POWER_DATA_SIZE},
    },
    errors::FirmwareError,
};

type Result<T> = std::result::Result<T, FirmwareError>;

/// GPU power settings backed by the BIOS.
///
/// The last value read from the BIOS is cached and returned until a forced
/// refresh. Writing never updates the cache: the BIOS may apply something
/// other than what was requested, so callers wanting the effective value
/// after a write must read it back with `force_refresh`.
pub struct GpuPowerSettings {
    bios: BiosCtl,

    // Locked across the whole read and populate sequence
    gpu_power: Mutex<Option<GpuPowerConfig>>,
}

impl GpuPowerSettings {
    pub fn new(bios: BiosCtl) -> Self {
        Self {
            bios,
            gpu_power: Mutex::new(None),
        }
    }

    // Return the GPU power settings, only querying the BIOS if nothing
    // was cached yet or if a refresh is forced
    pub async fn get_gpu_power(
        &self,
        force_refresh: bool,
    ) -> Result<GpuPowerConfig> {
        let mut cached = self.gpu_power.lock().await;

        if let (false, Some(gpu_power)) = (force_refresh, *cached) {
            debug!("GPU power: returning cached value");
            return Ok(gpu_power);
        }

        let data = self
            .bios
            .send(
                Command::Default,
                opcode::GET_GPU_POWER,
                &[],
                GPU_POWER_DATA_SIZE,
            )
            .await?;
        let gpu_power = codec::decode(&data)?;

        debug!("GPU power read from BIOS: {gpu_power}");
        *cached = Some(gpu_power);

        Ok(gpu_power)
    }

    // Update the GPU power settings, the cached value is left untouched
    pub async fn set_from_config(&self, config: &GpuPowerConfig) -> Result<()> {
        let data = codec::encode(config);

        self.bios
            .send(Command::Default, opcode::SET_GPU_POWER, &data, 0)
            .await?;

        info!("GPU power set to {config}");

        Ok(())
    }

    // Update the GPU power settings to one of the presets
    pub async fn set_from_preset(&self, level: GpuPowerLevel) -> Result<()> {
        debug!("Applying GPU power level: {level}");

        self.set_from_config(&GpuPowerConfig::from_preset(level))
            .await
    }

    // Query the Processing Power AI Boost state
    pub async fn get_ai_boost_state(
        &self,
        force_refresh: bool,
    ) -> Result<AiBoost> {
        Ok(self.get_gpu_power(force_refresh).await?.ai_boost)
    }

    // Cached value, if any, without querying the BIOS
    pub async fn cached(&self) -> Option<GpuPowerConfig> {
        *self.gpu_power.lock().await
    }
}
