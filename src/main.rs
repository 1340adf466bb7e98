use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
#[cfg(unix)]
use omen_gpu_power::dbus_service::DBusService;
use omen_gpu_power::{
    arg_parser::ArgsOptions,
    bios_call::{
        BiosCtl, FirmwareTransport, emulated_transport::EmulatedTransport,
    },
    config_manager::{Config, ConfigManager, TransportKind},
    gpu_settings::GpuPowerSettings,
    logger,
};
#[cfg(unix)]
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;
#[cfg(unix)]
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logging();

    // Parse the command line arguments
    let args_options = ArgsOptions::parse();

    let config = ConfigManager::new(&args_options.config_file_path)
        .load()
        .with_context(|| "Failed to load the configuration")?;

    // Refuse an unusable daemon setup before touching the BIOS
    if args_options.daemon {
        config
            .check_daemon_transport(args_options.emulate)
            .with_context(|| "Cannot start the daemon")?;
    }

    let transport = open_transport(&args_options, &config).await?;
    let bios = BiosCtl::with_timeout(transport, config.call_timeout());
    let settings = Arc::new(GpuPowerSettings::new(bios));

    if args_options.daemon {
        return run_daemon(settings, &config).await;
    }

    let mut show_status = args_options.status;

    if let Some(level) = args_options.level {
        settings
            .set_from_preset(level)
            .await
            .with_context(|| format!("Failed to apply GPU power level {level}"))?;

        // Show what the BIOS actually applied
        show_status = true;
    }

    if args_options.ai_boost {
        let ai_boost = settings
            .get_ai_boost_state(args_options.refresh)
            .await
            .with_context(|| "Failed to read the AI boost state")?;

        println!("AI boost: {ai_boost:?}");
    } else if args_options.level.is_none() {
        show_status = true;
    }

    if show_status {
        // A write is only visible after a forced refresh
        let force_refresh = args_options.refresh || args_options.level.is_some();

        let gpu_power = settings
            .get_gpu_power(force_refresh)
            .await
            .with_context(|| "Failed to read the GPU power settings")?;

        println!("{gpu_power}");
    }

    Ok(())
}

// Select the BIOS transport from the command line and configuration
async fn open_transport(
    args_options: &ArgsOptions,
    config: &Config,
) -> Result<Arc<dyn FirmwareTransport>> {
    match config.effective_transport(args_options.emulate) {
        TransportKind::Emulated => {
            info!("Using the emulated BIOS");

            Ok(Arc::new(EmulatedTransport::default()))
        }
        TransportKind::Wmi => open_wmi_transport().await,
    }
}

#[cfg(windows)]
async fn open_wmi_transport() -> Result<Arc<dyn FirmwareTransport>> {
    use omen_gpu_power::bios_call::wmi_transport::WmiTransport;

    // Probing WMI spawns a process, keep it off the async workers
    let transport = tokio::task::spawn_blocking(WmiTransport::new)
        .await?
        .with_context(|| "Failed to open the HP WMI BIOS interface")?;

    Ok(Arc::new(transport))
}

#[cfg(not(windows))]
async fn open_wmi_transport() -> Result<Arc<dyn FirmwareTransport>> {
    Err(anyhow!(
        "The HP WMI BIOS transport is only available on Windows, \
         use --emulate or \"transport\": \"emulated\""
    ))
}

// Apply the start-up preset and serve D-Bus requests until Ctrl-C
#[cfg(unix)]
async fn run_daemon(settings: Arc<GpuPowerSettings>, config: &Config) -> Result<()> {
    if let Some(level) = config.level_on_start {
        settings
            .set_from_preset(level)
            .await
            .with_context(|| format!("Failed to apply GPU power level {level}"))?;
    }

    // This token and tracker will be used to handle graceful shutdown
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    // Start the D-Bus service
    {
        let token = token.clone();
        let settings = settings.clone();

        tracker.spawn(async move {
            let mut dbus_service = DBusService::new(settings);

            if let Err(err) = dbus_service.run(token.clone()).await {
                error!("{err}");

                // Nothing left to serve
                token.cancel();
            }
        });
    }

    tokio::select! {
        res = ctrl_c() => res?,
        _ = token.cancelled() => {},
    }

    // Cancel the token to communicate the program
    // termination to the running tasks
    token.cancel();

    // Wait for the tasks to finish
    tracker.close();
    tracker.wait().await;

    Ok(())
}

#[cfg(not(unix))]
async fn run_daemon(_settings: Arc<GpuPowerSettings>, _config: &Config) -> Result<()> {
    Err(anyhow!("The D-Bus daemon is only available on Unix"))
}
