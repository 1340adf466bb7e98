use std::path::PathBuf;

use argparse::{ArgumentParser, Print, Store, StoreOption, StoreTrue};

use crate::bios_data::GpuPowerLevel;

pub struct ArgsOptions {
    pub config_file_path: PathBuf,

    // Use the in-memory BIOS instead of the configured transport
    pub emulate: bool,

    pub status: bool,
    pub ai_boost: bool,
    pub refresh: bool,
    pub level: Option<GpuPowerLevel>,

    pub daemon: bool,
}

impl ArgsOptions {
    pub fn parse() -> Self {
        let mut options = ArgsOptions::default();

        {
            let mut parser = ArgumentParser::new();
            parser.set_description("Read and set the HP OMEN GPU power settings");

            // Configuration file path
            parser.refer(&mut options.config_file_path).add_option(
                &["-c", "--config"],
                Store,
                "The file path of the configuration file",
            );

            parser.refer(&mut options.emulate).add_option(
                &["--emulate"],
                StoreTrue,
                "Talk to an emulated BIOS instead of the real one",
            );

            parser.refer(&mut options.status).add_option(
                &["-s", "--status"],
                StoreTrue,
                "Show the current GPU power settings",
            );

            parser.refer(&mut options.ai_boost).add_option(
                &["--ai-boost"],
                StoreTrue,
                "Show the AI boost state",
            );

            parser.refer(&mut options.refresh).add_option(
                &["-r", "--refresh"],
                StoreTrue,
                "Always query the BIOS instead of using cached values",
            );

            parser.refer(&mut options.level).add_option(
                &["-l", "--level"],
                StoreOption,
                "Apply a GPU power preset: minimum, medium or maximum",
            );

            parser.refer(&mut options.daemon).add_option(
                &["-d", "--daemon"],
                StoreTrue,
                "Serve the GPU power settings over D-Bus",
            );

            // Show version
            parser.add_option(
                &["-V", "--version"],
                Print(env!("CARGO_PKG_VERSION").to_string()),
                "Show the program version",
            );

            parser.parse_args_or_exit();
        }

        options
    }
}

#[cfg(windows)]
const DEFAULT_CONFIG_PATH: &str = "C:\\ProgramData\\omen-gpu-power\\config.json";
#[cfg(not(windows))]
const DEFAULT_CONFIG_PATH: &str = "/etc/omen-gpu-power/config.json";

impl Default for ArgsOptions {
    fn default() -> Self {
        Self {
            config_file_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            emulate: false,
            status: false,
            ai_boost: false,
            refresh: false,
            level: None,
            daemon: false,
        }
    }
}
