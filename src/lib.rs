pub mod arg_parser;
pub mod bios_call;
pub mod bios_data;
pub mod config_manager;
#[cfg(unix)]
pub mod dbus_service;
pub mod errors;
pub mod gpu_settings;
pub mod logger;
