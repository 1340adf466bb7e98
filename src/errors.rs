use std::time::Duration;

use thiserror::Error;

// Errors surfaced by every firmware facing operation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FirmwareError {
    #[error("Malformed BIOS payload: {reason}")]
    MalformedPayload { reason: String },
    #[error("BIOS call failed with status {status:#04x}")]
    FirmwareCallFailed { status: u32 },
    #[error("BIOS call did not complete within {timeout:?}")]
    FirmwareCallTimeout { timeout: Duration },
    #[error("BIOS transport error: {reason}")]
    Transport { reason: String },
}

pub const STATUS_SUCCESS: u32 = 0x00;
pub const STATUS_WRONG_SIGNATURE: u32 = 0x02;
pub const STATUS_UNKNOWN_COMMAND: u32 = 0x03;
pub const STATUS_UNKNOWN_COMMAND_TYPE: u32 = 0x04;
pub const STATUS_INVALID_PARAMETERS: u32 = 0x05;

// Human readable description of the status codes returned by the HP BIOS
pub fn describe_status(status: u32) -> &'static str {
    match status {
        STATUS_SUCCESS => "success",
        STATUS_WRONG_SIGNATURE => "wrong signature",
        STATUS_UNKNOWN_COMMAND => "unknown command",
        STATUS_UNKNOWN_COMMAND_TYPE => "unknown command type",
        STATUS_INVALID_PARAMETERS => "invalid parameters",
        _ => "unknown status",
    }
}

impl FirmwareError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_call_message_names_the_status() {
        let err = FirmwareError::FirmwareCallFailed {
            status: STATUS_UNKNOWN_COMMAND,
        };

        assert_eq!(
            err.to_string(),
            "BIOS call failed with status 0x03"
        );
        assert_eq!(describe_status(STATUS_UNKNOWN_COMMAND), "unknown command");
    }
}
