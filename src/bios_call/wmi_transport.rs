// HP WMI BIOS transport for OMEN and Victus systems.
// Each call runs PowerShell against the hpqBIntM WMI class.
use std::process::Command;

use tracing::{debug, trace};

use crate::{
    bios_call::{FirmwareReply, FirmwareRequest, FirmwareTransport},
    errors::FirmwareError,
};

type Result<T> = std::result::Result<T, FirmwareError>;

const POWERSHELL: &str = "powershell";
const WMI_NAMESPACE: &str = "root\\wmi";
const WMI_CLASS: &str = "hpqBIntM";

// "SECU" signature expected in every BIOS data input
const SIGNATURE: [u8; 4] = *b"SECU";

// Output buffer sizes the BIOS provides a method for
const OUTPUT_SIZES: [usize; 5] = [0, 4, 128, 1024, 4096];

pub struct WmiTransport {
    powershell: String,
}

impl WmiTransport {
    // Check the HP BIOS WMI class is present before handing out a transport
    pub fn new() -> Result<Self> {
        let transport = Self {
            powershell: POWERSHELL.to_string(),
        };

        let probe = format!(
            "Get-CimInstance -ClassName '{WMI_CLASS}' -Namespace '{WMI_NAMESPACE}' \
             -ErrorAction SilentlyContinue | Select-Object -First 1"
        );

        match transport.run(&probe) {
            Ok(stdout) if !stdout.trim().is_empty() => {
                debug!("Found {WMI_CLASS} WMI class");
                Ok(transport)
            }
            _ => Err(FirmwareError::transport(format!(
                "{WMI_CLASS} WMI class not found, not an HP OMEN/Victus system?"
            ))),
        }
    }

    fn run(&self, script: &str) -> Result<String> {
        let output = Command::new(&self.powershell)
            .args(["-NoProfile", "-NonInteractive", "-Command", script])
            .output()
            .map_err(|e| {
                FirmwareError::transport(format!("Failed to run PowerShell: {e}"))
            })?;

        if !output.status.success() {
            return Err(FirmwareError::transport(format!(
                "PowerShell failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl FirmwareTransport for WmiTransport {
    fn raw_call(&self, request: &FirmwareRequest) -> Result<FirmwareReply> {
        let script = build_script(request)?;
        trace!("WMI BIOS script: {script}");

        let stdout = self.run(&script)?;

        parse_output(&stdout)
    }
}

// Pick the smallest BIOS method whose output buffer fits the reply
fn method_name(reply_len: usize) -> Result<String> {
    OUTPUT_SIZES
        .iter()
        .find(|&&size| size >= reply_len)
        .map(|size| format!("hpqBIOSInt{size}"))
        .ok_or_else(|| {
            FirmwareError::transport(format!(
                "No BIOS method returns {reply_len} bytes"
            ))
        })
}

fn byte_list(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

// Build the PowerShell script performing a single BIOS call.
// It prints the return code and the output data as "code;b0,b1,..."
fn build_script(request: &FirmwareRequest) -> Result<String> {
    let method = method_name(request.reply_len)?;

    let data = if request.payload.is_empty() {
        String::new()
    } else {
        format!("; hpqBData = [byte[]]@({})", byte_list(&request.payload))
    };

    Ok(format!(
        "$ErrorActionPreference = 'Stop'; \
         $in = New-CimInstance -ClassName hpqBDataIn -Namespace '{ns}' -ClientOnly \
         -Property @{{ Sign = [byte[]]@({sign}); Command = [uint32]{command}; \
         CommandType = [uint32]{opcode}; Size = [uint32]{size}{data} }}; \
         $bios = Get-CimInstance -ClassName '{class}' -Namespace '{ns}'; \
         $out = Invoke-CimMethod -InputObject $bios -MethodName {method} \
         -Arguments @{{ InData = [CimInstance]$in }}; \
         Write-Output (\"{{0}};{{1}}\" -f $out.OutData.rwReturnCode, \
         ($out.OutData.Data -join ','))",
        ns = WMI_NAMESPACE,
        class = WMI_CLASS,
        sign = byte_list(&SIGNATURE),
        command = request.command,
        opcode = request.opcode,
        size = request.payload.len(),
    ))
}

// Parse the "code;b0,b1,..." line printed by the BIOS call script
fn parse_output(stdout: &str) -> Result<FirmwareReply> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| FirmwareError::transport("Empty WMI BIOS output"))?;

    let (status, data) = line.split_once(';').ok_or_else(|| {
        FirmwareError::transport(format!("Unexpected WMI BIOS output \"{line}\""))
    })?;

    let status = status.trim().parse::<u32>().map_err(|e| {
        FirmwareError::transport(format!("Invalid WMI BIOS return code: {e}"))
    })?;

    let data = data
        .split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(|b| b.parse::<u8>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            FirmwareError::transport(format!("Invalid WMI BIOS output data: {e}"))
        })?;

    Ok(FirmwareReply { status, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bios_call::{Command, opcode};

    #[test]
    fn method_fits_reply_size() {
        assert_eq!(method_name(0).unwrap(), "hpqBIOSInt0");
        assert_eq!(method_name(4).unwrap(), "hpqBIOSInt4");
        assert_eq!(method_name(5).unwrap(), "hpqBIOSInt128");
        assert!(method_name(4097).is_err());
    }

    #[test]
    fn script_carries_request() {
        let script = build_script(&FirmwareRequest {
            command: Command::Default as u32,
            opcode: opcode::SET_GPU_POWER,
            payload: vec![1, 1, 1, 0],
            reply_len: 0,
        })
        .unwrap();

        assert!(script.contains("Sign = [byte[]]@(83,69,67,85)"));
        assert!(script.contains("Command = [uint32]131080"));
        assert!(script.contains("CommandType = [uint32]34"));
        assert!(script.contains("Size = [uint32]4"));
        assert!(script.contains("hpqBData = [byte[]]@(1,1,1,0)"));
        assert!(script.contains("-MethodName hpqBIOSInt0 "));
    }

    #[test]
    fn parses_reply_line() {
        assert_eq!(
            parse_output("\r\n0;1,0,1,75\r\n").unwrap(),
            FirmwareReply {
                status: 0,
                data: vec![1, 0, 1, 75],
            }
        );
        assert_eq!(
            parse_output("5;").unwrap(),
            FirmwareReply {
                status: 5,
                data: vec![],
            }
        );
    }

    #[test]
    fn rejects_garbage_output() {
        assert!(parse_output("").is_err());
        assert!(parse_output("hello").is_err());
        assert!(parse_output("0;1,300").is_err());
    }
}
