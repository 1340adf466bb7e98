use std::{
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use tracing::debug;

use crate::{
    bios_call::{Command, FirmwareReply, FirmwareRequest, FirmwareTransport, opcode},
    bios_data::codec::GPU_POWER_DATA_SIZE,
    errors::{
        FirmwareError, STATUS_INVALID_PARAMETERS, STATUS_SUCCESS,
        STATUS_UNKNOWN_COMMAND,
    },
};

type Result<T> = std::result::Result<T, FirmwareError>;

// Custom TGP on, AI boost off, D1, default threshold
const POWER_ON_GPU_POWER: [u8; GPU_POWER_DATA_SIZE] = [0x01, 0x00, 0x01, 0x00];

#[derive(Debug)]
struct EmulatedState {
    gpu_power: [u8; GPU_POWER_DATA_SIZE],

    // When set every call is answered with this status
    forced_status: Option<u32>,
    latency: Duration,
}

/// In-memory stand-in for the BIOS.
///
/// Stores the GPU power data structure and answers the GPU power commands
/// of the default command group the way the firmware does. Status failures
/// and latency can be injected, and every raw call is counted.
#[derive(Debug)]
pub struct EmulatedTransport {
    state: Mutex<EmulatedState>,
    calls: AtomicUsize,
}

impl EmulatedTransport {
    pub fn new(gpu_power: [u8; GPU_POWER_DATA_SIZE]) -> Self {
        Self {
            state: Mutex::new(EmulatedState {
                gpu_power,
                forced_status: None,
                latency: Duration::ZERO,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    // Number of raw calls received so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    // Current raw GPU power data held by the emulated firmware
    pub fn gpu_power(&self) -> [u8; GPU_POWER_DATA_SIZE] {
        self.lock_state().gpu_power
    }

    // Overwrite the GPU power data, as if changed outside of this process
    pub fn set_gpu_power(&self, gpu_power: [u8; GPU_POWER_DATA_SIZE]) {
        self.lock_state().gpu_power = gpu_power;
    }

    // Answer every following call with the given status, None restores
    // normal operation
    pub fn force_status(&self, status: Option<u32>) {
        self.lock_state().forced_status = status;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock_state().latency = latency;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EmulatedState> {
        // The state is plain data, a poisoned lock still holds a valid value
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for EmulatedTransport {
    fn default() -> Self {
        Self::new(POWER_ON_GPU_POWER)
    }
}

impl FirmwareTransport for EmulatedTransport {
    fn raw_call(&self, request: &FirmwareRequest) -> Result<FirmwareReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.lock_state().latency;
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        let mut state = self.lock_state();

        if let Some(status) = state.forced_status {
            debug!("Emulated BIOS: answering with forced status {status:#04x}");

            return Ok(FirmwareReply {
                status,
                data: vec![0; request.reply_len],
            });
        }

        if request.command != Command::Default as u32 {
            return Ok(reply(STATUS_UNKNOWN_COMMAND, request.reply_len));
        }

        let answer = match request.opcode {
            opcode::GET_GPU_POWER => {
                let mut data = vec![0; request.reply_len];
                let len = data.len().min(GPU_POWER_DATA_SIZE);
                data[..len].copy_from_slice(&state.gpu_power[..len]);

                FirmwareReply {
                    status: STATUS_SUCCESS,
                    data,
                }
            }
            opcode::SET_GPU_POWER => {
                match <[u8; GPU_POWER_DATA_SIZE]>::try_from(
                    request.payload.as_slice(),
                ) {
                    Ok(gpu_power) => {
                        debug!("Emulated BIOS: GPU power set to {gpu_power:02x?}");

                        state.gpu_power = gpu_power;
                        reply(STATUS_SUCCESS, request.reply_len)
                    }
                    Err(_) => {
                        reply(STATUS_INVALID_PARAMETERS, request.reply_len)
                    }
                }
            }
            _ => reply(STATUS_UNKNOWN_COMMAND, request.reply_len),
        };

        Ok(answer)
    }
}

fn reply(status: u32, reply_len: usize) -> FirmwareReply {
    FirmwareReply {
        status,
        data: vec![0; reply_len],
    }
}
