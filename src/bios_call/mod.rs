pub mod emulated_transport;
#[cfg(windows)]
pub mod wmi_transport;

use std::{sync::Arc, time::Duration};

use tokio::{sync::Mutex, task, time};
use tracing::{error, trace};

use crate::errors::{FirmwareError, STATUS_SUCCESS, describe_status};

type Result<T> = std::result::Result<T, FirmwareError>;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

// BIOS command groups
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Default = 0x20008,
}

// BIOS command types (opcodes) used within the default command group
pub mod opcode {
    pub const GET_GPU_POWER: u32 = 0x21;
    pub const SET_GPU_POWER: u32 = 0x22;
}

// A single request to the BIOS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareRequest {
    pub command: u32,
    pub opcode: u32,
    pub payload: Vec<u8>,

    // Size of the output buffer the BIOS should fill
    pub reply_len: usize,
}

// The raw BIOS answer, must go through `BiosCtl::check` before use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareReply {
    pub status: u32,
    pub data: Vec<u8>,
}

/// Platform mechanism able to issue a raw BIOS call.
///
/// Implementations may block for as long as the firmware needs to service
/// the request. They are only ever invoked from a blocking worker thread,
/// one call at a time.
pub trait FirmwareTransport: Send + Sync {
    fn raw_call(&self, request: &FirmwareRequest) -> Result<FirmwareReply>;
}

/// Gateway to the BIOS call interface.
///
/// All calls are serialized: at most one request is in flight on the
/// transport, even when the gateway is shared between tasks. A call that
/// exceeds the timeout is reported as failed but is never retried.
pub struct BiosCtl {
    transport: Arc<dyn FirmwareTransport>,

    // Held for the whole duration of a transport call
    channel: Arc<Mutex<()>>,

    timeout: Duration,
}

impl BiosCtl {
    pub fn new(transport: Arc<dyn FirmwareTransport>) -> Self {
        Self::with_timeout(transport, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(
        transport: Arc<dyn FirmwareTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            channel: Arc::new(Mutex::new(())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // Issue a BIOS call and return the unchecked reply
    pub async fn call(
        &self,
        command: Command,
        opcode: u32,
        payload: &[u8],
        reply_len: usize,
    ) -> Result<FirmwareReply> {
        let request = FirmwareRequest {
            command: command as u32,
            opcode,
            payload: payload.to_vec(),
            reply_len,
        };

        trace!(
            "BIOS call {:#x}/{:#04x}, payload {:02x?}, reply size {}",
            request.command,
            request.opcode,
            request.payload,
            request.reply_len
        );

        // Waiting for the channel and the call itself share one deadline,
        // a wedged earlier call must not stall this one past the timeout
        let deadline = time::Instant::now() + self.timeout;

        // The guard moves into the worker so the channel stays locked
        // until the transport returns, even after a timeout
        let guard =
            match time::timeout_at(deadline, self.channel.clone().lock_owned())
                .await
            {
                Ok(guard) => guard,
                Err(_) => {
                    error!(
                        "BIOS call {:#04x} timed out waiting for the channel \
                         after {:?}",
                        opcode, self.timeout
                    );

                    return Err(FirmwareError::FirmwareCallTimeout {
                        timeout: self.timeout,
                    });
                }
            };
        let transport = self.transport.clone();

        let worker = task::spawn_blocking(move || {
            let _guard = guard;
            transport.raw_call(&request)
        });

        let reply = match time::timeout_at(deadline, worker).await {
            Ok(Ok(reply)) => reply?,
            Ok(Err(err)) => {
                return Err(FirmwareError::transport(format!(
                    "BIOS call worker failed: {err}"
                )));
            }
            Err(_) => {
                error!(
                    "BIOS call {:#04x} timed out after {:?}",
                    opcode, self.timeout
                );

                return Err(FirmwareError::FirmwareCallTimeout {
                    timeout: self.timeout,
                });
            }
        };

        trace!(
            "BIOS reply status {:#04x}, data {:02x?}",
            reply.status, reply.data
        );

        Ok(reply)
    }

    // Turn a non-success status into an error
    pub fn check(reply: &FirmwareReply) -> Result<()> {
        if reply.status == STATUS_SUCCESS {
            Ok(())
        } else {
            error!(
                "BIOS status check failed: {:#04x} ({})",
                reply.status,
                describe_status(reply.status)
            );

            Err(FirmwareError::FirmwareCallFailed {
                status: reply.status,
            })
        }
    }

    // Issue a BIOS call and only return the reply data if the call succeeded
    pub async fn send(
        &self,
        command: Command,
        opcode: u32,
        payload: &[u8],
        reply_len: usize,
    ) -> Result<Vec<u8>> {
        let reply = self.call(command, opcode, payload, reply_len).await?;
        Self::check(&reply)?;

        Ok(reply.data)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex as StdMutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        bios_call::emulated_transport::EmulatedTransport,
        errors::STATUS_UNKNOWN_COMMAND,
    };

    // Records the highest number of simultaneous raw calls
    struct ConcurrencyProbe {
        in_flight: AtomicUsize,
        max_in_flight: StdMutex<usize>,
    }

    impl FirmwareTransport for ConcurrencyProbe {
        fn raw_call(&self, _request: &FirmwareRequest) -> Result<FirmwareReply> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            {
                let mut max = self.max_in_flight.lock().unwrap();
                *max = (*max).max(now);
            }

            std::thread::sleep(Duration::from_millis(10));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(FirmwareReply {
                status: STATUS_SUCCESS,
                data: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn send_returns_reply_data() {
        let transport = Arc::new(EmulatedTransport::new([0x01, 0x00, 0x01, 0x00]));
        let bios = BiosCtl::new(transport.clone());

        let data = bios
            .send(Command::Default, opcode::GET_GPU_POWER, &[], 4)
            .await
            .unwrap();

        assert_eq!(data, vec![0x01, 0x00, 0x01, 0x00]);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let transport = Arc::new(EmulatedTransport::default());
        let bios = BiosCtl::new(transport);

        let reply = bios.call(Command::Default, 0x7f, &[], 0).await.unwrap();
        assert_eq!(reply.status, STATUS_UNKNOWN_COMMAND);

        assert_eq!(
            BiosCtl::check(&reply),
            Err(FirmwareError::FirmwareCallFailed {
                status: STATUS_UNKNOWN_COMMAND
            })
        );
        assert_eq!(
            bios.send(Command::Default, 0x7f, &[], 0).await,
            Err(FirmwareError::FirmwareCallFailed {
                status: STATUS_UNKNOWN_COMMAND
            })
        );
    }

    #[tokio::test]
    async fn slow_firmware_times_out() {
        let transport = Arc::new(EmulatedTransport::default());
        transport.set_latency(Duration::from_millis(500));

        let timeout = Duration::from_millis(20);
        let bios = BiosCtl::with_timeout(transport, timeout);

        assert_eq!(
            bios.send(Command::Default, opcode::GET_GPU_POWER, &[], 4)
                .await,
            Err(FirmwareError::FirmwareCallTimeout { timeout })
        );
    }

    #[tokio::test]
    async fn wedged_call_does_not_stall_the_next_one() {
        let transport = Arc::new(EmulatedTransport::default());
        transport.set_latency(Duration::from_secs(2));

        let timeout = Duration::from_millis(50);
        let bios = BiosCtl::with_timeout(transport.clone(), timeout);

        assert_eq!(
            bios.send(Command::Default, opcode::GET_GPU_POWER, &[], 4)
                .await,
            Err(FirmwareError::FirmwareCallTimeout { timeout })
        );

        // The first worker still holds the channel
        let start = time::Instant::now();
        assert_eq!(
            bios.send(Command::Default, opcode::GET_GPU_POWER, &[], 4)
                .await,
            Err(FirmwareError::FirmwareCallTimeout { timeout })
        );

        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn calls_are_serialized() {
        let probe = Arc::new(ConcurrencyProbe {
            in_flight: AtomicUsize::new(0),
            max_in_flight: StdMutex::new(0),
        });
        let bios = Arc::new(BiosCtl::new(probe.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bios = bios.clone();
            handles.push(tokio::spawn(async move {
                bios.send(Command::Default, opcode::GET_GPU_POWER, &[], 4)
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*probe.max_in_flight.lock().unwrap(), 1);
    }
}
