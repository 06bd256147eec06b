//! Serial bus transport
//!
//! A [`BusSession`] owns one open RTU serial port plus the cross-process
//! bus lock, and talks to one target unit at a time. All calls are bounded
//! by the configured per-call timeout; writes can be confirmed by re-read
//! with a bounded number of retries.

pub mod codec;
pub mod lock;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

use crate::config::SerialConfig;
use crate::error::{DlcSrvError, Result};
use lock::BusLock;

/// Serial ports currently enumerated by the OS
pub fn available_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// An open, locked session on one serial bus
pub struct BusSession {
    stream: SerialStream,
    target: u8,
    call_timeout: Duration,
    write_retries: u32,
    // must outlive the stream, released on drop
    _lock: BusLock,
}

impl BusSession {
    /// Acquire the bus lock, then open the port at 8N1
    pub async fn open(port_path: &str, config: &SerialConfig) -> Result<Self> {
        let lock = BusLock::acquire(&config.lock_path).await?;

        let stream = tokio_serial::new(port_path, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .open_native_async()?;

        debug!("opened bus session on {port_path} at {} baud", config.baud_rate);

        Ok(Self {
            stream,
            target: 0,
            call_timeout: Duration::from_millis(config.call_timeout_ms),
            write_retries: config.write_retries,
            _lock: lock,
        })
    }

    /// Select the unit subsequent calls address
    pub fn set_target(&mut self, unit_id: u8) {
        self.target = unit_id;
    }

    async fn transact(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        tokio::time::timeout(self.call_timeout, self.transact_inner(request))
            .await
            .map_err(|_| {
                DlcSrvError::timeout(format!(
                    "no response from unit {} within {:?}",
                    self.target, self.call_timeout
                ))
            })?
    }

    async fn transact_inner(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.stream.write_all(request).await?;
        self.stream.flush().await?;

        let mut head = [0u8; 3];
        self.stream.read_exact(&mut head).await?;
        let remaining = codec::remaining_response_len(head[1], head[2])?;

        let mut frame = head.to_vec();
        frame.resize(3 + remaining, 0);
        self.stream.read_exact(&mut frame[3..]).await?;
        Ok(frame)
    }

    /// FC03 read of `count` holding registers
    pub async fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let request = codec::build_read_request(self.target, address, count);
        let response = self.transact(&request).await?;
        codec::parse_read_response(self.target, &response)
    }

    /// Single-register convenience read
    pub async fn read_register(&mut self, address: u16) -> Result<u16> {
        let values = self.read_holding(address, 1).await?;
        values.first().copied().ok_or_else(|| {
            DlcSrvError::protocol(format!(
                "empty read response for register {address} on unit {}",
                self.target
            ))
        })
    }

    /// FC06 write, single attempt
    pub async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        let request = codec::build_write_request(self.target, address, value);
        let response = self.transact(&request).await?;
        codec::parse_write_response(self.target, address, &response)?;
        Ok(())
    }

    /// FC06 write confirmed by re-read; retried until the read-back matches
    pub async fn write_confirmed(&mut self, address: u16, value: u16) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..=self.write_retries {
            match self.try_write_confirmed(address, value).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(
                        "unit {}: write register {address}={value} attempt {} failed: {err}",
                        self.target,
                        attempt + 1
                    );
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            DlcSrvError::write_failed(format!(
                "register {address} on unit {}",
                self.target
            ))
        }))
    }

    async fn try_write_confirmed(&mut self, address: u16, value: u16) -> Result<()> {
        self.write_register(address, value).await?;
        let read_back = self.read_register(address).await?;
        if read_back != value {
            return Err(DlcSrvError::write_failed(format!(
                "register {address} on unit {}: wrote {value}, read back {read_back}",
                self.target
            )));
        }
        Ok(())
    }
}
