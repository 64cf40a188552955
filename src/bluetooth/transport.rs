// Copyright 2026 RelayLink Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Serial transport over a Bluetooth RFCOMM (SPP) socket.
//!
//! The transport is a trait seam so the connection manager can be exercised
//! against an in-memory fake; `RfcommTransport` is the real BlueZ-backed
//! implementation.

use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Adapter, Address};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// Standard serial-port-profile service class UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// RFCOMM channel the board's SPP service listens on.
pub const SPP_CHANNEL: u8 = 1;

/// Bound on the socket connect call.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

const READ_BUF_SIZE: usize = 1024;

/// Failure taxonomy for the link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Bluetooth permission not granted")]
    PermissionDenied,
    #[error("Bluetooth is not enabled")]
    AdapterDisabled,
    #[error("connection timed out")]
    TimedOut,
    #[error("no trusted device saved")]
    NoTrustedDevice,
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    /// Best-effort check for the error signatures BlueZ produces when the
    /// peer is powered off or out of radio range.
    pub fn looks_unreachable(&self) -> bool {
        match self {
            LinkError::Io(err) => {
                if matches!(
                    err.kind(),
                    io::ErrorKind::ConnectionRefused
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::HostUnreachable
                ) {
                    return true;
                }
                let text = err.to_string().to_lowercase();
                text.contains("closed")
                    || text.contains("unreachable")
                    || text.contains("refused")
                    || text.contains("host is down")
            }
            _ => false,
        }
    }
}

/// Read half of an open link.
#[async_trait]
pub trait LinkReader: Send {
    /// Blocking read of the next inbound chunk.
    ///
    /// `Ok(None)` means the peer closed the link; an error means the link
    /// dropped. Either way the session is finished and only a fresh connect
    /// restarts it.
    async fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Write half of an open link.
#[async_trait]
pub trait LinkWriter: Send {
    /// Send one byte and flush it to the socket layer.
    async fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Best-effort teardown. Errors during close are swallowed; close never
    /// reports failure to the caller.
    async fn close(&mut self);
}

/// Opens a byte-stream session to a device address.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        address: &str,
    ) -> Result<(Box<dyn LinkReader>, Box<dyn LinkWriter>), LinkError>;
}

/// Real SPP transport over `bluer::rfcomm::Stream`.
pub struct RfcommTransport {
    adapter: Adapter,
}

impl RfcommTransport {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    async fn connect(
        &self,
        address: &str,
    ) -> Result<(Box<dyn LinkReader>, Box<dyn LinkWriter>), LinkError> {
        let address: Address = address
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid device address"))?;

        // BlueZ wants discovery stopped before an RFCOMM connect. We never
        // run discovery ourselves; it is owned by whoever started it and
        // stops when its handle is dropped.
        if self.adapter.is_discovering().await.unwrap_or(false) {
            warn!("Adapter is still discovering during connect attempt");
        }

        debug!("Opening RFCOMM socket to {} (SPP {})", address, SPP_UUID);
        let target = SocketAddr::new(address, SPP_CHANNEL);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, Stream::connect(target))
            .await
            .map_err(|_| LinkError::TimedOut)?
            .map_err(|err| match err.kind() {
                io::ErrorKind::PermissionDenied => LinkError::PermissionDenied,
                io::ErrorKind::TimedOut => LinkError::TimedOut,
                _ => LinkError::Io(err),
            })?;

        let (read_half, write_half) = stream.into_split();
        Ok((
            Box::new(RfcommReader { half: read_half }),
            Box::new(RfcommWriter { half: write_half }),
        ))
    }
}

struct RfcommReader {
    half: bluer::rfcomm::stream::OwnedReadHalf,
}

#[async_trait]
impl LinkReader for RfcommReader {
    async fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = [0u8; READ_BUF_SIZE];
        let read = self.half.read(&mut buf).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(buf[..read].to_vec()))
    }
}

struct RfcommWriter {
    half: bluer::rfcomm::stream::OwnedWriteHalf,
}

#[async_trait]
impl LinkWriter for RfcommWriter {
    async fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.half.write_all(&[byte]).await?;
        self.half.flush().await
    }

    async fn close(&mut self) {
        let _ = self.half.shutdown().await;
    }
}
