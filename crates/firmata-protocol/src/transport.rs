//! Byte Transport
//!
//! The engine treats the link as an opaque byte pipe: ordered, uncorrupted,
//! arbitrarily chunked. Inbound chunks are delivered over a channel.

use crate::error::FirmataError;
use std::future::Future;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Buffered inbound chunks before the reader applies backpressure
pub const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Bytes requested per serial read
const READ_CHUNK_SIZE: usize = 256;

/// A bidirectional byte link to a board
pub trait Transport: Send + 'static {
    /// Open the link at `baud_rate` and return the inbound byte channel
    ///
    /// The channel closes when the link goes away.
    fn open(
        &mut self,
        baud_rate: u32,
    ) -> impl Future<Output = Result<mpsc::Receiver<Vec<u8>>, FirmataError>> + Send;

    /// Write all of `bytes`, returning once they are handed to the link
    fn send(&mut self, bytes: &[u8]) -> impl Future<Output = Result<(), FirmataError>> + Send;

    /// Release the link. Closing a closed transport is a no-op.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Serial port transport for USB/UART boards
pub struct SerialTransport {
    /// Serial port device path (e.g., "/dev/ttyACM0" or "COM3")
    path: String,
    /// Write half of the open port
    writer: Option<WriteHalf<SerialStream>>,
    /// Task forwarding reads into the inbound channel
    reader: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Create a transport for the given device path; nothing is opened yet
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            reader: None,
        }
    }

    /// Device path
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Transport for SerialTransport {
    async fn open(&mut self, baud_rate: u32) -> Result<mpsc::Receiver<Vec<u8>>, FirmataError> {
        self.close().await;

        info!("Opening serial port {} at {} baud", self.path, baud_rate);
        let stream = tokio_serial::new(&self.path, baud_rate).open_native_async()?;
        let (mut read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        let path = self.path.clone();
        self.reader = Some(tokio::spawn(async move {
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            loop {
                match read_half.read(&mut chunk).await {
                    Ok(0) => {
                        debug!("Serial port {} reached end of stream", path);
                        break;
                    }
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).await.is_err() {
                            debug!("Inbound channel for {} closed", path);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Serial read on {} failed: {}", path, e);
                        break;
                    }
                }
            }
        }));
        self.writer = Some(write_half);
        Ok(rx)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), FirmataError> {
        let writer = self.writer.as_mut().ok_or(FirmataError::NotOpen)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Serial shutdown on {} failed: {}", self.path, e);
            }
            info!("Closed serial port {}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let mut transport = SerialTransport::new("/dev/null-firmata");
        assert!(matches!(
            transport.send(&[0xFF]).await,
            Err(FirmataError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let mut transport = SerialTransport::new("/dev/does-not-exist-firmata");
        assert!(matches!(
            transport.open(57600).await,
            Err(FirmataError::Serial(_))
        ));
        // closing a never-opened transport is harmless
        transport.close().await;
        assert_eq!(transport.path(), "/dev/does-not-exist-firmata");
    }
}
