use crate::ecu::frame::RawFrame;
use crate::ecu::reader::FrameReader;
use crate::error::{ProtocolError, Result};

use async_trait::async_trait;
use log::{debug, info, warn};
use net2::TcpStreamExt;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

pub const DEFAULT_PORT: u16 = 8899;

const WRITE_TIMEOUT_SECS: u64 = 5;
const TCP_KEEPALIVE_SECS: u64 = 60;

// Transport {{{
/// One exclusively owned link to an ECU.
///
/// [`Connection`] is the TCP implementation; tests substitute scripted ones.
#[async_trait]
pub trait Transport: Send {
    async fn open(&mut self) -> Result<()>;

    /// Idempotent.
    async fn close(&mut self);

    fn is_open(&self) -> bool;

    fn reopen_delay(&self) -> Duration;

    /// Drop the link, wait out the ECU's reconnect quirk, connect again.
    async fn reopen(&mut self) -> Result<()> {
        self.close().await;
        let delay = self.reopen_delay();
        if !delay.is_zero() {
            debug!("waiting {}ms before reconnecting", delay.as_millis());
            tokio::time::sleep(delay).await;
        }
        self.open().await
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    async fn read_frame(&mut self, timeout: Duration) -> Result<RawFrame>;
} // }}}

// Connection {{{
#[derive(Debug)]
pub struct Connection {
    host: String,
    port: u16,
    connect_timeout: Duration,
    reopen_delay: Duration,
    stream: Option<TcpStream>,
    reader: FrameReader,
}

impl Connection {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
        reopen_delay: Duration,
    ) -> Self {
        let host = host.into();
        let reader = FrameReader::new(format!("{}:{}", host, port));
        Self {
            host,
            port,
            connect_timeout,
            reopen_delay,
            stream: None,
            reader,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn error(&self, reason: impl std::fmt::Display) -> ProtocolError {
        ProtocolError::Connection {
            addr: self.addr(),
            reason: reason.to_string(),
        }
    }

    fn not_open(&self) -> ProtocolError {
        self.error("not connected")
    }

    async fn connect(&self) -> Result<TcpStream> {
        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.error(e)),
            Err(_) => {
                return Err(self.error(format!(
                    "connect timeout after {}s",
                    self.connect_timeout.as_secs_f32()
                )))
            }
        };

        let std_stream = stream.into_std().map_err(|e| self.error(e))?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::new(TCP_KEEPALIVE_SECS, 0))) {
            warn!("{}: failed to set TCP keepalive: {}", self.addr(), e);
        }
        let stream = TcpStream::from_std(std_stream).map_err(|e| self.error(e))?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("{}: failed to set TCP_NODELAY: {}", self.addr(), e);
        }

        Ok(stream)
    }
}

#[async_trait]
impl Transport for Connection {
    async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        debug!("connecting to ECU at {}", self.addr());
        let stream = self.connect().await?;
        info!("connected to ECU at {}", self.addr());
        self.stream = Some(stream);

        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("{}: shutdown: {}", self.addr(), e);
            }
            debug!("closed connection to {}", self.addr());
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn reopen_delay(&self) -> Duration {
        self.reopen_delay
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let addr = self.addr();
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(self.not_open()),
        };

        debug!("{}: TX {:?}", addr, String::from_utf8_lossy(bytes));
        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };

        match tokio::time::timeout(Duration::from_secs(WRITE_TIMEOUT_SECS), write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProtocolError::Connection {
                addr,
                reason: format!("write failed: {}", e),
            }),
            Err(_) => Err(ProtocolError::Connection {
                addr,
                reason: format!("write timed out after {}s", WRITE_TIMEOUT_SECS),
            }),
        }
    }

    async fn read_frame(&mut self, timeout: Duration) -> Result<RawFrame> {
        match self.stream.as_mut() {
            Some(stream) => self.reader.read_frame(stream, timeout).await,
            None => Err(self.not_open()),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.stream.is_some() {
            debug!("dropping open connection to {}", self.addr());
        }
    }
} // }}}
