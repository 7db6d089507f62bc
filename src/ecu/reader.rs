use crate::ecu::frame::{FrameDecoder, RawFrame};
use crate::error::{ProtocolError, Result};

use bytes::BytesMut;
use log::{debug, trace};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};
use tokio_util::codec::Decoder;

const MAX_BUFFER_SIZE: usize = 65536; // 64KB max buffer size
const RECV_SIZE: usize = 4096;

/// Accumulates socket bytes until one whole frame has arrived.
#[derive(Debug)]
pub struct FrameReader {
    peer: String,
    buf: BytesMut,
    decoder: FrameDecoder,
}

impl FrameReader {
    /// `peer` names the remote end in connection errors.
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            buf: BytesMut::with_capacity(RECV_SIZE),
            decoder: FrameDecoder::new(),
        }
    }

    /// Read exactly one frame, or fail once `timeout` has elapsed.
    ///
    /// The buffer is cleared first so nothing left over from a previous
    /// command can be glued onto this one.
    pub async fn read_frame<R>(&mut self, socket: &mut R, timeout: Duration) -> Result<RawFrame>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.buf.clear();
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                debug!("RX {} bytes", frame.len());
                return Ok(frame);
            }

            if self.buf.len() >= MAX_BUFFER_SIZE {
                return Err(ProtocolError::Connection {
                    addr: self.peer.clone(),
                    reason: format!(
                        "received {} bytes without a frame terminator",
                        self.buf.len()
                    ),
                });
            }

            self.buf.reserve(RECV_SIZE);
            let len = match timeout_at(deadline, socket.read_buf(&mut self.buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(ProtocolError::FrameTimeout {
                        partial_bytes: self.buf.len(),
                        timeout,
                    })
                }
            };
            trace!("read {} bytes, {} buffered", len, self.buf.len());

            if len == 0 {
                return match self.decoder.decode_eof(&mut self.buf)? {
                    Some(frame) => Ok(frame),
                    None => Err(ProtocolError::ConnectionClosed {
                        partial_bytes: self.buf.len(),
                    }),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn returns_frame_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new("duplex");

        let writer = tokio::spawn(async move {
            server.write_all(b"APS110015").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.write_all(b"0001END\n").await.unwrap();
            server
        });

        let frame = reader
            .read_frame(&mut client, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(frame.as_bytes(), b"APS1100150001END\n");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn times_out_with_partial_bytes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"APS1100").await.unwrap();

        let mut reader = FrameReader::new("duplex");
        match reader.read_frame(&mut client, Duration::from_millis(50)).await {
            Err(ProtocolError::FrameTimeout { partial_bytes, .. }) => assert_eq!(partial_bytes, 7),
            other => panic!("expected FrameTimeout, got {:?}", other),
        }
        drop(server);
    }

    #[tokio::test]
    async fn peer_close_mid_frame_is_connection_closed() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"APS11").await.unwrap();
        drop(server);

        let mut reader = FrameReader::new("duplex");
        match reader.read_frame(&mut client, Duration::from_secs(1)).await {
            Err(ProtocolError::ConnectionClosed { partial_bytes }) => assert_eq!(partial_bytes, 5),
            other => panic!("expected ConnectionClosed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn endless_garbage_is_a_connection_error() {
        let (mut client, mut server) = tokio::io::duplex(RECV_SIZE);
        let writer = tokio::spawn(async move {
            // fails once the reader gives up and drops its end
            let _ = server.write_all(&vec![b'x'; MAX_BUFFER_SIZE + RECV_SIZE]).await;
        });

        let mut reader = FrameReader::new("10.0.0.5:8899");
        match reader.read_frame(&mut client, Duration::from_secs(5)).await {
            Err(ProtocolError::Connection { addr, reason }) => {
                assert_eq!(addr, "10.0.0.5:8899");
                assert!(reason.contains("without a frame terminator"), "{}", reason);
            }
            other => panic!("expected Connection error, got {:?}", other),
        }

        drop(client);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn buffer_is_cleared_between_calls() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new("duplex");

        server.write_all(b"stale").await.unwrap();
        assert!(reader
            .read_frame(&mut client, Duration::from_millis(30))
            .await
            .is_err());

        server.write_all(b"APSEND\n").await.unwrap();
        let frame = reader
            .read_frame(&mut client, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(frame.as_bytes(), b"APSEND\n");
    }
}
