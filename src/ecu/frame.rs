use crate::ecu::codec;
use crate::ecu::command::{Command, CommandCode};
use crate::error::{ProtocolError, Result};

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

pub const START_MARKER: &[u8] = b"APS";
pub const END_MARKER: &[u8] = b"END";
pub const TERMINATOR: &[u8] = b"END\n";

/// ASCII-decimal length field: `len(frame) - 1`.
const LENGTH_OFFSET: usize = 5;
const LENGTH_DIGITS: usize = 4;

/// ASCII-decimal echo of the command code.
const CODE_OFFSET: usize = 9;
const CODE_DIGITS: usize = 4;

/// Start marker, protocol version, length, command code.
pub const HEADER_LEN: usize = CODE_OFFSET + CODE_DIGITS;

/// Bytes exactly as received for one command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame(Bytes);

impl RawFrame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// A frame that passed [`Frame::validate`]. Decoders only accept this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    raw: RawFrame,
    command: Command,
}

impl Frame {
    /// Check start/end signatures, the declared length and the echoed
    /// command code. Says nothing about the payload.
    pub fn validate(raw: RawFrame, command: Command) -> Result<Self> {
        let data = raw.as_bytes();
        let invalid = |reason: String| ProtocolError::InvalidFrame {
            reason,
            command,
            raw_for_debug: raw.hex(),
        };

        if data.len() < HEADER_LEN + TERMINATOR.len() {
            return Err(invalid(format!("frame too short ({} bytes)", data.len())));
        }

        if !data.starts_with(START_MARKER) {
            return Err(invalid(format!(
                "incorrect start signature {:?} != \"APS\"",
                String::from_utf8_lossy(&data[..START_MARKER.len()])
            )));
        }

        let end = &data[data.len() - TERMINATOR.len()..data.len() - 1];
        if end != END_MARKER {
            return Err(invalid(format!(
                "incorrect end signature {:?} != \"END\"",
                String::from_utf8_lossy(end)
            )));
        }

        let declared = codec::read_ascii_number(data, LENGTH_OFFSET, LENGTH_DIGITS)
            .map_err(|e| invalid(format!("unreadable length field: {}", e)))?;
        let datalen = data.len() - 1;
        if declared != datalen {
            return Err(invalid(format!(
                "checksum failed: declared={} datalen={}",
                declared, datalen
            )));
        }

        let code = codec::read_ascii_number(data, CODE_OFFSET, CODE_DIGITS)
            .map_err(|e| invalid(format!("unreadable command code: {}", e)))?;
        match u16::try_from(code).ok().map(CommandCode::try_from) {
            Some(Ok(code)) if code == command.code() => {}
            _ => {
                return Err(invalid(format!(
                    "response code {:04} does not answer {:?}",
                    code,
                    command.code()
                )))
            }
        }

        Ok(Self { raw, command })
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }

    pub fn raw(&self) -> &RawFrame {
        &self.raw
    }

    /// Bytes before the `END\n` terminator.
    pub fn payload(&self) -> &[u8] {
        let data = self.raw.as_bytes();
        &data[..data.len() - TERMINATOR.len()]
    }
}

/// Splits a byte stream into frames at the `END\n` terminator.
///
/// The ECU sends exactly one frame per command, so a frame is complete when
/// the buffered bytes end with the terminator. Binary payloads may contain the
/// terminator sequence, which is why only the tail of the buffer is checked.
#[derive(Debug, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameDecoder {
    type Item = RawFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() >= TERMINATOR.len() && src.ends_with(TERMINATOR) {
            let frame = src.split_to(src.len()).freeze();
            return Ok(Some(RawFrame::new(frame)));
        }

        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => Err(ProtocolError::ConnectionClosed {
                partial_bytes: src.len(),
            }),
        }
    }
}
