//! Field extraction from ECU frames.
//!
//! ECU frames mix three encodings: big-endian binary integers, ASCII text
//! (with ASCII-decimal length prefixes), and packed hex digits for identifiers
//! and timestamps. The free functions read one field at an absolute offset;
//! [`Cursor`] walks a frame front to back and refuses to read past its end.
//!
//! Every read fails with [`ProtocolError::MalformedField`] instead of
//! returning a default, so garbage bytes never turn into plausible telemetry.

use crate::error::{ProtocolError, Result};

use nom::{bytes::complete::take, multi::fold_many_m_n, number::complete::be_u8, IResult};

/// Bytes in an inverter UID (12 hex characters).
pub const HEX_ID_LEN: usize = 6;

/// Bytes in a packed `YYYYMMDDHHMMSS` timestamp (14 hex digits).
pub const PACKED_TIMESTAMP_LEN: usize = 7;

fn take_at(buf: &[u8], at: usize, width: usize) -> Result<&[u8]> {
    let input = buf.get(at..).ok_or_else(|| {
        ProtocolError::malformed(at, format!("offset beyond frame of {} bytes", buf.len()))
    })?;

    let parsed: IResult<&[u8], &[u8]> = take(width)(input);
    match parsed {
        Ok((_, bytes)) => Ok(bytes),
        Err(_) => Err(ProtocolError::malformed(
            at,
            format!("need {} bytes, {} available", width, input.len()),
        )),
    }
}

/// Big-endian unsigned integer of `width` bytes (1 to 8).
pub fn read_uint(buf: &[u8], at: usize, width: usize) -> Result<u64> {
    if width == 0 || width > 8 {
        return Err(ProtocolError::malformed(
            at,
            format!("unsupported integer width {}", width),
        ));
    }

    let bytes = take_at(buf, at, width)?;
    let parsed: IResult<&[u8], u64> = fold_many_m_n(
        width,
        width,
        be_u8,
        || 0u64,
        |acc, byte| (acc << 8) | u64::from(byte),
    )(bytes);

    parsed
        .map(|(_, value)| value)
        .map_err(|_| ProtocolError::malformed(at, format!("bad {}-byte integer", width)))
}

/// `len` bytes of free text such as firmware or timezone. Bytes that are not
/// valid UTF-8 become U+FFFD instead of failing the frame.
pub fn read_ascii(buf: &[u8], at: usize, len: usize) -> Result<String> {
    take_at(buf, at, len).map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

/// ASCII decimal number of `len` digits, e.g. the `"015"` firmware length.
pub fn read_ascii_number(buf: &[u8], at: usize, len: usize) -> Result<usize> {
    let bytes = take_at(buf, at, len)?;
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::malformed(
            at,
            format!("{} is not a decimal number", hex::encode(bytes)),
        ));
    }
    let text = String::from_utf8_lossy(bytes);
    text.parse()
        .map_err(|e| ProtocolError::malformed(at, format!("{:?}: {}", text, e)))
}

/// Lowercase hex rendering of a 6-byte inverter id.
pub fn read_hex_id(buf: &[u8], at: usize) -> Result<String> {
    take_at(buf, at, HEX_ID_LEN).map(hex::encode)
}

/// Packed BCD-style timestamp rendered as `YYYY-MM-DD HH:MM:SS`.
pub fn read_packed_timestamp(buf: &[u8], at: usize) -> Result<String> {
    let digits = hex::encode(take_at(buf, at, PACKED_TIMESTAMP_LEN)?);
    Ok(format!(
        "{}-{}-{} {}:{}:{}",
        &digits[0..4],
        &digits[4..6],
        &digits[6..8],
        &digits[8..10],
        &digits[10..12],
        &digits[12..14]
    ))
}

/// Any non-zero byte is `true`.
pub fn read_bool_flag(buf: &[u8], at: usize) -> Result<bool> {
    take_at(buf, at, 1).map(|b| b[0] != 0)
}

/// A read position over one frame.
///
/// Decoders take `&mut Cursor` and leave it exactly after the bytes they
/// consumed, so a model-specific layout cannot leave the next record
/// misaligned without failing loudly at the end of the frame.
#[derive(Clone, Copy, Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        take_at(self.buf, self.pos, n)?;
        self.pos += n;
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        let v = read_uint(self.buf, self.pos, 1)?;
        self.pos += 1;
        Ok(v as u8)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let v = read_uint(self.buf, self.pos, 2)?;
        self.pos += 2;
        Ok(v as u16)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let v = read_uint(self.buf, self.pos, 4)?;
        self.pos += 4;
        Ok(v as u32)
    }

    pub fn flag(&mut self) -> Result<bool> {
        let v = read_bool_flag(self.buf, self.pos)?;
        self.pos += 1;
        Ok(v)
    }

    pub fn ascii(&mut self, len: usize) -> Result<String> {
        let v = read_ascii(self.buf, self.pos, len)?;
        self.pos += len;
        Ok(v)
    }

    pub fn ascii_number(&mut self, len: usize) -> Result<usize> {
        let v = read_ascii_number(self.buf, self.pos, len)?;
        self.pos += len;
        Ok(v)
    }

    /// ASCII-decimal length of `len_digits` digits followed by that much text.
    pub fn length_prefixed_ascii(&mut self, len_digits: usize) -> Result<String> {
        let len = self.ascii_number(len_digits)?;
        self.ascii(len)
    }

    pub fn hex_id(&mut self) -> Result<String> {
        let v = read_hex_id(self.buf, self.pos)?;
        self.pos += HEX_ID_LEN;
        Ok(v)
    }

    pub fn packed_timestamp(&mut self) -> Result<String> {
        let v = read_packed_timestamp(self.buf, self.pos)?;
        self.pos += PACKED_TIMESTAMP_LEN;
        Ok(v)
    }
}
