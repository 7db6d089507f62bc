//! Inverter models and their per-record byte layouts.
//!
//! Every inverter record in an inverter-data frame starts with the same
//! 13-byte header. What follows depends on the model family, which is chosen
//! by the first three digits of the uid through [`MODEL_TABLE`]. Adding a
//! device means adding a table row; the decoder itself has no per-model code.

use crate::ecu::codec::Cursor;
use crate::ecu::snapshot::InverterRecord;
use crate::error::{ProtocolError, Result};

use serde::Serialize;

/// uid (6) + online (1) + reserved (2) + frequency (2) + temperature (2)
pub const RECORD_HEADER_LEN: usize = 13;

const TEMPERATURE_OFFSET: i32 = 100;
const FIELD_WIDTH: usize = 2;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum Model {
    #[serde(rename = "YC600")]
    Yc600,
    #[serde(rename = "DS3")]
    Ds3,
    #[serde(rename = "QS1")]
    Qs1,
    #[serde(rename = "YC1000")]
    Yc1000,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Family {
    /// power, voltage, power, voltage
    TwoChannel,
    /// power, voltage, then three more power readings sharing that voltage
    FourChannelSingleVoltage,
    /// power, voltage for each of four channels
    FourChannel,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Field {
    Power,
    Voltage,
}

/// Fields following the record header, in wire order. Each is a big-endian u16.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Layout {
    pub channels: u8,
    pub fields: &'static [Field],
}

impl Layout {
    pub fn byte_len(&self) -> usize {
        self.fields.len() * FIELD_WIDTH
    }
}

use Field::{Power as P, Voltage as V};

const TWO_CHANNEL: Layout = Layout {
    channels: 2,
    fields: &[P, V, P, V],
};
const FOUR_CHANNEL_SINGLE_VOLTAGE: Layout = Layout {
    channels: 4,
    fields: &[P, V, P, P, P],
};
const FOUR_CHANNEL: Layout = Layout {
    channels: 4,
    fields: &[P, V, P, V, P, V, P, V],
};

pub const MODEL_TABLE: &[(&str, Model)] = &[
    ("402", Model::Yc600),
    ("406", Model::Yc600),
    ("407", Model::Yc600),
    ("408", Model::Yc600),
    ("409", Model::Yc600),
    ("703", Model::Ds3),
    ("704", Model::Ds3),
    ("801", Model::Qs1),
    ("802", Model::Qs1),
    ("804", Model::Qs1),
    ("501", Model::Yc1000),
    ("502", Model::Yc1000),
    ("503", Model::Yc1000),
    ("504", Model::Yc1000),
];

impl Model {
    pub fn from_prefix(prefix: &str) -> Result<Self> {
        MODEL_TABLE
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, model)| *model)
            .ok_or_else(|| ProtocolError::UnsupportedModel {
                prefix: prefix.to_string(),
            })
    }

    pub fn from_uid(uid: &str) -> Result<Self> {
        Self::from_prefix(uid.get(..3).unwrap_or(uid))
    }

    pub fn family(&self) -> Family {
        match self {
            Self::Yc600 | Self::Ds3 => Family::TwoChannel,
            Self::Qs1 => Family::FourChannelSingleVoltage,
            Self::Yc1000 => Family::FourChannel,
        }
    }

    pub fn layout(&self) -> Layout {
        match self.family() {
            Family::TwoChannel => TWO_CHANNEL,
            Family::FourChannelSingleVoltage => FOUR_CHANNEL_SINGLE_VOLTAGE,
            Family::FourChannel => FOUR_CHANNEL,
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Yc600 => "YC600",
            Self::Ds3 => "DS3",
            Self::Qs1 => "QS1",
            Self::Yc1000 => "YC1000",
        };
        write!(f, "{}", name)
    }
}

/// One inverter record before the signal frame has been merged in.
#[derive(Clone, Debug, PartialEq)]
pub struct InverterReading {
    pub uid: String,
    pub online: bool,
    pub model: Model,
    pub frequency: f64,
    pub temperature: i32,
    pub power: Vec<u16>,
    pub voltage: Vec<u16>,
}

impl InverterReading {
    pub fn into_record(self, signal: u8) -> InverterRecord {
        InverterRecord {
            channel_qty: self.model.layout().channels,
            uid: self.uid,
            online: self.online,
            model: self.model,
            power: self.power,
            voltage: self.voltage,
            frequency: self.frequency,
            temperature: self.temperature,
            signal,
        }
    }
}

/// Decode one inverter record at the cursor.
///
/// On success the cursor sits on the next record. An unknown model fails
/// with the cursor just past the header, since the record length is unknown.
pub fn decode_inverter(cursor: &mut Cursor) -> Result<InverterReading> {
    let uid = cursor.hex_id()?;
    let online = cursor.flag()?;
    cursor.skip(2)?;
    let frequency = f64::from(cursor.u16()?) / 10.0;
    let temperature = i32::from(cursor.u16()?) - TEMPERATURE_OFFSET;

    let model = Model::from_uid(&uid)?;
    let layout = model.layout();

    // check up front so a short record does not leave a half-read layout
    if cursor.remaining() < layout.byte_len() {
        return Err(ProtocolError::malformed(
            cursor.position(),
            format!(
                "{} record {} needs {} bytes, {} left",
                model,
                uid,
                layout.byte_len(),
                cursor.remaining()
            ),
        ));
    }

    let mut power = Vec::with_capacity(usize::from(layout.channels));
    let mut voltage = Vec::with_capacity(usize::from(layout.channels));
    for field in layout.fields {
        let value = cursor.u16()?;
        match field {
            Field::Power => power.push(value),
            Field::Voltage => voltage.push(value),
        }
    }

    Ok(InverterReading {
        uid,
        online,
        model,
        frequency,
        temperature,
        power,
        voltage,
    })
}
