//! Per-command payload decoding. Every function takes a validated [`Frame`].

use crate::ecu::codec::Cursor;
use crate::ecu::command::{EcuId, ECU_ID_LEN};
use crate::ecu::frame::Frame;
use crate::ecu::model::{self, InverterReading};
use crate::ecu::snapshot::{EcuSnapshot, InverterRecord, TIMESTAMP_FORMAT};
use crate::error::{ProtocolError, Result};

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use log::debug;
use std::collections::HashMap;

// device-info
const ECU_ID_OFFSET: usize = 13;
const LIFETIME_ENERGY_OFFSET: usize = 27;
const CURRENT_POWER_OFFSET: usize = 31;
const TODAY_ENERGY_OFFSET: usize = 35;
const INVERTER_COUNT_OFFSET: usize = 46;
const FIRMWARE_OFFSET: usize = 52;
const TEXT_LEN_DIGITS: usize = 3;

// inverter-data
const STATUS_OFFSET: usize = 14;
const STATUS_OK: &str = "001";
const INVERTER_QTY_OFFSET: usize = 17;
const TIMESTAMP_OFFSET: usize = 19;
const INVERTER_RECORDS_OFFSET: usize = 26;

// signal-strength
const SIGNAL_RECORDS_OFFSET: usize = 15;

/// Signal percentage per inverter uid.
pub type SignalMap = HashMap<String, u8>;

pub fn decode_ecu_info(frame: &Frame) -> Result<EcuSnapshot> {
    let data = frame.payload();

    let mut cursor = Cursor::at(data, ECU_ID_OFFSET);
    let id_text = cursor.ascii(ECU_ID_LEN)?;
    let ecu_id = EcuId::new(id_text.as_bytes()).map_err(|_| {
        ProtocolError::malformed(ECU_ID_OFFSET, format!("ECU id {:?} is not 12 digits", id_text))
    })?;

    let lifetime_energy = f64::from(Cursor::at(data, LIFETIME_ENERGY_OFFSET).u32()?) / 10.0;
    let current_power = Cursor::at(data, CURRENT_POWER_OFFSET).u32()?;
    let today_energy = f64::from(Cursor::at(data, TODAY_ENERGY_OFFSET).u32()?) / 100.0;

    let mut cursor = Cursor::at(data, INVERTER_COUNT_OFFSET);
    let inverter_count = cursor.u16()?;
    let inverter_online_count = cursor.u16()?;

    let mut cursor = Cursor::at(data, FIRMWARE_OFFSET);
    let firmware = cursor.length_prefixed_ascii(TEXT_LEN_DIGITS)?;
    let timezone = cursor.length_prefixed_ascii(TEXT_LEN_DIGITS)?;

    Ok(EcuSnapshot {
        ecu_id,
        firmware,
        timezone,
        lifetime_energy,
        today_energy,
        current_power,
        inverter_count,
        inverter_online_count,
    })
}

/// Inverter-data frame contents, waiting for the signal map.
#[derive(Clone, Debug, PartialEq)]
pub struct InverterData {
    pub timestamp: NaiveDateTime,
    pub readings: Vec<InverterReading>,
}

impl InverterData {
    /// Attach signal strength; inverters missing from `signals` get 0.
    pub fn into_records(self, signals: &SignalMap) -> IndexMap<String, InverterRecord> {
        self.readings
            .into_iter()
            .map(|reading| {
                let signal = signals.get(&reading.uid).copied().unwrap_or(0);
                (reading.uid.clone(), reading.into_record(signal))
            })
            .collect()
    }
}

pub fn decode_inverter_data(frame: &Frame) -> Result<InverterData> {
    let data = frame.payload();

    // anything else is a "no data" reply and carries no readings
    let status = Cursor::at(data, STATUS_OFFSET).ascii(STATUS_OK.len())?;
    if status != STATUS_OK {
        return Err(ProtocolError::malformed(
            STATUS_OFFSET,
            format!("inverter data status {:?}, expected {:?}", status, STATUS_OK),
        ));
    }

    let qty = Cursor::at(data, INVERTER_QTY_OFFSET).u16()?;
    let text = Cursor::at(data, TIMESTAMP_OFFSET).packed_timestamp()?;
    let timestamp = NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT).map_err(|e| {
        ProtocolError::malformed(TIMESTAMP_OFFSET, format!("timestamp {:?}: {}", text, e))
    })?;

    let mut cursor = Cursor::at(data, INVERTER_RECORDS_OFFSET);
    let mut readings: Vec<InverterReading> = Vec::with_capacity(usize::from(qty));
    for n in 0..qty {
        let at = cursor.position();
        let reading = model::decode_inverter(&mut cursor)?;
        if readings.iter().any(|r| r.uid == reading.uid) {
            return Err(ProtocolError::malformed(
                at,
                format!("inverter {} reported twice", reading.uid),
            ));
        }
        debug!(
            "inverter {}/{}: {} {} online={}",
            n + 1,
            qty,
            reading.uid,
            reading.model,
            reading.online
        );
        readings.push(reading);
    }

    Ok(InverterData {
        timestamp,
        readings,
    })
}

/// `inverter_count` comes from the device-info frame; the signal frame
/// does not carry its own count.
pub fn decode_signal_data(frame: &Frame, inverter_count: u16) -> Result<SignalMap> {
    let data = frame.payload();
    let mut signals = SignalMap::with_capacity(usize::from(inverter_count));

    if inverter_count == 0 {
        return Ok(signals);
    }

    let mut cursor = Cursor::at(data, SIGNAL_RECORDS_OFFSET);
    for _ in 0..inverter_count {
        let uid = cursor.hex_id()?;
        let raw = cursor.u8()?;
        signals.insert(uid, signal_percent(raw));
    }

    Ok(signals)
}

pub fn signal_percent(raw: u8) -> u8 {
    (f64::from(raw) / 255.0 * 100.0).round() as u8
}
