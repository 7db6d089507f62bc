use crate::ecu::command::EcuId;
use crate::ecu::model::Model;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Serialize;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identity and aggregate energy of the ECU, from the device-info frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EcuSnapshot {
    pub ecu_id: EcuId,
    pub firmware: String,
    pub timezone: String,
    /// kWh
    pub lifetime_energy: f64,
    /// kWh
    pub today_energy: f64,
    /// W
    pub current_power: u32,
    pub inverter_count: u16,
    pub inverter_online_count: u16,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InverterRecord {
    pub uid: String,
    pub online: bool,
    pub model: Model,
    pub channel_qty: u8,
    pub power: Vec<u16>,
    pub voltage: Vec<u16>,
    /// Hz
    pub frequency: f64,
    /// °C
    pub temperature: i32,
    /// percent, 0 when the signal frame did not mention this inverter
    pub signal: u8,
}

/// Result of one complete query cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: NaiveDateTime,
    pub ecu: EcuSnapshot,
    /// Keyed by uid, in the order the ECU reported them.
    pub inverters: IndexMap<String, InverterRecord>,
}

impl TelemetrySnapshot {
    pub fn inverter(&self, uid: &str) -> Option<&InverterRecord> {
        self.inverters.get(uid)
    }

    pub fn online_inverters(&self) -> impl Iterator<Item = &InverterRecord> {
        self.inverters.values().filter(|i| i.online)
    }

    /// Sum of all channel power across online inverters, in watts.
    pub fn total_power(&self) -> u32 {
        self.online_inverters()
            .flat_map(|i| i.power.iter())
            .map(|&p| u32::from(p))
            .sum()
    }
}

fn serialize_timestamp<S>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
}
