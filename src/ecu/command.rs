use crate::error::{ProtocolError, Result};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Serialize, Serializer};

/// Every command and every response ends with this.
pub const COMMAND_SUFFIX: &str = "END\n";

pub const ECU_ID_LEN: usize = 12;

/// The three queries an ECU answers, in the order they must be issued.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    DeviceInfo,
    InverterData,
    SignalStrength,
}

impl Command {
    pub const ALL: [Command; 3] = [
        Command::DeviceInfo,
        Command::InverterData,
        Command::SignalStrength,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::DeviceInfo => "APS1100160001",
            Self::InverterData => "APS1100280002",
            Self::SignalStrength => "APS1100280030",
        }
    }

    pub fn code(&self) -> CommandCode {
        match self {
            Self::DeviceInfo => CommandCode::DeviceInfo,
            Self::InverterData => CommandCode::InverterData,
            Self::SignalStrength => CommandCode::SignalStrength,
        }
    }

    pub fn needs_ecu_id(&self) -> bool {
        !matches!(self, Self::DeviceInfo)
    }

    pub fn index(&self) -> usize {
        match self {
            Self::DeviceInfo => 0,
            Self::InverterData => 1,
            Self::SignalStrength => 2,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DeviceInfo => "device-info",
            Self::InverterData => "inverter-data",
            Self::SignalStrength => "signal-strength",
        };
        write!(f, "{}", name)
    }
}

// CommandCode {{{
/// Numeric command code, echoed by the ECU as four ASCII digits at offset 9.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum CommandCode {
    DeviceInfo = 1,
    InverterData = 2,
    SignalStrength = 30,
}
// }}}

// EcuId {{{
/// 12 ASCII digits identifying one ECU. Commands after device-info carry it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EcuId([u8; ECU_ID_LEN]);

impl EcuId {
    pub fn new(input: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: [u8; ECU_ID_LEN] = input.try_into().map_err(|_| {
            ProtocolError::malformed(
                0,
                format!("ECU id must be {} bytes, got {}", ECU_ID_LEN, input.len()),
            )
        })?;
        if !bytes.iter().all(u8::is_ascii_digit) {
            return Err(ProtocolError::malformed(
                0,
                format!("ECU id {:?} is not numeric", String::from_utf8_lossy(&bytes)),
            ));
        }
        Ok(Self(bytes))
    }

    pub fn data(&self) -> [u8; ECU_ID_LEN] {
        self.0
    }

    pub fn as_str(&self) -> &str {
        // only constructed from ASCII digits
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl Serialize for EcuId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl std::str::FromStr for EcuId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.as_bytes())
    }
}

impl std::fmt::Display for EcuId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Debug for EcuId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
} // }}}

/// A command ready to be put on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Request {
    DeviceInfo,
    InverterData(EcuId),
    SignalStrength(EcuId),
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Self::DeviceInfo => Command::DeviceInfo,
            Self::InverterData(_) => Command::InverterData,
            Self::SignalStrength(_) => Command::SignalStrength,
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        let command = self.command();
        let mut r = Vec::with_capacity(command.prefix().len() + ECU_ID_LEN + COMMAND_SUFFIX.len());

        r.extend_from_slice(command.prefix().as_bytes());
        match self {
            Self::DeviceInfo => {}
            Self::InverterData(ecu_id) | Self::SignalStrength(ecu_id) => {
                r.extend_from_slice(&ecu_id.data())
            }
        }
        r.extend_from_slice(COMMAND_SUFFIX.as_bytes());

        r
    }
}
