use crate::ecu::command::Command;
use std::time::Duration;

/// Everything that can go wrong while talking to an ECU.
///
/// The first three variants are transport failures and are worth retrying on
/// a fresh connection. The rest mean a frame arrived but could not be
/// trusted or understood.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Connect refused, unreachable host, connect timeout or a failed write.
    #[error("connection to {addr} failed: {reason}")]
    Connection { addr: String, reason: String },

    #[error("no frame terminator within {}ms ({partial_bytes} bytes buffered)", .timeout.as_millis())]
    FrameTimeout {
        partial_bytes: usize,
        timeout: Duration,
    },

    #[error("connection closed by ECU after {partial_bytes} bytes")]
    ConnectionClosed { partial_bytes: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing check failed. `raw_for_debug` is the hex of the whole frame.
    #[error("invalid {command} frame: {reason}")]
    InvalidFrame {
        reason: String,
        command: Command,
        raw_for_debug: String,
    },

    #[error("malformed field at offset {offset}: {reason}")]
    MalformedField { offset: usize, reason: String },

    #[error("unsupported inverter model prefix {prefix}")]
    UnsupportedModel { prefix: String },

    #[error("ECU {ecu_id} reported zero lifetime energy")]
    ZeroEnergyAnomaly { ecu_id: String },

    #[error("{command} failed after {attempts} attempts: {last_error}")]
    CommandExhausted {
        command: Command,
        attempts: u32,
        last_error: Box<ProtocolError>,
    },
}

impl ProtocolError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::FrameTimeout { .. }
                | Self::ConnectionClosed { .. }
                | Self::Io(_)
        )
    }

    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedField {
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_transient() {
        let timeout = ProtocolError::FrameTimeout {
            partial_bytes: 12,
            timeout: Duration::from_secs(10),
        };
        assert!(timeout.is_transient());
        assert!(ProtocolError::ConnectionClosed { partial_bytes: 0 }.is_transient());
        assert!(!ProtocolError::malformed(27, "short").is_transient());
        assert!(!ProtocolError::UnsupportedModel {
            prefix: "999".to_string()
        }
        .is_transient());
    }

    #[test]
    fn display_exhausted_includes_last_error() {
        let e = ProtocolError::CommandExhausted {
            command: Command::InverterData,
            attempts: 3,
            last_error: Box::new(ProtocolError::FrameTimeout {
                partial_bytes: 40,
                timeout: Duration::from_millis(1500),
            }),
        };
        assert_eq!(
            e.to_string(),
            "inverter-data failed after 3 attempts: no frame terminator within 1500ms (40 bytes buffered)"
        );
    }
}
