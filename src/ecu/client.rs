use crate::ecu::command::{Command, Request};
use crate::ecu::connection::{Connection, Transport, DEFAULT_PORT};
use crate::ecu::decode;
use crate::ecu::frame::Frame;
use crate::ecu::snapshot::TelemetrySnapshot;
use crate::error::{ProtocolError, Result};

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

const ERROR_LOG_CAPACITY: usize = 256;

// ClientSettings {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    /// Deadline for one whole response frame.
    pub read_timeout: Duration,
    pub reopen_delay: Duration,
    /// Per command, including the first try.
    pub max_attempts: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            reopen_delay: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
} // }}}

// ErrorLog {{{
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorEntry {
    pub at: DateTime<Local>,
    pub message: String,
}

impl std::fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} : {}", self.at.format("%Y-%m-%d %H:%M:%S"), self.message)
    }
}

/// Timestamped failures kept for diagnostics. Oldest entries are dropped
/// once the log is full.
#[derive(Clone, Debug)]
pub struct ErrorLog {
    entries: VecDeque<ErrorEntry>,
    capacity: usize,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::with_capacity(ERROR_LOG_CAPACITY)
    }
}

impl ErrorLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(ERROR_LOG_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ErrorEntry {
            at: Local::now(),
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ErrorEntry> {
        self.entries.iter()
    }
} // }}}

// DebugRecord {{{
/// What happened to one command during the most recent query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FrameTrace {
    pub command: Command,
    pub attempts: u32,
    /// Hex of the last bytes received for this command, valid or not.
    pub raw_hex: Option<String>,
}

impl FrameTrace {
    fn new(command: Command) -> Self {
        Self {
            command,
            attempts: 0,
            raw_hex: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DebugRecord {
    pub frames: Vec<FrameTrace>,
    pub errors: Vec<String>,
    pub last_known_good: Option<TelemetrySnapshot>,
}
// }}}

/// Talks to one ECU. `query` takes `&mut self`, so one client never runs two
/// exchanges at once.
pub struct EcuClient<T: Transport = Connection> {
    transport: T,
    settings: ClientSettings,
    traces: Vec<FrameTrace>,
    errors: ErrorLog,
    last_known_good: Option<TelemetrySnapshot>,
}

impl EcuClient<Connection> {
    pub fn new(host: impl Into<String>, port: u16, settings: ClientSettings) -> Self {
        let transport = Connection::new(
            host,
            port,
            settings.connect_timeout,
            settings.reopen_delay,
        );
        Self::with_transport(transport, settings)
    }

    pub fn with_host(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_PORT, ClientSettings::default())
    }
}

impl<T: Transport> EcuClient<T> {
    pub fn with_transport(transport: T, settings: ClientSettings) -> Self {
        Self {
            transport,
            settings,
            traces: Vec::new(),
            errors: ErrorLog::default(),
            last_known_good: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Run the device-info, inverter-data, signal-strength exchange.
    ///
    /// Either every command succeeds and a complete snapshot is returned, or
    /// the first unrecoverable error is. The connection is closed either way.
    pub async fn query(&mut self) -> Result<TelemetrySnapshot> {
        self.traces.clear();

        let result = self.exchange().await;
        self.transport.close().await;

        match &result {
            Ok(snapshot) => {
                info!(
                    "ECU {}: {} inverters, {}W now, {}kWh today",
                    snapshot.ecu.ecu_id,
                    snapshot.inverters.len(),
                    snapshot.ecu.current_power,
                    snapshot.ecu.today_energy
                );
                self.last_known_good = Some(snapshot.clone());
            }
            Err(e) => {
                error!("ECU query failed: {}", e);
                self.errors.push(e.to_string());
            }
        }

        result
    }

    pub fn last_known_good(&self) -> Option<&TelemetrySnapshot> {
        self.last_known_good.as_ref()
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn dump(&self) -> DebugRecord {
        DebugRecord {
            frames: self.traces.clone(),
            errors: self.errors.entries().map(|e| e.to_string()).collect(),
            last_known_good: self.last_known_good.clone(),
        }
    }

    async fn exchange(&mut self) -> Result<TelemetrySnapshot> {
        let ecu = self
            .execute(Request::DeviceInfo, decode::decode_ecu_info)
            .await?;

        if ecu.lifetime_energy == 0.0 {
            return Err(ProtocolError::ZeroEnergyAnomaly {
                ecu_id: ecu.ecu_id.to_string(),
            });
        }

        self.reopen_between_commands().await;
        let inverter_data = self
            .execute(
                Request::InverterData(ecu.ecu_id),
                decode::decode_inverter_data,
            )
            .await?;

        self.reopen_between_commands().await;
        let inverter_count = ecu.inverter_count;
        let signals = self
            .execute(Request::SignalStrength(ecu.ecu_id), move |frame| {
                decode::decode_signal_data(frame, inverter_count)
            })
            .await?;

        Ok(TelemetrySnapshot {
            timestamp: inverter_data.timestamp,
            inverters: inverter_data.into_records(&signals),
            ecu,
        })
    }

    // the ECU wants a fresh connection for every command
    async fn reopen_between_commands(&mut self) {
        if let Err(e) = self.transport.reopen().await {
            warn!("reconnect between commands failed: {}", e);
            self.errors.push(format!("reconnect between commands: {}", e));
        }
    }

    /// Attempt `request` until it yields a decoded value or the budget is
    /// spent. Any failure, transport or decode, costs one attempt and a
    /// reconnect.
    async fn execute<O, F>(&mut self, request: Request, decode: F) -> Result<O>
    where
        F: Fn(&Frame) -> Result<O> + Send + Sync,
        O: Send,
    {
        let command = request.command();
        let bytes = request.bytes();
        let max_attempts = self.settings.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            self.trace_mut(command).attempts = attempt;

            let err = match self.attempt(command, &bytes, &decode).await {
                Ok(value) => {
                    debug!("{}: ok after {} attempt(s)", command, attempt);
                    return Ok(value);
                }
                Err(err) => err,
            };

            if attempt >= max_attempts {
                return Err(ProtocolError::CommandExhausted {
                    command,
                    attempts: attempt,
                    last_error: Box::new(err),
                });
            }

            warn!("{}: attempt {}/{} failed: {}", command, attempt, max_attempts, err);
            self.errors
                .push(format!("{} attempt {}: {}", command, attempt, err));

            // a failed reopen is not fatal here; the next attempt opens again
            // and that failure is what gets counted
            if let Err(e) = self.transport.reopen().await {
                debug!("{}: reconnect failed: {}", command, e);
            }
            attempt += 1;
        }
    }

    async fn attempt<O, F>(&mut self, command: Command, bytes: &[u8], decode: &F) -> Result<O>
    where
        F: Fn(&Frame) -> Result<O> + Send + Sync,
        O: Send,
    {
        if !self.transport.is_open() {
            self.transport.open().await?;
        }

        self.transport.send(bytes).await?;
        let raw = self.transport.read_frame(self.settings.read_timeout).await?;
        self.trace_mut(command).raw_hex = Some(raw.hex());

        let frame = Frame::validate(raw, command)?;
        decode(&frame)
    }

    fn trace_mut(&mut self, command: Command) -> &mut FrameTrace {
        if let Some(i) = self.traces.iter().position(|t| t.command == command) {
            return &mut self.traces[i];
        }
        self.traces.push(FrameTrace::new(command));
        let last = self.traces.len() - 1;
        &mut self.traces[last]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_drops_oldest_when_full() {
        let mut log = ErrorLog::with_capacity(2);
        log.push("one");
        log.push("two");
        log.push("three");
        let messages: Vec<&str> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["two", "three"]);
    }

    #[test]
    fn error_entry_display_has_timestamp_prefix() {
        let mut log = ErrorLog::default();
        log.push("boom");
        let line = log.entries().next().unwrap().to_string();
        assert!(line.ends_with(" : boom"));
        assert_eq!(line.len(), "2024-01-01 00:00:00 : boom".len());
    }

    #[test]
    fn default_settings() {
        let s = ClientSettings::default();
        assert_eq!(s.connect_timeout, Duration::from_secs(10));
        assert_eq!(s.read_timeout, Duration::from_secs(10));
        assert_eq!(s.reopen_delay, Duration::from_secs(5));
        assert_eq!(s.max_attempts, 3);
    }
}
