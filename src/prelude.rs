pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use tokio::sync::broadcast;

pub use crate::channels::{ChannelData, Channels, Control};
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::coordinator::{Coordinator, Update};
pub use crate::diagnostics::DiagnosticsWriter;
pub use crate::ecu::{
    ClientSettings, Command, DebugRecord, EcuClient, EcuId, EcuSnapshot, InverterRecord, Model,
    TelemetrySnapshot, Transport,
};
pub use crate::error::ProtocolError;
pub use crate::options::Options;
