//! APsystems ECU protocol: framing, the three-command exchange and the
//! binary layouts of its responses.

pub mod client;
pub mod codec;
pub mod command;
pub mod connection;
pub mod decode;
pub mod frame;
pub mod model;
pub mod reader;
pub mod snapshot;

pub use client::{ClientSettings, DebugRecord, EcuClient, ErrorLog, FrameTrace};
pub use command::{Command, EcuId};
pub use connection::{Connection, Transport};
pub use frame::{Frame, RawFrame};
pub use model::Model;
pub use snapshot::{EcuSnapshot, InverterRecord, TelemetrySnapshot};
