use crate::prelude::*;

/// Coordinator -> consumers.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    Update(Update),
    /// Query failed and no cached snapshot could stand in.
    Failed(String),
    Shutdown,
}

/// Consumers -> coordinator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Control {
    StartQuery,
    StopQuery,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct Channels {
    pub from_coordinator: broadcast::Sender<ChannelData>,
    pub to_coordinator: broadcast::Sender<Control>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            from_coordinator: Self::channel(),
            to_coordinator: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(256).0
    }
}
