use crate::prelude::*;

use crate::ecu::Connection;
use std::time::Duration;

/// Outcome of one [`Coordinator::update`].
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    Fresh(TelemetrySnapshot),
    /// The query failed; the last good snapshot stands in for it.
    Cached {
        snapshot: TelemetrySnapshot,
        reason: String,
        consecutive_failures: u32,
    },
    /// Querying is stopped; nothing was sent to the ECU.
    Paused(TelemetrySnapshot),
}

impl Update {
    pub fn snapshot(&self) -> &TelemetrySnapshot {
        match self {
            Self::Fresh(snapshot) | Self::Paused(snapshot) => snapshot,
            Self::Cached { snapshot, .. } => snapshot,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

/// Owns the client and decides what to publish when a query fails.
pub struct Coordinator<T: Transport = Connection> {
    client: EcuClient<T>,
    channels: Channels,
    poll_interval: Duration,
    cache_max: u32,
    querying: bool,
    cached: Option<TelemetrySnapshot>,
    consecutive_failures: u32,
    diagnostics: Option<DiagnosticsWriter>,
}

impl Coordinator<Connection> {
    pub fn new(config: &ConfigWrapper, channels: Channels) -> Result<Self> {
        let mut coordinator = Self::with_client(
            config.ecu().client(),
            channels,
            config.poll_interval(),
            config.cache_max(),
        );

        if let Some(path) = config.diagnostics_file() {
            coordinator = coordinator.with_diagnostics(DiagnosticsWriter::new(&path)?);
        }

        Ok(coordinator)
    }
}

impl<T: Transport> Coordinator<T> {
    pub fn with_client(
        client: EcuClient<T>,
        channels: Channels,
        poll_interval: Duration,
        cache_max: u32,
    ) -> Self {
        Self {
            client,
            channels,
            poll_interval,
            cache_max,
            querying: true,
            cached: None,
            consecutive_failures: 0,
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, writer: DiagnosticsWriter) -> Self {
        self.diagnostics = Some(writer);
        self
    }

    pub fn client(&self) -> &EcuClient<T> {
        &self.client
    }

    pub fn cached(&self) -> Option<&TelemetrySnapshot> {
        self.cached.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_querying(&self) -> bool {
        self.querying
    }

    pub fn stop_query(&mut self) {
        if self.querying {
            info!("ECU querying stopped");
        }
        self.querying = false;
    }

    pub fn start_query(&mut self) {
        if !self.querying {
            info!("ECU querying started");
        }
        self.querying = true;
    }

    pub async fn update(&mut self) -> Result<Update> {
        if !self.querying {
            return match &self.cached {
                Some(snapshot) => {
                    debug!("querying stopped, using cached data");
                    Ok(Update::Paused(snapshot.clone()))
                }
                None => bail!("querying is stopped and there is no cached data"),
            };
        }

        match self.client.query().await {
            Ok(snapshot) => {
                self.cached = Some(snapshot.clone());
                self.consecutive_failures = 0;
                Ok(Update::Fresh(snapshot))
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.write_diagnostics();
                self.use_cached_data(e)
            }
        }
    }

    fn use_cached_data(&self, e: ProtocolError) -> Result<Update> {
        if self.consecutive_failures > self.cache_max {
            bail!(
                "cached data used more than {} times, last error: {}",
                self.cache_max,
                e
            );
        }

        match &self.cached {
            Some(snapshot) => {
                warn!(
                    "using cached data ({}/{}): {}",
                    self.consecutive_failures, self.cache_max, e
                );
                Ok(Update::Cached {
                    snapshot: snapshot.clone(),
                    reason: e.to_string(),
                    consecutive_failures: self.consecutive_failures,
                })
            }
            None => Err(anyhow!("no cached data to fall back on: {}", e)),
        }
    }

    fn write_diagnostics(&self) {
        if let Some(writer) = &self.diagnostics {
            if let Err(e) = writer.write(&self.client.dump()) {
                warn!("failed to write diagnostics to {}: {}", writer.path(), e);
            }
        }
    }

    fn publish(&self, data: ChannelData) {
        if self.channels.from_coordinator.send(data).is_err() {
            trace!("no subscribers for coordinator output");
        }
    }

    /// Query on a fixed interval until told to shut down.
    pub async fn run(&mut self) -> Result<()> {
        let mut control = self.channels.to_coordinator.subscribe();
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("polling ECU every {}s", self.poll_interval.as_secs());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let data = match self.update().await {
                        Ok(update) => ChannelData::Update(update),
                        Err(e) => {
                            error!("ECU update failed: {}", e);
                            ChannelData::Failed(e.to_string())
                        }
                    };
                    self.publish(data);
                }
                msg = control.recv() => match msg {
                    Ok(Control::StartQuery) => self.start_query(),
                    Ok(Control::StopQuery) => self.stop_query(),
                    Ok(Control::Shutdown) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("coordinator missed {} control messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => bail!("control channel closed"),
                }
            }
        }

        info!("coordinator exiting");
        self.publish(ChannelData::Shutdown);
        Ok(())
    }
}
