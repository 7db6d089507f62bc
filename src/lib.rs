pub mod channels; // coordinator <-> consumer channels
pub mod config; // YAML configuration
pub mod coordinator; // polling loop and cached-data fallback
pub mod diagnostics; // JSON-lines DebugRecord export
pub mod ecu; // ECU protocol: framing, commands, decoding
pub mod error; // ProtocolError
pub mod options; // command line options
pub mod prelude; // common imports

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use log::LevelFilter;

/// Install the logger. Everything is let through to env_logger and the
/// effective level is controlled by [`set_log_level`], starting at `info`.
pub fn init_logging() {
    let result = env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .parse_env(env_logger::Env::default())
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        eprintln!("logger already initialised: {}", e);
    }
    log::set_max_level(LevelFilter::Info);
}

pub fn set_log_level(level: &str) {
    match LevelFilter::from_str(level) {
        Ok(filter) => log::set_max_level(filter),
        Err(_) => warn!("unknown loglevel {:?}, keeping {}", level, log::max_level()),
    }
}

/// Load the configuration and run a single query.
pub async fn once(options: &Options) -> Result<TelemetrySnapshot> {
    let config = ConfigWrapper::new(options.config_file.clone())?;
    set_log_level(&config.loglevel());

    let mut client = config.ecu().client();
    Ok(client.query().await?)
}

async fn log_updates(mut rx: broadcast::Receiver<ChannelData>) {
    loop {
        match rx.recv().await {
            Ok(ChannelData::Update(update)) => {
                let snapshot = update.snapshot();
                info!(
                    "{} ECU {}: {}W, today {}kWh, lifetime {}kWh, {}/{} inverters online{}",
                    snapshot.timestamp,
                    snapshot.ecu.ecu_id,
                    snapshot.ecu.current_power,
                    snapshot.ecu.today_energy,
                    snapshot.ecu.lifetime_energy,
                    snapshot.ecu.inverter_online_count,
                    snapshot.ecu.inverter_count,
                    if update.is_fresh() { "" } else { " (cached)" }
                );
                for inverter in snapshot.inverters.values() {
                    debug!(
                        "  {} {} online={} power={:?} voltage={:?} {}Hz {}C signal {}%",
                        inverter.uid,
                        inverter.model,
                        inverter.online,
                        inverter.power,
                        inverter.voltage,
                        inverter.frequency,
                        inverter.temperature,
                        inverter.signal
                    );
                }
            }
            Ok(ChannelData::Failed(reason)) => warn!("no ECU data: {}", reason),
            Ok(ChannelData::Shutdown) => break,
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("missed {} updates", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Poll the ECU until `shutdown_rx` fires or the coordinator stops.
pub async fn app(mut shutdown_rx: broadcast::Receiver<()>, options: Options) -> Result<()> {
    info!(
        "ecu-bridge {} starting with config file: {}",
        CARGO_PKG_VERSION, options.config_file
    );

    let config = ConfigWrapper::new(options.config_file.clone())?;
    set_log_level(&config.loglevel());

    let channels = Channels::new();
    let mut coordinator = Coordinator::new(&config, channels.clone())?;

    let updates_handle = tokio::spawn(log_updates(channels.from_coordinator.subscribe()));
    let mut coordinator_handle = tokio::spawn(async move { coordinator.run().await });

    tokio::select! {
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received, stopping coordinator...");
            let _ = channels.to_coordinator.send(Control::Shutdown);
            match (&mut coordinator_handle).await {
                Ok(Err(e)) => error!("Coordinator task failed: {}", e),
                Err(e) => error!("Error waiting for coordinator task: {}", e),
                Ok(Ok(())) => {}
            }
        }
        res = &mut coordinator_handle => {
            match res {
                Ok(Err(e)) => error!("Coordinator task failed: {}", e),
                Err(e) => error!("Error waiting for coordinator task: {}", e),
                Ok(Ok(())) => {}
            }
            let _ = channels.from_coordinator.send(ChannelData::Shutdown);
        }
    }

    if let Err(e) = updates_handle.await {
        error!("Error waiting for update logger: {}", e);
    }

    info!("Application shutdown complete");
    Ok(())
}
