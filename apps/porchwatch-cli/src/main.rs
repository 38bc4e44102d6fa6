use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use porchwatch_buffer::FfmpegClipEncoder;
use porchwatch_bus::{EventBus, LocalBus};
use porchwatch_engine::{Collaborators, EventEngine};
use porchwatch_hardware::{LoggingLeds, SimulatedCamera, SimulatedDistanceSensor};
use porchwatch_ops::{init_tracing, prepare_directories, JsonLinesEventStore, LogNotifier};
use porchwatch_relay::LiveRelay;
use porchwatch_types::config::PorchwatchConfig;
use porchwatch_vision::NullDetector;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

/// Porchwatch appliance daemon.
#[derive(Debug, Parser)]
#[command(name = "porchwatch", version)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(env = "PORCHWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Start in out-of-home mode regardless of the configured value.
    #[arg(long)]
    away: bool,

    /// Override `ops.log_level`.
    #[arg(long)]
    log_level: Option<String>,

    /// Seconds between status log lines.
    #[arg(long, default_value_t = 60)]
    status_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref());
    if args.away {
        config.out_of_home = true;
    }
    if let Some(level) = args.log_level {
        config.ops.log_level = level;
    }

    init_tracing(&config.ops)?;
    prepare_directories(&config)?;

    let bus = Arc::new(LocalBus::new(64));
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            debug!(kind = ?event.kind, "bus: {:?}", event.payload);
        }
    });

    let collaborators = Collaborators {
        camera: Arc::new(SimulatedCamera::new(&config.hardware)),
        sensor: Arc::new(SimulatedDistanceSensor::idle()),
        leds: Arc::new(LoggingLeds::new(&config.hardware)),
        detector: Arc::new(NullDetector),
        encoder: Arc::new(FfmpegClipEncoder::new(
            config.relay.ffmpeg_path.clone(),
            config.relay.video_codec.clone(),
        )),
        store: Arc::new(JsonLinesEventStore::new(config.buffer.event_log.clone())),
        notifier: Arc::new(LogNotifier::new(config.notifications.clone())),
        bus: bus.clone(),
    };
    let relay = Arc::new(LiveRelay::with_ffmpeg(config.relay.clone()));

    let engine = EventEngine::new(config, collaborators, relay)
        .context("failed to initialise event engine")?;
    engine.start().await?;

    let mut status_tick = interval(Duration::from_secs(args.status_interval.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            fault = engine.fault() => {
                error!("Engine fault: {fault}");
                break;
            }
            _ = status_tick.tick() => {
                let status = engine.status();
                info!(
                    out_of_home = status.out_of_home,
                    watching = status.watching,
                    buffered = status.buffered_frames,
                    relay = ?status.relay_state,
                    dropped = status.relay.frames_dropped,
                    "status"
                );
            }
        }
    }

    engine.stop().await.context("engine stopped with a fault")?;
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> PorchwatchConfig {
    let Some(path) = path else {
        return PorchwatchConfig::default();
    };
    match PorchwatchConfig::from_file(path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in {:?}: {err}. Falling back to internal defaults.",
                    path
                );
                PorchwatchConfig::default()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from {:?}: {err}. Falling back to internal defaults.",
                path
            );
            PorchwatchConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let config = load_config(Some(std::path::Path::new("/nonexistent/porchwatch.toml")));
        assert!(config.validate().is_ok());
        assert_eq!(config.hardware.camera_fps, 20);
    }

    #[test]
    fn args_accept_positional_config() {
        let args = Args::try_parse_from(["porchwatch", "dev.toml", "--away"]).expect("parse");
        assert_eq!(args.config, Some(PathBuf::from("dev.toml")));
        assert!(args.away);
        assert_eq!(args.status_interval, 60);
    }
}
