//! faderlink - MIDI control surface to audio mixer bridge
//!
//! Startup order:
//! 1. Load and validate the YAML config
//! 2. Probe the audio server and start the sink worker
//! 3. Connect the controller, send its init SysEx and paint the LEDs
//! 4. Apply controller events until Ctrl+C, then clear the LEDs
//!
//! ## Command line flags
//!
//! - `--config <path>`: Use a config file other than ~/.config/faderlink/config.yaml
//! - `--list-ports`: Print the available MIDI ports and exit
//! - `--write-config <path>`: Write the effective config as YAML and exit

mod pulse;

use anyhow::{bail, Context, Result};
use faderlink_midi::midi;
use faderlink_midi::{
    default_config_path, load_config, save_config, ChannelSnapshot, MasterState, MixerObserver,
    SinkWorker, StopHandle, SurfaceBridge,
};
use pulse::PactlSink;
use std::path::PathBuf;
use std::sync::Arc;

/// Parsed command line
#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    list_ports: bool,
    write_config: Option<PathBuf>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Args::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args.next().context("--config needs a path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--write-config" => {
                    let path = args.next().context("--write-config needs a path")?;
                    parsed.write_config = Some(PathBuf::from(path));
                }
                "--list-ports" => parsed.list_ports = true,
                other => bail!("Unknown argument: {}", other),
            }
        }
        Ok(parsed)
    }
}

/// Logs every recompute at debug level
struct LogObserver;

impl MixerObserver for LogObserver {
    fn channel_updated(&self, s: &ChannelSnapshot) {
        log::debug!(
            "Channel {}: value={:.3} display={:.3} gain={:.3}{}{} ({:?})",
            s.index,
            s.value,
            s.display,
            s.gain,
            if s.muted { " muted" } else { "" },
            if s.boosted { " boosted" } else { "" },
            s.phase
        );
    }

    fn master_updated(&self, master: &MasterState) {
        log::debug!(
            "Master: {:.3}{}",
            master.scalar,
            if master.mic_muted_by_master { " (mic auto-muted)" } else { "" }
        );
    }
}

fn list_ports() -> Result<()> {
    println!("MIDI input ports:");
    for name in midi::list_input_ports()? {
        println!("  {}", name);
    }
    println!("MIDI output ports:");
    for name in midi::list_output_ports()? {
        println!("  {}", name);
    }
    Ok(())
}

/// Stop the bridge on Ctrl+C so the LEDs get cleared on the way out
fn watch_ctrl_c(stop: StopHandle) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    std::thread::Builder::new()
        .name("signal-watcher".into())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        log::info!("Received Ctrl+C, shutting down gracefully...");
                        stop.stop();
                    }
                    Err(e) => log::warn!("Failed to listen for Ctrl+C: {}", e),
                }
            })
        })
        .context("Failed to start signal watcher")?;
    Ok(())
}

fn run(args: Args) -> Result<()> {
    if args.list_ports {
        return list_ports();
    }

    let config_path = args.config.unwrap_or_else(default_config_path);
    let config = load_config(&config_path);
    config.validate().context("Invalid configuration")?;

    if let Some(path) = args.write_config {
        save_config(&config, &path)?;
        println!("Wrote config to {}", path.display());
        return Ok(());
    }

    let sink = PactlSink::new();
    let server = sink.probe()?;
    log::info!("Sink: Connected to {}", server);

    let worker = Arc::new(SinkWorker::spawn(sink).context("Failed to start sink worker")?);
    let bridge = SurfaceBridge::connect(&config, worker.clone(), Some(Arc::new(LogObserver)))?;
    watch_ctrl_c(bridge.stop_handle())?;
    bridge.run();

    // The bridge and its fades are gone, so this is the last handle
    match Arc::try_unwrap(worker) {
        Ok(worker) => worker.shutdown(),
        Err(_) => log::warn!("Sink: worker still shared at exit"),
    }
    Ok(())
}

fn main() {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("faderlink starting up");

    let result = Args::parse(std::env::args().skip(1)).and_then(run);
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
