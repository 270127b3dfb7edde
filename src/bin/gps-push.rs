use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use gps_push::{
    config::Settings,
    runner,
    sentence::Trigger,
    serial::BaudRate,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Serial device of the GPS receiver
    #[arg(short, long)]
    device: Option<PathBuf>,
    #[arg(short, long)]
    baud: Option<BaudRate>,
    /// Collector host name
    #[arg(short, long)]
    server: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Shared secret sent in the X-GPS-Auth header
    #[arg(long, env = "GPS_PUSH_SECRET")]
    secret: Option<String>,
    /// Directory for the log index and numbered capture logs
    #[arg(long)]
    capture_dir: Option<PathBuf>,
    /// FIFO path for the split topology
    #[arg(long)]
    relay: Option<PathBuf>,
    /// Sentence identifier that flushes a batch
    #[arg(long)]
    trigger: Option<String>,
    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Capture, batch and push in a single process
    Direct,
    /// Capture into the local log and the relay pipe
    Gateway,
    /// Read the relay pipe, batch and push
    Forward,
    /// Print sentences from the receiver
    Monitor,
}

impl Args {
    fn settings(&self) -> gps_push::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };

        if let Some(device) = &self.device {
            settings.device = device.clone();
        }
        if let Some(baud) = self.baud {
            settings.baud = baud;
        }
        if let Some(server) = &self.server {
            settings.server = Some(server.clone());
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(secret) = &self.secret {
            settings.secret = secret.clone();
        }
        if let Some(dir) = &self.capture_dir {
            settings.capture_dir = Some(dir.clone());
        }
        if let Some(relay) = &self.relay {
            settings.relay = relay.clone();
        }
        if let Some(trigger) = &self.trigger {
            settings.trigger = Trigger::new(trigger.as_str());
        }

        Ok(settings)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = args.settings().and_then(|settings| {
        tracing::debug!(
            device = %settings.device.display(),
            baud = %settings.baud,
            server = ?settings.server,
            port = settings.port,
            capture_dir = ?settings.capture_dir,
            relay = %settings.relay.display(),
            "effective settings"
        );
        match args.mode {
            Mode::Direct => runner::run_direct(&settings),
            Mode::Gateway => runner::run_gateway(&settings),
            Mode::Forward => runner::run_forward(&settings),
            Mode::Monitor => runner::run_monitor(&settings),
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(severity = ?e.severity(), "{e}");
            ExitCode::FAILURE
        }
    }
}
