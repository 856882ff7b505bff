use std::time::Duration;

use anyhow::{Context, Result};
use candyscale::transport::BluestTransport;
use candyscale::{ConnectionState, ScaleClient, ScaleConfig, ScaleEvent};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Stream weight and battery readings from an Acaia-compatible scale.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Advertised name prefix of the scale. Repeat to accept several.
    #[arg(short, long = "name-prefix")]
    name_prefixes: Vec<String>,
    /// Give up looking for the scale after this many seconds.
    #[arg(long, default_value_t = 30)]
    scan_timeout_secs: u64,
    /// Heartbeat interval in milliseconds.
    #[arg(long, default_value_t = 3000)]
    heartbeat_ms: u64,
    /// Wait before reconnecting after a dropped connection, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    reconnect_backoff_ms: u64,
    /// Do not reconnect after a dropped connection.
    #[arg(long)]
    no_reconnect: bool,
    /// Tare the scale once connected.
    #[arg(short, long)]
    tare: bool,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

impl Cli {
    fn config(&self) -> ScaleConfig {
        let mut config = ScaleConfig::default()
            .with_scan_timeout(Duration::from_secs(self.scan_timeout_secs))
            .with_heartbeat_interval(Duration::from_millis(self.heartbeat_ms))
            .with_reconnect_backoff(Duration::from_millis(self.reconnect_backoff_ms))
            .with_auto_reconnect(!self.no_reconnect);
        if !self.name_prefixes.is_empty() {
            config = config.with_name_prefixes(self.name_prefixes.iter().cloned());
        }
        config
    }
}

fn setup_logging(verbosity: &Verbosity<InfoLevel>) {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.verbose);

    let transport = BluestTransport::new()
        .await
        .context("Failed to open the Bluetooth adapter")?;
    let scale = ScaleClient::spawn(transport, cli.config());

    tokio::select! {
        res = run(&scale, cli.tare) => {
            if let Err(e) = res {
                error!("Application failed: {e:?}");
            }
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl+C received, disconnecting");
        }
    }

    print_diagnostics(&scale);
    scale.disconnect().await?;
    Ok(())
}

async fn run(scale: &ScaleClient, tare: bool) -> Result<()> {
    let mut events = scale.subscribe_events();
    let mut state = scale.watch_state();

    info!("Looking for the scale");
    scale.connect().await.context("Failed to connect to the scale")?;
    info!("Connected");

    if tare {
        scale.tare().await.context("Failed to tare the scale")?;
        info!("Scale tared");
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ScaleEvent::Weight(sample)) => println!("{}", sample.grams),
                Ok(ScaleEvent::Battery(level)) => println!("battery {} %", level.percent()),
                Ok(ScaleEvent::Button(button)) => println!("button {button:?}"),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {skipped} readings"),
                Err(RecvError::Closed) => return Ok(()),
            },
            changed = state.changed() => {
                changed.context("The scale link stopped")?;
                let current = *state.borrow_and_update();
                if current == ConnectionState::Disconnected {
                    if let Some(err) = scale.last_error() {
                        return Err(err).context("Lost the scale");
                    }
                    return Ok(());
                }
            }
        }
    }
}

fn print_diagnostics(scale: &ScaleClient) {
    let diagnostics = scale.diagnostics();
    info!(
        "writes={} notifications={} malformed={} ignored={} drops={}",
        diagnostics.write_count,
        diagnostics.notification_count,
        diagnostics.malformed_scans,
        diagnostics.ignored_frames,
        diagnostics.unexpected_disconnects
    );
    for session in &diagnostics.session_history {
        info!(
            "session ended {}: {:?}, {} writes, {} notifications",
            session.ended_at, session.duration, session.writes, session.notifications
        );
    }
}
