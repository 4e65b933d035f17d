//! # Departure Board Application Entry Point
//!
//! Wires the library's collaborators together and runs the control loop on a
//! current-thread tokio runtime. Two modes are supported:
//! - **hardware** (`--features hardware`): SPI e-paper panel and GPIO button
//! - **development** (`--stdout`, or any build without the feature): ASCII
//!   renders on stdout, Enter on stdin acts as the button

#[cfg(test)]
mod tests;

use anyhow::Context;
use departure_board_lib::{
    battery::{BatteryGauge, IioAdc},
    compositor::Compositor,
    config::{Config, DEFAULT_CONFIG_PATH},
    departures::HttpDepartureSource,
    framebuffer::Panel,
    input::spawn_stdin_button,
    mode::{EventSender, ModeMachine, SysfsWake},
    network::SysfsRadio,
    orchestrator::Orchestrator,
    terminal::TerminalPanel,
};
use std::env;
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command line options.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    development_mode: bool,
    config_path: PathBuf,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Args> {
    let mut parsed = Args {
        development_mode: false,
        config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
    };
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--stdout" => parsed.development_mode = true,
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config_path = PathBuf::from(path);
            }
            other => anyhow::bail!("unknown argument {other:?}"),
        }
    }
    Ok(parsed)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "departure_board=info,departure_board_lib=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Build the orchestrator around `panel` and run it forever.
async fn run_board<P: Panel>(
    config: Config,
    panel: P,
    attach_button: impl FnOnce(EventSender) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let (mode, button) = ModeMachine::new(
        config.timing.live_timeout(),
        SysfsWake::new(config.power.wakeup_path.clone()),
        Instant::now(),
    );
    attach_button(button)?;

    let source = HttpDepartureSource::new(&config.api).context("building HTTP client")?;
    let compositor = Compositor::new(panel, config.display.max_rows_per_station);
    let radio = SysfsRadio::new(&config.network);
    let gauge = BatteryGauge::new(IioAdc::new(&config.battery.adc_path), config.battery.vref_mv);

    let mut board = Orchestrator::new(config, mode, source, compositor, radio, gauge);
    board.run().await;
    Ok(())
}

async fn run_development(config: Config) -> anyhow::Result<()> {
    info!("development mode: rendering to stdout");
    run_board(config, TerminalPanel::stdout(), |tx| {
        let _ = spawn_stdin_button(tx);
        Ok(())
    })
    .await
}

#[cfg(all(target_os = "linux", feature = "hardware"))]
async fn run_hardware(config: Config) -> anyhow::Result<()> {
    use departure_board_lib::hardware::{spawn_gpio_button, EpdPanel};

    let panel = EpdPanel::open(&config.display.hardware).context("opening e-paper panel")?;
    let chip = config.display.hardware.gpio_chip.clone();
    let button_line = config.power.button_line;
    run_board(config, panel, move |tx| {
        match button_line {
            Some(line) => {
                spawn_gpio_button(&chip, line, tx).context("watching wake button")?;
            }
            None => {
                tracing::warn!("no button_line configured, using stdin as the button");
                let _ = spawn_stdin_button(tx);
            }
        }
        Ok(())
    })
    .await
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = parse_args(env::args().skip(1))?;
    let config = Config::load_from_path(&args.config_path);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    if args.development_mode {
        return rt.block_on(run_development(config));
    }

    #[cfg(all(target_os = "linux", feature = "hardware"))]
    let result = rt.block_on(run_hardware(config));

    #[cfg(not(all(target_os = "linux", feature = "hardware")))]
    let result = {
        tracing::warn!(
            "e-paper support not enabled, rebuild with --features hardware; showing ASCII output instead"
        );
        rt.block_on(run_development(config))
    };

    result
}
