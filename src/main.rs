use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use winperf::collectors::{W3wp, WinServices};
use winperf::config::{Config, InputsConfig};
use winperf::input::Input;
use winperf::management::fake;
use winperf::metric::MetricBuffer;
use winperf::utils::errors::MonitoringError;
use winperf::utils::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "winperf", about = "Windows service and IIS worker process metrics")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gather a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Use in-memory demo backends instead of the OS
    #[arg(long)]
    fake: bool,
}

fn build_inputs(inputs: &InputsConfig, use_fake: bool) -> Vec<Box<dyn Input>> {
    let mut built: Vec<Box<dyn Input>> = Vec::new();

    if let Some(config) = &inputs.win_services {
        built.push(if use_fake {
            Box::new(WinServices::new(config.clone(), Box::new(fake::demo_services())))
        } else {
            Box::new(WinServices::for_platform(config.clone()))
        });
    }

    if let Some(config) = &inputs.win_w3wp {
        if use_fake {
            built.push(Box::new(W3wp::new(config.clone(), fake::demo_perf_client())));
        } else {
            #[cfg(windows)]
            built.push(Box::new(W3wp::new(
                config.clone(),
                winperf::management::windows::WmiPerfClient,
            )));
            #[cfg(not(windows))]
            built.push(Box::new(W3wp::new(
                config.clone(),
                winperf::management::system::SystemPerfClient::new(),
            )));
        }
    }

    built
}

fn gather_all(inputs: &[Box<dyn Input>]) {
    let mut buffer = MetricBuffer::new();
    for input in inputs {
        // Service queries block on the OS; keep them off the async workers.
        if let Err(err) = tokio::task::block_in_place(|| input.gather(&mut buffer)) {
            error!("[inputs.{}] {}", input.name(), err);
        }
    }
    for metric in buffer.drain() {
        println!("{metric}");
    }
}

async fn run(cli: Cli) -> Result<(), MonitoringError> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let interval = config.agent.interval()?;

    let mut inputs = build_inputs(&config.inputs, cli.fake);
    for input in inputs.iter_mut() {
        input.init()?;
    }
    info!(
        "Loaded inputs: {}",
        inputs.iter().map(|i| i.name()).collect::<Vec<_>>().join(" ")
    );

    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; gathering starts one interval in.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, shutting down");
                break;
            }
            _ = ticker.tick() => gather_all(&inputs),
        }
        if cli.once {
            break;
        }
    }

    for input in inputs.iter_mut() {
        input.stop();
    }
    info!("Program ended successfully.");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logger();
    let cli = Cli::parse();
    info!("Application started");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
