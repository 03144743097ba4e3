//! Command line interface
//!
//! - `run` - reform the configured capacitor
//! - `identify` - ask an instrument for its identification string
//! - `plan` - print the voltage steps a session would take, without touching hardware

use std::{
    path::PathBuf,
    time::Duration,
};
use clap::{ Parser, Subcommand };
use tracing::{ error, info, warn };
use tracing_subscriber::EnvFilter;
use arcs_reform::{
    config::{ Config, InstrumentConfig, MeterConfig },
    devices::{ self, ConnectOptions, Instrument },
    reform,
    resource::{ Resource, DEFAULT_BAUD_RATE },
    units::Milli,
    Error, Reformer, Result,
};

/// Reform electrolytic capacitors with a programmable bench supply
#[derive(Parser, Debug)]
#[command(name = "arcs-reform")]
#[command(version, about, long_about = None)]
pub struct Cli
{
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "reform.toml")]
    pub config: PathBuf,

    /// Only print errors, overriding `RUST_LOG`
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands
{
    /// Reform the configured capacitor up to its rated voltage
    Run
    {
        /// Power supply resource, overriding the configuration file
        #[arg(long)]
        power_supply: Option<String>,

        /// Multimeter resource, overriding or adding to the configuration file
        #[arg(long)]
        meter: Option<String>,

        /// Give up on a step that stays unsettled for this many seconds
        #[arg(long)]
        max_settle_wait: Option<f64>,
    },

    /// Print an instrument's identification string
    Identify
    {
        /// Resource identifier, e.g. ASRL/dev/ttyUSB0
        #[arg(short, long)]
        resource: String,

        #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
        baud_rate: u32,
    },

    /// Print the step schedule for the configured capacitor
    Plan,
}

impl Cli
{
    /// Log filter for this invocation
    pub fn log_filter(&self) -> EnvFilter
    {
        if self.quiet {
            EnvFilter::new("error")
        }
        else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arcs_reform=info"))
        }
    }
}

pub async fn execute(cli: Cli) -> Result<()>
{
    match cli.command {
        Commands::Run { power_supply, meter, max_settle_wait } => {
            let mut config = Config::load(&cli.config)?;

            if let Some(resource) = power_supply {
                config.power_supply.instrument.resource = resource;
            }

            if let Some(resource) = meter {
                match config.meter.as_mut() {
                    Some(meter) => meter.instrument.resource = resource,
                    None => {
                        config.meter = Some(MeterConfig {
                            instrument: InstrumentConfig::new(resource),
                            role: config.reform.meter_role,
                        })
                    },
                }
            }

            if let Some(secs) = max_settle_wait {
                let wait = Duration::try_from_secs_f64(secs)
                    .ok()
                    .filter(|wait| !wait.is_zero())
                    .ok_or(Error::InvalidSettings("maximum settle wait must be a positive number of seconds"))?;
                config.reform.max_settle_wait = Some(wait);
            }

            run(config, cli.quiet).await
        },
        Commands::Identify { resource, baud_rate } => identify(&resource, baud_rate).await,
        Commands::Plan => {
            let config = Config::load(&cli.config)?;
            print_plan(&config);
            Ok(())
        },
    }
}

async fn run(config: Config, quiet: bool) -> Result<()>
{
    let supply_config = &config.power_supply;
    let supply = devices::open_power_supply(
        &supply_config.instrument.resource()?,
        &supply_config.instrument.connect_options(),
        supply_config.check_errors,
    )
    .await?;

    let mut reformer = Reformer::new(supply, config.capacitor, config.reform.clone())?;

    let report = match &config.meter {
        Some(meter_config) => {
            let meter = devices::open_multimeter(
                &meter_config.instrument.resource()?,
                &meter_config.instrument.connect_options(),
            )
            .await?;
            info!(role = ?meter_config.role, "meter attached");

            reformer.with_meter(meter).run_until(interrupted()).await?
        },
        None => reformer.run_until(interrupted()).await?,
    };

    if !quiet {
        println!(
            "reformed to {} in {} steps ({}s)",
            report.final_voltage,
            report.steps,
            report.elapsed.as_secs()
        );
    }

    Ok(())
}

/// Completes on the first Ctrl-C; a second one exits the process at once
///
/// The stop future is only observed between transactions, so the listener runs as its own task to
/// keep a hung transaction interruptible.
fn interrupted() -> impl std::future::Future<Output = ()>
{
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for interrupts");
            return;
        }

        warn!("interrupt received, stopping; interrupt again to exit without shutdown");
        let _ = tx.send(());

        if tokio::signal::ctrl_c().await.is_ok() {
            error!("second interrupt, exiting with the output in an unknown state");
            std::process::exit(130);
        }
    });

    async move {
        if rx.await.is_err() {
            std::future::pending::<()>().await
        }
    }
}

async fn identify(resource: &str, baud_rate: u32) -> Result<()>
{
    let resource: Resource = resource.parse()?;
    let options = ConnectOptions {
        reset: false,
        timeout: Some(Duration::from_secs(5)),
        baud_rate: baud_rate,
    };

    let stream = resource.open("instrument", baud_rate)?;
    let mut instrument = Instrument::with("instrument", stream);
    instrument.connect(&resource.to_string(), &options).await?;

    println!("{}: {}", resource, instrument.id().unwrap_or_default());
    Ok(())
}

fn print_plan(config: &Config)
{
    let settings = &config.reform;
    let steps: Vec<_> = reform::plan(&config.capacitor, settings).collect();

    println!("{:>4}  {:>9}  {:>17}", "step", "voltage", "current limit");
    println!("{:>4}  {:>8.3}V  {:>15.3}mA", 0, 0.0, settings.initial_current_limit.as_f64::<Milli>());

    for (index, (voltage, current)) in steps.iter().enumerate() {
        println!("{:>4}  {:>8.3}V  {:>15.3}mA", index + 1, voltage.value(), current.as_f64::<Milli>());
    }

    let count = u32::try_from(steps.len()).unwrap_or(u32::MAX);
    let shortest = settings.poll_interval.saturating_mul(count);
    println!(
        "{} steps to {}, at least {}s with every step settling on its first reading",
        steps.len(),
        config.capacitor.rated_voltage,
        shortest.as_secs()
    );
}
