//! `arcs-reform` command line tool
//!
//! Log output goes to stderr and is filtered through `RUST_LOG` (default `arcs_reform=info`), or
//! limited to errors with `--quiet`.
//! Set `ARCS_REFORM_LOG_FORMAT=json` for machine-parseable logs.

mod cli;

use clap::Parser;
use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt };

#[tokio::main(flavor = "current_thread")]
async fn main()
{
    let cli = cli::Cli::parse();

    let log_format = std::env::var("ARCS_REFORM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = cli.log_filter();

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        },
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        },
    }

    if let Err(err) = cli::execute(cli).await {
        if err.is_instrument_error() {
            tracing::error!("{}; check the cabling, port and baud rate", err);
        }
        else {
            tracing::error!("{}", err);
        }
        std::process::exit(1);
    }
}
