use clap::Parser as _;
use odb_console::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

const LOG_FILTER_VAR: &str = "ODB_CONSOLE_LOG";

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Keys(commands::keys::Args),
    Watch(commands::watch::Args),
    Poll(commands::poll::Args),
    Send(commands::send::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter_description = std::env::var(LOG_FILTER_VAR).unwrap_or_else(|_| "warn".to_string());
    let filter = match filter_description.parse::<tracing_subscriber::filter::targets::Targets>() {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("error: {LOG_FILTER_VAR} is not a valid log filter: {e}");
            std::process::exit(2);
        }
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Keys(args) => end(commands::keys::run(args)),
        Commands::Watch(args) => end(commands::watch::run(args)),
        Commands::Poll(args) => end(commands::poll::run(args)),
        Commands::Send(args) => end(commands::send::run(args)),
    }
}
