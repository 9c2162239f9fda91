use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use calcd::{Config, Server};

/// Line-oriented TCP arithmetic-expression server.
#[derive(Debug, Parser)]
#[command(name = "calcd", version, about)]
struct Cli {
    /// IPv4 address to bind.
    #[arg(short, long, default_value = "127.0.0.1")]
    address: Ipv4Addr,

    /// TCP port to bind (>= 1024).
    #[arg(short, long)]
    port: u16,

    /// Maximum number of concurrent client connections.
    #[arg(short, long)]
    clients: usize,

    /// Worker thread count (<= clients). Defaults to hardware
    /// concurrency, clamped to `clients`.
    #[arg(short, long)]
    threads: Option<usize>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let threads = cli.threads.unwrap_or_else(|| Config::default_threads(cli.clients));
    let config = match Config::new(cli.address, cli.port, cli.clients, threads) {
        Ok(config) => config,
        Err(err) => {
            log::error!("invalid configuration: {err}");
            return ExitCode::from(1);
        }
    };

    let server = match Server::new(config) {
        Ok(server) => Arc::new(server),
        Err(err) => {
            log::error!("failed to start: {err}");
            return ExitCode::from(2);
        }
    };

    let signal_server = Arc::clone(&server);
    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            log::error!("failed to install signal handlers: {err}");
            return ExitCode::from(2);
        }
    };
    thread::spawn(move || {
        if signals.forever().next().is_some() {
            log::info!("received shutdown signal");
            signal_server.stop();
        }
    });

    match server.start() {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            log::error!("failed to start: {err}");
            ExitCode::from(2)
        }
    }
}
