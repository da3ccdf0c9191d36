mod cli;
mod cmd;
mod dispatch;
mod signal;

use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sstash_types::cancel::cancel_pair;
use sstash_types::error::SstashError;

fn main() {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose);

    signal::install_signal_handlers();
    let (source, token) = cancel_pair();
    // Bridge the async-signal-safe flag to the cancellation channel.
    std::thread::spawn(move || loop {
        if signal::SHUTDOWN.load(Ordering::SeqCst) {
            source.cancel();
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    });

    match dispatch::run(&cli, &token) {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {
            eprintln!("sstash: interrupted");
            std::process::exit(130);
        }
        Err(SstashError::FileErrors(map)) => {
            eprintln!("sstash: restore failed for {} file(s):", map.len());
            for (name, error) in &map {
                eprintln!("  {name}: {error}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("sstash: {e}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
