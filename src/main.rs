//! Bedside Link - TCP client for bedside patient monitors
//!
//! Usage:
//!   bedside-link                          Connect using bedside-link.toml
//!   bedside-link --host 10.0.0.5          Override the monitor address
//!   bedside-link --record samples.jsonl   Also append samples to a file

use bedside_link::cli::Cli;
use bedside_link::error::{MonitorError, Result};
use bedside_link::session::{self, Stats};
use bedside_link::{config, logging};
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = config::load(&cli.config)?;
    cli.apply(&mut config);
    config.validate()?;

    let rt = tokio::runtime::Runtime::new().map_err(|source| MonitorError::Runtime { source })?;

    rt.block_on(async {
        let shutdown = Arc::new(AtomicBool::new(false));
        spawn_signal_handler(shutdown.clone());

        let stats = Arc::new(Stats::new());
        let store = session::run(&config, shutdown, stats).await?;

        for channel in bedside_link::store::Channel::ALL {
            let latest = store
                .buffer(channel)
                .latest()
                .and_then(|value| value.as_option());
            info!("Last {}: {:?}", channel, latest);
        }
        Ok::<(), MonitorError>(())
    })
}

/// Set `shutdown` on SIGINT/SIGTERM (Ctrl+C on Windows)
fn spawn_signal_handler(shutdown: Arc<AtomicBool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        tokio::spawn(async move {
            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(term), Ok(int)) => (term, int),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!("Cannot install signal handlers: {}", e);
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
            info!("Shutting down");
            shutdown.store(true, Ordering::SeqCst);
        });
    }

    #[cfg(windows)]
    {
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            shutdown.store(true, Ordering::SeqCst);
        });
    }
}
