// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! silod: the Silo management server daemon.

use silo_mgm::config::Config;
use silo_mgm::lifecycle;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_to_file {
        let appender = tracing_appender::rolling::daily(
            config.log_path.parent().unwrap_or(&config.state_dir),
            "silod.log",
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("silod: {}", e);
            std::process::exit(1);
        }
    };
    let _log_guard = init_tracing(&config);

    let daemon = match lifecycle::startup(&config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "signal handler failed");
    }
    tracing::info!("shutdown signal received");
    daemon.shutdown().await;
}
