use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rustls::crypto::CryptoProvider;
use tokio::signal;
use tracing::info;

use blockgate::api::api_server_listen;
use blockgate::trace_sub::init_tracing;
use blockgate::{AppState, Checker, Config, UpstreamClient};

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Received termination signal shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider())
        .expect("tls crypto");
    init_tracing("blockgate", "info");

    let cli = blockgate::cli::Cli::parse();

    let blocked_ranges = cli.blocked_ranges.unwrap_or_default();
    if blocked_ranges.is_empty() {
        info!("no blocked ranges configured, every client will be accepted");
    }
    let checker = Checker::new(&blocked_ranges)
        .with_context(|| format!("cannot parse blocked CIDR ranges {blocked_ranges:?}"))?;
    info!(blocked_ranges = checker.len(), "parsed blocklist");

    let app_state = AppState {
        config: Config {
            trusted_proxies: cli.trusted_proxies.unwrap_or_default(),
            invalid_addr_policy: cli.invalid_addr_policy,
            upstream_timeout: Duration::from_secs(cli.upstream_timeout),
        },
        checker: Arc::new(checker),
        upstream: UpstreamClient::new(cli.upstream),
    };
    info!(?app_state.config, "config");

    tokio::select! {
        result = api_server_listen(app_state, cli.listen_addr) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("Exit")
        }
    }

    Ok(())
}
