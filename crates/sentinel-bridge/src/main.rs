//! Bridge entrypoint.
//!
//! Exit codes: 0 ok, 2 config error, 3 signer init failed, 4 audit chain
//! broken at startup.

use clap::Parser;
use sentinel_bridge::{router, BridgeConfig, BridgeService};
use sentinel_core::SentinelError;
use std::net::SocketAddr;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sentinel-bridge", about = "Policy-gated execution bridge")]
struct Cli {
    /// Listen address; overrides BIND_ADDR.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

const EXIT_CONFIG: u8 = 2;
const EXIT_SIGNER: u8 = 3;
const EXIT_AUDIT: u8 = 4;

fn exit_code_for(error: &SentinelError) -> u8 {
    match error {
        SentinelError::Config { .. } | SentinelError::Validation { .. } => EXIT_CONFIG,
        SentinelError::Signature { .. } => EXIT_SIGNER,
        SentinelError::Integrity { .. } => EXIT_AUDIT,
        _ => 1,
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, code = e.code(), "bridge startup failed");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<(), SentinelError> {
    let mut config = BridgeConfig::from_env()?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    let bind_addr = config.bind_addr;

    let service = BridgeService::from_config(config).await?;

    // Refuse to serve on a broken chain.
    let verification = service.audit().verify()?;
    if !verification.ok {
        return Err(SentinelError::integrity(format!(
            "audit chain broken at sequence {:?}",
            verification.first_broken_seq
        )));
    }
    tracing::info!(
        entries = verification.entries,
        "audit chain verified at startup"
    );

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| SentinelError::config(format!("cannot bind {bind_addr}: {e}")))?;
    tracing::info!(%bind_addr, "sentinel bridge listening");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| SentinelError::internal(format!("server error: {e}")))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("ctrl-c handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
}
