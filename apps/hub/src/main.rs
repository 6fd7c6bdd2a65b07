//! # Ampere Hub
//!
//! Roaming hub server and operator CLI.
//!
//! ## Commands
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ampere-hub serve                      HTTP server + background agent   │
//! │  ampere-hub register --platform-id ..  plan + run the outbound handshake│
//! │  ampere-hub unregister --platform-id   suspend (optionally purge)       │
//! │  ampere-hub pull <module>              on-demand pull from all remotes  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ampere_core::{ModuleId, Role};
use ampere_hub::{router, AppState};
use ampere_sync::{DateRange, HubAgent, HubConfig, HubContext, PullSelection};

/// In-flight pushes get this long to finish on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "ampere-hub", version, about = "Charge-point roaming hub")]
struct Cli {
    /// Configuration file (TOML). Defaults to the per-user config location.
    #[arg(short, long, global = true, env = "AMPERE_CONFIG")]
    config: Option<PathBuf>,

    /// Log as JSON lines.
    #[arg(long, global = true, env = "AMPERE_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server and the background agent.
    Serve,

    /// Store a remote platform and register with it.
    Register {
        #[arg(long)]
        platform_id: String,
        #[arg(long)]
        versions_url: String,
        /// Token A handed out by the remote platform.
        #[arg(long)]
        token_a: String,
        #[arg(long, default_value = "CPO")]
        role: Role,
        /// The remote expects base64-encoded tokens.
        #[arg(long)]
        base64: bool,
        /// Only store the platform and wait for it to register with us.
        #[arg(long)]
        inbound: bool,
    },

    /// Suspend a remote platform.
    Unregister {
        #[arg(long)]
        platform_id: String,
        /// Also delete its parties and data.
        #[arg(long)]
        purge: bool,
    },

    /// Pull one module from every connected remote.
    Pull {
        module: ModuleId,
        /// Only objects updated at or after this time (RFC 3339).
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Only objects updated before this time (RFC 3339).
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = HubConfig::load(cli.config).context("loading configuration")?;
    let ctx = HubContext::connect(config).await.context("opening hub")?;
    ctx.local.register(Utc::now()).await.context("registering local platform")?;

    match cli.command {
        Command::Serve => serve(ctx).await,
        Command::Register {
            platform_id,
            versions_url,
            token_a,
            role,
            base64,
            inbound,
        } => {
            let handshake = ctx.handshake();
            let platform = handshake
                .plan(&platform_id, role, &versions_url, &token_a, base64)
                .await?;
            if inbound {
                info!(platform_id = %platform.id, "Platform stored, waiting for its registration");
                return Ok(());
            }
            let platform = handshake.initiate(&platform_id).await?;
            info!(
                platform_id = %platform.id,
                status = %platform.status,
                version = platform.protocol.version.as_deref().unwrap_or("-"),
                "Platform registered"
            );
            Ok(())
        }
        Command::Unregister { platform_id, purge } => {
            let handshake = ctx.handshake();
            handshake.suspend(&platform_id).await?;
            if purge {
                let deleted = handshake.purge(&platform_id).await?;
                info!(platform_id, deleted, "Platform data purged");
            }
            Ok(())
        }
        Command::Pull { module, from, to } => {
            let report = ctx
                .puller()
                .pull_module(module, PullSelection::All, DateRange { from, to })
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

/// Serves until ctrl-c or SIGTERM, then drains the agent.
async fn serve(ctx: HubContext) -> anyhow::Result<()> {
    let addr = ctx.config.server.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    let agent = HubAgent::start(ctx.clone());
    let app = router(AppState::new(ctx.clone()));
    info!(%addr, platform_id = %ctx.local.platform_id(), "Hub listening");

    let shutdown = ctx.shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await;

    if !agent.shutdown(DRAIN_TIMEOUT).await {
        warn!("Shut down with undelivered pushes");
    }
    ctx.db.close().await;
    served.context("HTTP server failed")?;
    info!("Hub stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
