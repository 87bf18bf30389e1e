#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::authority::HttpAuthority;
use server::config::{CliArgs, ServerConfig};
use server::service::handler::TokenService;
use server::telemetry::init_telemetry;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let authority = HttpAuthority::new(
        config.authority_url.clone(),
        config.validator.per_call_timeout,
    )?;
    let service = TokenService::new(&config, authority)?;

    let listener = TcpListener::bind(config.server_addr).await?;
    log_startup_info(&config);

    let res = run_server(listener, service, &config).await;

    providers.shutdown();
    res
}

async fn run_server(
    listener: TcpListener,
    service: TokenService,
    config: &ServerConfig,
) -> anyhow::Result<()> {
    let app = service.router().layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    #[cfg(feature = "tracing")]
    let app = app.layer(tower_http::trace::TraceLayer::new_for_http());

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let draining = {
        let service = service.clone();
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
            service.begin_shutdown();
        }
    };

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(draining);

    let shutdown_timeout = config.shutdown_timeout;
    let deadline = async move {
        shutdown.cancelled().await;
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        res = server.into_future() => res?,
        () = deadline => {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "In-flight requests did not finish within {:?}, closing connections",
                shutdown_timeout
            );
        }
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(_config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting token service on {} with full config: {:#?}",
            _config.server_addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting token service on {} against {} ({} concurrent verifications)",
            _config.server_addr,
            _config.authority_url,
            _config.validator.concurrency_limit
        );
    }
}

/// Waits for Ctrl+C or SIGTERM, then cancels `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");

    shutdown.cancel();
}
