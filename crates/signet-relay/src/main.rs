mod broker;
mod connection;
mod error;
mod http;
mod transport_axum;

use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use broker::Broker;
use signet_crypto::Config;

/// Command-line arguments for the relay daemon (§6).
struct Args {
    addr: IpAddr,
    port: u16,
}

/// Parsed args, or a reason the configuration was rejected (exit code 2).
fn parse_args() -> Result<Args, String> {
    let mut addr = "0.0.0.0".to_string();
    let mut port = "8080".to_string();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--addr" => addr = args.next().ok_or("--addr requires a value")?,
            "--port" => port = args.next().ok_or("--port requires a value")?,
            other => return Err(format!("unrecognized argument: {other}")),
        }
    }

    let addr: IpAddr = addr.parse().map_err(|e| format!("invalid --addr {addr:?}: {e}"))?;
    let port: u16 = port.parse().map_err(|e| format!("invalid --port {port:?}: {e}"))?;
    Ok(Args { addr, port })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    runtime.block_on(run(args))
}

async fn run(args: Args) -> ExitCode {
    Config::init_from_env();
    tracing::info!("signet-relay starting");

    let socket_addr = SocketAddr::new(args.addr, args.port);
    let listener = match tokio::net::TcpListener::bind(socket_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %socket_addr, error = %e, "failed to bind");
            return ExitCode::from(1);
        }
    };
    tracing::info!(addr = %socket_addr, "listening");

    let broker = Arc::new(Broker::new());
    let app = http::router(broker).into_make_service_with_connect_info::<SocketAddr>();

    let result = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;
    match result {
        Ok(()) => {
            tracing::info!("signet-relay shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "server loop exited with an error");
            ExitCode::from(1)
        }
    }
}

/// Resolves on SIGINT (all platforms, via Ctrl+C) or SIGTERM (unix), for a
/// clean exit-code-0 shutdown (§6).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
