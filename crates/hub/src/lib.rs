// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tether hub: the central server of the remote device control plane.
//!
//! Managed endpoints hold persistent websocket sessions here; operators issue
//! commands over HTTP and open terminal/desktop streaming sub-sessions, all
//! multiplexed onto the correct device session.

pub mod cmap;
pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod events;
pub mod health;
pub mod packet;
pub mod session;
pub mod state;
pub mod transport;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::state::HubState;
use crate::transport::build_router;

/// Grace window for in-flight requests after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Run the hub until a shutdown signal.
pub async fn run(config: HubConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let state = Arc::new(HubState::new(config, shutdown.clone())?);

    let addr = state.config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("tether-hub listening on {addr}");

    health::spawn_device_health(Arc::clone(&state));
    health::spawn_subsession_health(Arc::clone(&state));
    transport::bridge::spawn_bridge_reaper(Arc::clone(&state));
    spawn_signal_handler(shutdown.clone());

    let router = build_router(Arc::clone(&state));
    let serve = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .into_future();

    let grace = {
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        }
    };

    tokio::select! {
        result = serve => result?,
        _ = grace => tracing::warn!("shutdown grace expired, aborting open connections"),
    }

    // Fire the exit path of every hub: close frames out, maps cleared.
    state.device_hub.close_all(1001, "server shutting down");
    state.terminal_hub.close_all(1001, "server shutting down");
    state.desktop_hub.close_all(1001, "server shutting down");
    tracing::info!("tether-hub stopped");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(_) => std::future::pending().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        tracing::warn!("shutdown signal received");
        shutdown.cancel();
    });
}
