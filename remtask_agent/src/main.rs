//! remtask_agent: WebSocket endpoint for remote process inventory.

use std::net::SocketAddr;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use remtask_agent::{config, router, tls, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_env("REMTASK_AGENT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let opts = match config::parse_args(std::env::args()) {
        Ok(o) => o,
        Err(usage) => {
            eprintln!("{usage}");
            return Ok(());
        }
    };

    let state = AppState::new(opts.auth_token.clone(), opts.allow_terminate);
    info!(
        host = %state.hostname,
        token = opts.auth_token.is_some(),
        terminate = opts.allow_terminate,
        "starting agent"
    );
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], opts.port));

    if opts.enable_ssl {
        let (cert, key) = tls::ensure_self_signed_cert().context("preparing TLS certificate")?;
        let cfg = RustlsConfig::from_pem_file(cert, key)
            .await
            .context("loading TLS certificate")?;
        info!(%addr, "listening on wss://{addr}/ws");
        axum_server::bind_rustls(addr, cfg)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(addr = %listener.local_addr()?, "listening on ws://{addr}/ws");
        axum::serve(listener, app).await?;
    }
    Ok(())
}
