use pos_server::{router, ServerConfig};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::registry()
		.with(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new("pos_server=info,tower_http=info")),
		)
		.with(fmt::layer().with_target(true))
		.init();

	let config = ServerConfig::parse();
	let state = config.build_state().await?;

	let addr = config.listen_addr();
	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("failed to bind {addr}"))?;

	info!("Listening on http://localhost:{}", config.port);

	axum::serve(listener, router(state))
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("http server failed")?;

	info!("Server stopped");

	Ok(())
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!(?e, "Failed to listen for the shutdown signal");
		std::future::pending::<()>().await;
	}
}
