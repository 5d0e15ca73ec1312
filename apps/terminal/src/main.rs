mod console;

use pos_assets::WorkerEvent;
use pos_core::{logging::init_logger, sync::SyncEvent, Node, TerminalConfig};

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use console::Command;
use tokio::{
	io::{stdin, AsyncBufReadExt, BufReader},
	sync::broadcast::error::RecvError,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "pos-terminal", version, about = "Point of sale terminal that keeps selling offline")]
struct Cli {
	/// Where the queue, config, logs and cached assets live
	#[arg(long, env = "POS_TERMINAL_DATA_DIR", default_value = "pos_terminal_data")]
	data_dir: PathBuf,

	/// Sync server url, saved to the config
	#[arg(long)]
	api_url: Option<String>,

	/// Shared secret of the sync server, saved to the config
	#[arg(long, env = "POS_API_KEY", hide_env_values = true)]
	api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let _guard = init_logger(&cli.data_dir)?;

	let mut config = TerminalConfig::load_or_create(&cli.data_dir, || {
		TerminalConfig::new("http://127.0.0.1:8080", None)
	})
	.await?;

	if cli.api_url.is_some() || cli.api_key.is_some() {
		if let Some(api_url) = cli.api_url {
			config.api_url = api_url;
		}
		if let Some(api_key) = cli.api_key {
			config.api_key = Some(api_key);
		}
		config.save(&cli.data_dir).await?;
	}

	let node = Node::start(&cli.data_dir, config).await?;

	tokio::spawn(report_sync_events(Arc::clone(&node)));
	tokio::spawn(report_asset_events(Arc::clone(&node)));

	println!("{}", console::HELP);

	let mut lines = BufReader::new(stdin()).lines();

	loop {
		let line = tokio::select! {
			line = lines.next_line() => line?,
			_ = tokio::signal::ctrl_c() => None,
		};

		let Some(line) = line else {
			break;
		};

		if line.trim().is_empty() {
			continue;
		}

		match line.parse::<Command>() {
			Ok(command) => match console::execute(&node, command).await {
				Ok(true) => {}
				Ok(false) => break,
				Err(e) => println!("error: {e:#}"),
			},
			Err(e) => println!("{e}"),
		}
	}

	node.shutdown().await;

	Ok(())
}

async fn report_sync_events(node: Arc<Node>) {
	let mut events = node.subscribe_sync();

	loop {
		match events.recv().await {
			Ok(SyncEvent::ParkedForReview { id, error, .. }) => {
				println!("! {id} needs review: {error}");
			}
			Ok(SyncEvent::Suspended { reason }) => {
				println!("! sync suspended, the server refused the api key ({reason}); use `key <secret>`");
			}
			Ok(_) => {}
			Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped sync events"),
			Err(RecvError::Closed) => break,
		}
	}
}

async fn report_asset_events(node: Arc<Node>) {
	let mut events = node.subscribe_assets();

	loop {
		match events.recv().await {
			Ok(WorkerEvent::UpdateAvailable { version }) => {
				println!("* client version {version} downloaded; type `activate` when no sale is open");
			}
			Ok(WorkerEvent::ReloadRequested { version }) => {
				info!(version, "Reloading onto the new client version");
				println!("* reloaded onto client version {version}");
			}
			Ok(WorkerEvent::InstallFailed { version, error }) => {
				error!(version, %error, "Client update failed");
			}
			Ok(WorkerEvent::Activated { .. }) => {}
			Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped asset events"),
			Err(RecvError::Closed) => break,
		}
	}
}
