//! Operator console: one command per line on stdin.

use pos_core::Node;
use pos_sync::{Decimal, TransactionId};

use std::str::FromStr;

use anyhow::{bail, Result};
use serde_json::json;

pub const HELP: &str = "\
commands:
  sale <total>     record a completed sale, e.g. `sale 12.50`
  health           queue health and records waiting for review
  sync             sync now (after connectivity is back)
  requeue <id>     retry a record parked for review
  purge            drop synced records to free local capacity
  activate         switch to the downloaded client version
  key <secret>     replace the api key and resume a suspended sync
  quit             stop the terminal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Sale(Decimal),
	Health,
	Sync,
	Requeue(TransactionId),
	Purge,
	Activate,
	Key(String),
	Help,
	Quit,
}

impl FromStr for Command {
	type Err = anyhow::Error;

	fn from_str(line: &str) -> Result<Self> {
		let mut words = line.split_whitespace();
		let Some(name) = words.next() else {
			bail!("empty command");
		};
		let argument = words.next();

		if words.next().is_some() {
			bail!("too many arguments for `{name}`");
		}

		Ok(match (name, argument) {
			("sale", Some(total)) => Self::Sale(Decimal::from_str(total)?),
			("health", None) => Self::Health,
			("sync", None) => Self::Sync,
			("requeue", Some(id)) => Self::Requeue(TransactionId::parse(id)?),
			("purge", None) => Self::Purge,
			("activate", None) => Self::Activate,
			("key", Some(key)) => Self::Key(key.to_string()),
			("help", None) => Self::Help,
			("quit" | "exit", None) => Self::Quit,
			_ => bail!("unknown command `{}`, type `help`", line.trim()),
		})
	}
}

/// Runs one command; `Ok(false)` means the operator asked to quit.
pub async fn execute(node: &Node, command: Command) -> Result<bool> {
	match command {
		Command::Sale(total) => {
			let record = node
				.record_sale(total, json!({ "source": "console" }))
				.await?;
			println!("sale {} queued ({total})", record.id);
		}

		Command::Health => {
			let health = node.queue_health().await?;
			println!(
				"pending {} | in flight {} | retrying {} | synced {} | {}/{} stored",
				health.pending,
				health.in_flight,
				health.retrying,
				health.synced,
				health.stored(),
				health.capacity,
			);
			if let Some(oldest) = health.oldest_unsynced {
				println!("oldest unsynced sale: {oldest}");
			}
			if node.is_sync_suspended() {
				println!("sync is suspended: the server refused the api key");
			}
			for item in &health.awaiting_review {
				println!(
					"needs review: {} {} after {} attempts: {}",
					item.id,
					item.total,
					item.attempts,
					item.last_error.as_deref().unwrap_or("unknown error"),
				);
			}
		}

		Command::Sync => {
			node.sync_now();
			println!("sync requested");
		}

		Command::Requeue(id) => {
			if node.requeue(&id).await? {
				println!("{id} requeued");
			} else {
				println!("{id} is not a failed record");
			}
		}

		Command::Purge => {
			println!("purged {} synced records", node.purge_synced().await?);
		}

		Command::Activate => {
			let activation = node.confirm_update().await?;
			println!("client version {} active", activation.version);
		}

		Command::Key(key) => {
			node.set_api_key(Some(key)).await?;
			println!("api key saved, sync resumed");
		}

		Command::Help => println!("{HELP}"),

		Command::Quit => return Ok(false),
	}

	Ok(true)
}
