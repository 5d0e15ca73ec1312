use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::{
	non_blocking::WorkerGuard,
	rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str =
	"pos_core=info,pos_queue=info,pos_assets=info,pos_cloud_api=info,pos_actors=info,pos_terminal=info";

/// Logs to stdout and to a daily rotated `<data_dir>/logs/terminal.log`.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init_logger(data_dir: &Path) -> Result<WorkerGuard> {
	let logs_dir = data_dir.join("logs");
	std::fs::create_dir_all(&logs_dir)
		.with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

	let (file_writer, guard) = tracing_appender::non_blocking(RollingFileAppender::new(
		Rotation::DAILY,
		logs_dir,
		"terminal.log",
	));

	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
		.with(fmt::layer().with_target(true).with_writer(std::io::stdout))
		.with(
			fmt::layer()
				.with_target(true)
				.with_ansi(false) // No ANSI colors in log files
				.with_writer(file_writer),
		)
		.try_init()
		.context("failed to initialize tracing")?;

	Ok(guard)
}
