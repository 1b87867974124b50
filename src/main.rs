use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use substrate_ingest::chain::SubxtLedgerClient;
use substrate_ingest::config::IngestArgs;
use substrate_ingest::ingest::{
	IngestError, IngestPipeline, LoggingProgressSink, RetryConfig, is_network_transient,
	retry_with,
};
use substrate_ingest::store::{IndexStore, MongoStore, StoreError};

/// Attempts made to reach the node and the database at startup.
const STARTUP_RETRIES: u32 = 10;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	// Initialize tracing subscriber, RUST_LOG overrides the defaults
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::builder()
				.with_default_directive(tracing::Level::INFO.into())
				.from_env_lossy(),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let args = IngestArgs::parse();

	match run(args).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("Ingestion failed: {}", e);
			if let Some(height) = e.failed_height() {
				error!(
					"Progress is saved up to the block before {}. Run the same command again to resume.",
					height
				);
			}
			ExitCode::FAILURE
		}
	}
}

async fn run(args: IngestArgs) -> Result<(), IngestError> {
	args.validate()?;
	info!("Starting ingestion service for chain {}", args.chain_id);

	let startup = RetryConfig::default().with_max_retries(STARTUP_RETRIES);

	let client = retry_with(&startup, "Connecting to the node", is_network_transient, || {
		SubxtLedgerClient::connect(&args.rpc_url)
	})
	.await?;
	info!("Created ledger client");

	let store = MongoStore::connect(&args.mongo_uri, &args.database).await?;
	retry_with(
		&startup,
		"Creating collection indexes",
		|e: &StoreError| matches!(e, StoreError::Mongo(_)),
		|| store.ensure_indexes(),
	)
	.await?;
	info!("Created store");

	let pipeline = IngestPipeline::new(Arc::new(client), Arc::new(store), args.chain())
		.with_retry(args.network_retry())
		.with_log_interval(args.progress_log_interval)
		.with_sink(LoggingProgressSink);

	let report = pipeline.run(&args.options()).await?;
	if !report.gaps.is_empty() {
		info!(
			"{} gaps remain below block {:?}, re-run over them with --start/--end",
			report.gaps.len(),
			report.last_indexed_block
		);
	}
	Ok(())
}
