use commitment_ledger::delegate::{DecryptionDelegate, DelegateClient, HttpDelegateConnector};
use commitment_ledger::indexer::IndexerClient;
use commitment_ledger::ledger::{CommitmentStore, HistoryStore, LedgerDb};
use commitment_ledger::scheduler::Scheduler;
use commitment_ledger::sync::{
	DecryptionDispatcher, DecryptionKey, SyncStateTracker, Watcher, WatcherParts,
};
use commitment_ledger::utils::format_token_amount;
use commitment_ledger::LedgerConfig;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() {
	let mut filter = tracing_subscriber::EnvFilter::from_default_env()
		.add_directive(tracing::Level::INFO.into());
	if std::env::var("LEDGER_DEBUG").is_ok() {
		if let Ok(directive) = "commitment_ledger=debug".parse() {
			filter = filter.add_directive(directive);
		}
	}
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	if let Err(e) = run().await {
		error!("Ledger exited with error: {}", e);
		std::process::exit(1);
	}
}

fn load_config() -> Result<LedgerConfig, BoxError> {
	let path = std::env::args()
		.nth(1)
		.or_else(|| std::env::var("LEDGER_CONFIG").ok());
	let config = match path {
		Some(path) => {
			info!("Loading config from {}", path);
			LedgerConfig::from_file(path)?
		}
		None => LedgerConfig::default(),
	};
	let config = config.with_env_overrides()?;
	config.validate()?;
	Ok(config)
}

async fn run() -> Result<(), BoxError> {
	let config = load_config()?;
	info!("Starting commitment ledger for {} / {}", config.owner, config.token);

	let db = LedgerDb::open(&config.data_dir)?;
	info!("Opened ledger database at {}", config.data_dir.display());

	let request_timeout = config.delegate_timeout();
	let source = Arc::new(IndexerClient::new(
		config.indexer_url.clone(),
		config.indexer_ws_url.clone(),
		request_timeout,
	)?);
	let delegate: Option<Arc<dyn DecryptionDelegate>> = match &config.delegate_url {
		Some(url) => Some(Arc::new(DelegateClient::new(url.clone(), request_timeout)?)),
		None => None,
	};
	let key = config
		.decryption_key
		.as_deref()
		.map(DecryptionKey::from_hex)
		.transpose()?;
	if key.is_none() && delegate.is_none() {
		warn!("Neither a decryption key nor a delegate is configured; only foreign delegates can open notes");
	}

	// Failed background flushes are logged by the scheduler itself
	let scheduler = Arc::new(Scheduler::new());

	let parts = WatcherParts {
		scheduler,
		source: source.clone(),
		delegate: delegate.clone(),
		decryptors: DecryptionDispatcher::new(
			key,
			delegate,
			Arc::new(HttpDelegateConnector::new(request_timeout)),
		),
		commitments: CommitmentStore::new(db.commitments_tree()),
		history: HistoryStore::new(db.history_tree()),
		tracker: SyncStateTracker::new(db.sync_state_tree(), source, config.tracker_settings()),
	};
	let watcher = Watcher::new(parts, config.watcher_settings())?;

	watcher.start().await?;
	let decimals = config.token_decimals;
	let status = watcher.sync_status();
	info!(
		"Synced from block {} to {}; balance {}",
		status.anchor_block,
		status.current_block,
		format_token_amount(watcher.get_balance()?, decimals)
	);

	let page = watcher.get_paginated_transactions(10, None, true)?;
	for group in &page.groups {
		info!(
			"block {} tx {}: +{} -{}",
			group.block_number,
			group
				.transaction_hash
				.map(|h| h.to_string())
				.unwrap_or_else(|| "-".to_string()),
			format_token_amount(group.incoming_value(), decimals),
			format_token_amount(group.outgoing_value(), decimals),
		);
	}

	if let Ok(raw) = std::env::var("LEDGER_SPEND_AMOUNT") {
		let amount: u128 = raw.trim().parse()?;
		let recipient = std::env::var("LEDGER_SPEND_RECIPIENT").unwrap_or_else(|_| config.owner.clone());
		match watcher.prepare_spend(amount, &recipient) {
			Ok(plan) => info!(
				"Spend plan: {} inputs totalling {}, change {}",
				plan.inputs.len(),
				format_token_amount(plan.total, decimals),
				format_token_amount(plan.change, decimals)
			),
			Err(e) => warn!("Cannot fund spend of {}: {}", format_token_amount(amount, decimals), e),
		}
	}

	let mut balance = watcher.subscribe_balance();
	info!("Tailing live events, press Ctrl-C to stop");
	loop {
		tokio::select! {
			changed = balance.changed() => {
				if changed.is_err() {
					break;
				}
				let value = *balance.borrow_and_update();
				info!("Balance updated: {}", format_token_amount(value, decimals));
			}
			_ = tokio::signal::ctrl_c() => {
				info!("Shutting down");
				break;
			}
		}
	}

	watcher.soft_reset();
	tokio::time::timeout(Duration::from_secs(5), db.flush()).await??;
	Ok(())
}
