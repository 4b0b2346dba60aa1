#[macro_use]
extern crate log;

use balance_indexer::balance::{BalanceId, WalletRule, WalletRuleEntry};
use balance_indexer::btc::create_btc_rpc_client;
use balance_indexer::chain::ChainView;
use balance_indexer::checkpoint::IndexerCheckpoint;
use balance_indexer::config::IndexerConfig;
use balance_indexer::db::IndexerDB;
use balance_indexer::index::ChainIndexer;
use balance_indexer::output::IndexOutput;
use bitcoincore_rpc::bitcoin::ScriptBuf;
use clap::{Parser, Subcommand};
use indexer_util::{BALANCE_INDEXER_SERVICE_NAME, LogConfig};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "balance-indexer")]
#[command(version = "0.1.0")]
#[command(about = "Bitcoin balance change and chain indexer", long_about = None)]
struct BalanceIndexerCli {
    #[command(subcommand)]
    command: BalanceIndexerCommands,

    /// Duplicate the log output to the console
    #[arg(short, long)]
    console: bool,
}

#[derive(Subcommand, Debug, Clone)]
#[command(rename_all = "kebab-case")]
enum BalanceIndexerCommands {
    /// Store raw blocks since the `blocks` checkpoint
    IndexBlocks {},

    /// Store transactions since the `transactions` checkpoint
    IndexTransactions {},

    /// Index script balance changes since the `balances` checkpoint
    IndexBalances {},

    /// Index wallet balance changes since the `wallets` checkpoint
    IndexWallets {},

    /// Persist the node's main chain headers
    IndexChain {},

    AddWalletRule {
        #[arg(long)]
        wallet: String,

        /// scriptPubKey in hex
        #[arg(long)]
        script: String,

        /// Redeem script in hex
        #[arg(long)]
        redeem: Option<String>,
    },

    /// Print the balance changes of a script (hex), `h$<hash>` or `w$<wallet>`
    Query {
        #[arg(long)]
        id: String,
    },

    /// Print the stored position of a stream
    Checkpoint {
        #[arg(long)]
        name: String,
    },

    /// Delete the database files, DANGEROUS: This will remove all indexed data!
    ClearDb {},
}

impl BalanceIndexerCommands {
    fn log_name(&self) -> &'static str {
        match self {
            Self::IndexBlocks {} => "index_blocks",
            Self::IndexTransactions {} => "index_transactions",
            Self::IndexBalances {} => "index_balances",
            Self::IndexWallets {} => "index_wallets",
            Self::IndexChain {} => "index_chain",
            Self::AddWalletRule { .. } => "add_wallet_rule",
            Self::Query { .. } => "query",
            Self::Checkpoint { .. } => "checkpoint",
            Self::ClearDb {} => "clear_db",
        }
    }

    fn is_pass(&self) -> bool {
        matches!(
            self,
            Self::IndexBlocks {}
                | Self::IndexTransactions {}
                | Self::IndexBalances {}
                | Self::IndexWallets {}
                | Self::IndexChain {}
        )
    }
}

fn exit_with(msg: &str) -> ! {
    error!("{}", msg);
    println!("{}", msg);
    std::process::exit(1);
}

// Runs one indexing pass, returning a summary line
fn run_pass(indexer: &ChainIndexer, command: &BalanceIndexerCommands) -> Result<String, String> {
    if let BalanceIndexerCommands::IndexChain {} = command {
        let outcome = indexer.index_node_main_chain()?;
        return Ok(format!("Chain index: {:?}", outcome));
    }

    let chain = indexer.get_node_chain()?;
    info!("Node chain loaded with tip {}", chain.tip_height());

    let stats = match command {
        BalanceIndexerCommands::IndexBlocks {} => indexer.index_blocks(&chain)?,
        BalanceIndexerCommands::IndexTransactions {} => indexer.index_transactions(&chain)?,
        BalanceIndexerCommands::IndexBalances {} => indexer.index_ordered_balances(&chain)?,
        BalanceIndexerCommands::IndexWallets {} => indexer.index_wallet_balances(&chain)?,
        _ => return Err(format!("{:?} is not an indexing pass", command)),
    };

    Ok(format!(
        "Indexed {} blocks, {} entities, last height {:?}",
        stats.blocks, stats.entities, stats.last_height
    ))
}

async fn run_pass_until_signal(
    indexer: ChainIndexer,
    command: BalanceIndexerCommands,
) -> Result<String, String> {
    let pass_indexer = indexer.clone();
    let mut task = tokio::task::spawn_blocking(move || run_pass(&pass_indexer, &command));

    use tokio::signal;
    let sigint = signal::ctrl_c();

    #[cfg(unix)]
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to create SIGTERM signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    let ret = tokio::select! {
        _ = sigint => {
            info!("Received Ctrl+C, stopping the pass...");
            None
        }
        _ = sigterm => {
            info!("Received SIGTERM, stopping the pass...");
            None
        }
        ret = &mut task => Some(ret),
    };

    // The pass saves its checkpoint when it sees the flag
    let ret = match ret {
        Some(ret) => ret,
        None => {
            indexer.cancel();
            task.await
        }
    };

    ret.map_err(|e| format!("Indexing pass panicked: {}", e))?
}

#[tokio::main]
async fn main() {
    let cli = BalanceIndexerCli::parse();

    let (_lock, _guard) = indexer_util::init_process_lock(BALANCE_INDEXER_SERVICE_NAME);

    let file_name = format!("{}_{}", BALANCE_INDEXER_SERVICE_NAME, cli.command.log_name());
    let log_config = LogConfig::new(BALANCE_INDEXER_SERVICE_NAME)
        .with_file_name(&file_name)
        .enable_console(cli.console);
    indexer_util::init_log(log_config);

    let root_dir = indexer_util::get_service_dir(BALANCE_INDEXER_SERVICE_NAME);
    info!("Using service directory: {}", root_dir.display());

    if let BalanceIndexerCommands::ClearDb {} = cli.command {
        if let Err(e) = IndexerDB::clear(&root_dir) {
            error!("Failed to clear database files: {}", e);
            std::process::exit(1);
        }
        println!("Database files cleared successfully.");
        return;
    }

    let output = if cli.command.is_pass() {
        IndexOutput::new()
    } else {
        IndexOutput::hidden()
    };
    let output = Arc::new(output);

    let config = match IndexerConfig::load(&root_dir) {
        Ok(cfg) => cfg,
        Err(e) => exit_with(&format!("Failed to load config: {}", e)),
    };
    let config = Arc::new(config);

    output.println("Opening database...");
    let db = match IndexerDB::new(&root_dir) {
        Ok(db) => db,
        Err(e) => exit_with(&format!("Failed to open database: {}", e)),
    };
    let db = Arc::new(db);

    let btc_client = create_btc_rpc_client(&config);
    let indexer = ChainIndexer::new(config.clone(), db.clone(), btc_client.clone(), output.clone());

    match cli.command.clone() {
        BalanceIndexerCommands::AddWalletRule {
            wallet,
            script,
            redeem,
        } => {
            let script_pubkey = match ScriptBuf::from_hex(&script) {
                Ok(script) => script,
                Err(e) => exit_with(&format!("Invalid script {}: {}", script, e)),
            };
            let mut rule = WalletRule::new(script_pubkey);
            if let Some(redeem) = redeem {
                match ScriptBuf::from_hex(&redeem) {
                    Ok(redeem) => rule = rule.with_redeem_script(redeem),
                    Err(e) => exit_with(&format!("Invalid redeem script {}: {}", redeem, e)),
                }
            }

            if let Err(e) = indexer.add_wallet_rule(&WalletRuleEntry::new(&wallet, rule)) {
                exit_with(&format!("Failed to add wallet rule: {}", e));
            }
            println!("Wallet rule added to {}.", wallet);
        }
        BalanceIndexerCommands::Query { id } => {
            let balance_id = match id.parse::<BalanceId>() {
                Ok(id) => id,
                Err(e) => exit_with(&e),
            };

            let changes = match indexer.get_ordered_balance(&balance_id) {
                Ok(changes) => changes,
                Err(e) => exit_with(&format!("Failed to query {}: {}", balance_id, e)),
            };

            println!("{} balance changes for {}", changes.len(), balance_id);
            for change in changes.iter() {
                let amount = match change.amount() {
                    Some(amount) => amount.to_string(),
                    None => "unresolved".to_string(),
                };
                println!("{} {}", change.create_balance_locator(), amount);
            }
        }
        BalanceIndexerCommands::Checkpoint { name } => {
            let stream = match name.parse::<IndexerCheckpoint>() {
                Ok(stream) => stream,
                Err(e) => exit_with(&e),
            };

            match indexer.get_checkpoint(stream) {
                Ok(checkpoint) => println!(
                    "Checkpoint {} at height {} ({} locator entries)",
                    checkpoint.name,
                    checkpoint.height,
                    checkpoint.locator.blocks.len()
                ),
                Err(e) => exit_with(&format!("Failed to load checkpoint: {}", e)),
            }
        }
        command => {
            if let Err(e) = btc_client.init() {
                exit_with(&format!("Failed to connect to bitcoind: {}", e));
            }

            match run_pass_until_signal(indexer, command).await {
                Ok(summary) => output.finish(&summary),
                Err(e) => {
                    error!("Indexing pass failed: {}", e);
                    output.finish(&format!("Indexing pass failed: {}", e));
                    let _ = db.flush_all();
                    std::process::exit(1);
                }
            }

            let _ = btc_client.stop();
        }
    }

    db.flush_all().unwrap_or_else(|e| {
        error!("Failed to flush database on shutdown: {}", e);
    });
}
