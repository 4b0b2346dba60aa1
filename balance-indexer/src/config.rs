use indexer_util::{BTCConfig, DEFAULT_CHECKPOINT_SET};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn default_checkpoint_interval_secs() -> u64 {
    15 * 60
}

fn default_to_height() -> u32 {
    99_999_999
}

fn default_checkpoint_set_name() -> String {
    DEFAULT_CHECKPOINT_SET.to_string()
}

fn default_writer_threads() -> usize {
    num_cpus::get()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_write_retries() -> u32 {
    3
}

fn default_transaction_cache_size() -> usize {
    10_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,

    #[serde(default)]
    pub from_height: u32,

    #[serde(default = "default_to_height")]
    pub to_height: u32,

    // Start every stream from genesis, stored checkpoints are still updated
    #[serde(default)]
    pub ignore_checkpoints: bool,

    #[serde(default = "default_checkpoint_set_name")]
    pub checkpoint_set_name: String,

    #[serde(default = "default_writer_threads")]
    pub writer_threads: usize,

    // Pending batches per writer before producers block
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    // Parent transactions kept in memory while resolving spent coins
    #[serde(default = "default_transaction_cache_size")]
    pub transaction_cache_size: usize,
}

impl SyncConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            from_height: 0,
            to_height: default_to_height(),
            ignore_checkpoints: false,
            checkpoint_set_name: default_checkpoint_set_name(),
            writer_threads: default_writer_threads(),
            queue_capacity: default_queue_capacity(),
            write_retries: default_write_retries(),
            transaction_cache_size: default_transaction_cache_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IndexerConfig {
    #[serde(default)]
    pub btc: BTCConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl IndexerConfig {
    pub fn load(root_dir: &Path) -> Result<Self, String> {
        let path = root_dir.join("config.toml");
        if !path.exists() {
            let default_config = IndexerConfig::default();
            info!(
                "Config file {} does not exist. Using default configuration.",
                path.display()
            );
            if let Ok(text) = toml::to_string_pretty(&default_config) {
                info!("Default config: {}", text);
            }
            return Ok(default_config);
        }

        info!("Loading config from {}", path.display());
        let config_data = std::fs::read_to_string(&path).map_err(|e| {
            let msg = format!("Failed to read config file {}: {}", path.display(), e);
            error!("{}", msg);
            msg
        })?;

        Self::parse(&config_data).map_err(|e| {
            let msg = format!("Failed to parse config file {}: {}", path.display(), e);
            error!("{}", msg);
            msg
        })
    }

    pub fn parse(data: &str) -> Result<Self, String> {
        let config: IndexerConfig = toml::from_str(data).map_err(|e| e.to_string())?;
        if config.sync.from_height > config.sync.to_height {
            return Err(format!(
                "from_height {} is above to_height {}",
                config.sync.from_height, config.sync.to_height
            ));
        }

        Ok(config)
    }
}

pub type IndexerConfigRef = Arc<IndexerConfig>;
