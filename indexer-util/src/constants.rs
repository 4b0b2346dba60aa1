// Service names
pub const BALANCE_INDEXER_SERVICE_NAME: &str = "balance-indexer";

// Directory constants
pub const INDEXER_ROOT_DIR: &str = ".chain-indexer";

// Default checkpoint set, used when the config leaves it empty
pub const DEFAULT_CHECKPOINT_SET: &str = "default";
