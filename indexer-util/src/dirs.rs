use super::constants::INDEXER_ROOT_DIR;
use std::path::PathBuf;

/// `~/.chain-indexer`, or `./.chain-indexer` when there is no home directory.
pub fn get_indexer_root_dir() -> PathBuf {
    let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(INDEXER_ROOT_DIR)
}

/// Per-service directory holding `config.toml`, the `db/` store and `logs/`.
pub fn get_service_dir(service_name: &str) -> PathBuf {
    get_indexer_root_dir().join(service_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_dir_under_root() {
        let dir = get_service_dir("balance-indexer");
        assert!(dir.ends_with(".chain-indexer/balance-indexer"));
        assert_eq!(dir.parent(), Some(get_indexer_root_dir().as_path()));
    }
}
