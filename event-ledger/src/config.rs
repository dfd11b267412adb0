//! Configuration for the ledger system

use crate::types::Category;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Ledger system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage directory for record files
    pub data_dir: PathBuf,

    /// Flush policy
    pub flush: FlushConfig,

    /// Notification pool configuration
    pub notification: NotificationConfig,

    /// Hydration/cleanup configuration
    pub hydration: HydrationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            flush: FlushConfig::default(),
            notification: NotificationConfig::default(),
            hydration: HydrationConfig::default(),
        }
    }
}

/// Flush policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Flush and fsync after every write
    pub auto_flush: bool,

    /// Periodic regime: flush after this many writes
    pub interval_writes: u64,

    /// Periodic regime: flush after this much wall-clock time (seconds)
    pub interval_secs: f64,

    /// Force a flush before serving any read while dirty
    pub flush_before_read: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            auto_flush: true,
            interval_writes: 5000,
            interval_secs: 5.0,
            flush_before_read: true,
        }
    }
}

/// Notification pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Worker count of the shared pool the manager injects into every ledger
    pub shared_workers: usize,

    /// Bounded queue capacity; a full queue degrades delivery to the writer thread
    pub queue_capacity: usize,

    /// Per-category overrides of the static pool-size table
    pub pool_sizes: HashMap<Category, usize>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            shared_workers: 10,
            queue_capacity: 1024,
            pool_sizes: HashMap::new(),
        }
    }
}

impl NotificationConfig {
    /// Worker count for a category-owned pool
    pub fn pool_size_for(&self, category: Category) -> usize {
        self.pool_sizes
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.notify_workers())
    }
}

/// Hydration and memory-cleanup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    /// Look-back window (hours) for hydration and cleanup
    pub lookback_hours: i64,

    /// Categories hydrated into memory by `load_historical_data`.
    ///
    /// High-volume market data stays disk-backed to keep memory bounded;
    /// only transactional/state categories are mirrored by default.
    pub categories: Vec<Category>,
}

impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 25,
            categories: vec![
                Category::TradeFills,
                Category::TradePlacement,
                Category::VirtualOrders,
                Category::TradeExecution,
            ],
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load defaults with environment variable overrides
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(value) = std::env::var("LEDGER_AUTO_FLUSH") {
            config.flush.auto_flush = value == "1" || value.eq_ignore_ascii_case("true");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.flush.auto_flush);
        assert_eq!(config.flush.interval_writes, 5000);
        assert_eq!(config.flush.interval_secs, 5.0);
        assert!(config.flush.flush_before_read);
        assert_eq!(config.hydration.lookback_hours, 25);
        assert!(config
            .hydration
            .categories
            .contains(&Category::TradeFills));
    }

    #[test]
    fn test_pool_size_override() {
        let mut config = NotificationConfig::default();
        assert_eq!(config.pool_size_for(Category::PriceUpdate), 10);
        config.pool_sizes.insert(Category::PriceUpdate, 3);
        assert_eq!(config.pool_size_for(Category::PriceUpdate), 3);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/tmp/ledgers"

[flush]
auto_flush = false
interval_writes = 100
interval_secs = 2.5

[notification.pool_sizes]
price_update = 6

[hydration]
lookback_hours = 48
categories = ["trade_fills"]
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/ledgers"));
        assert!(!config.flush.auto_flush);
        assert_eq!(config.flush.interval_writes, 100);
        assert_eq!(config.flush.interval_secs, 2.5);
        assert!(config.flush.flush_before_read);
        assert_eq!(config.notification.pool_size_for(Category::PriceUpdate), 6);
        assert_eq!(config.hydration.lookback_hours, 48);
        assert_eq!(config.hydration.categories, vec![Category::TradeFills]);
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "flush = \"nope\"").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
