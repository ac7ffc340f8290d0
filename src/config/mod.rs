pub mod app_config;

pub use app_config::{
    AppConfig, CacheConfig, LoggingConfig, RemoteConfig, StorageConfig, SyncConfig,
};
