//! Operator CLI over the local sync state

pub mod formatting;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::SnapshotCache;
use crate::config::AppConfig;
use crate::remote::{RemoteGraph, RemoteStore};
use crate::storage::{DuckDbStorage, KeyValueStorage};
use crate::sync::OfflineQueue;

/// canvas-sync - inspect and flush offline canvas state
#[derive(Parser, Debug)]
#[command(name = "canvas-sync")]
#[command(about = "Inspect the snapshot cache and offline write queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (defaults to the standard lookup order)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Snapshot cache operations
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Offline write queue operations
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Configuration operations
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CacheAction {
    /// List cached workspaces, most recently written first
    List,
    /// Print one cached snapshot as JSON
    Show { workspace: String },
    /// Remove every cached snapshot and the workspace listing
    Clear,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum QueueAction {
    /// Show pending writes in drain order
    Status,
    /// Flush pending writes to the configured remote
    Drain,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
}

/// Load configuration from `path` or the default lookup, then apply
/// environment overrides and validate.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load()?,
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Remote store selected by `[remote] base_url`, or `None` when no remote
/// is configured.
pub fn build_remote(config: &AppConfig) -> Result<Option<Arc<dyn RemoteStore>>> {
    match &config.remote.base_url {
        #[cfg(feature = "http-remote")]
        Some(url) => {
            let timeout = std::time::Duration::from_millis(config.sync.fetch_timeout_ms);
            let documents = crate::remote::HttpDocumentStore::new(url, timeout)?;
            Ok(Some(Arc::new(RemoteGraph::new(documents))))
        }
        #[cfg(not(feature = "http-remote"))]
        Some(url) => Err(anyhow::anyhow!(
            "remote {} configured but built without the http-remote feature",
            url
        )),
        None => Ok(None),
    }
}

/// Install the stderr subscriber. `RUST_LOG` directives are kept; the
/// configured level applies to this crate unless `RUST_LOG` already names it.
pub fn init_tracing(config: &AppConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(config, std::env::var("RUST_LOG").ok().as_deref()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn log_filter(config: &AppConfig, rust_log: Option<&str>) -> String {
    let crate_level = format!("canvas_sync={}", config.logging.level.to_lowercase());
    match rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        None => crate_level,
        Some(directives) if directives.contains("canvas_sync") => directives.to_string(),
        Some(directives) => format!("{},{}", directives, crate_level),
    }
}

pub struct CliState {
    pub config: AppConfig,
    pub cache: SnapshotCache,
    pub queue: Arc<OfflineQueue>,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl CliState {
    /// Open the configured DuckDB file.
    pub fn initialize(config: AppConfig) -> Result<Self> {
        let storage = DuckDbStorage::open(&config.storage.path).with_context(|| {
            format!("opening storage at {}", config.storage.path.display())
        })?;
        let remote = build_remote(&config)?;
        Ok(Self::from_parts(config, Arc::new(storage), remote))
    }

    pub fn from_parts(
        config: AppConfig,
        storage: Arc<dyn KeyValueStorage>,
        remote: Option<Arc<dyn RemoteStore>>,
    ) -> Self {
        let cache = SnapshotCache::new(Arc::clone(&storage), config.cache.max_entries);
        let queue = Arc::new(OfflineQueue::restore(storage));
        Self {
            config,
            cache,
            queue,
            remote,
        }
    }

    /// Run one command and return what should be printed.
    pub async fn execute(&self, command: &Commands) -> Result<String> {
        match command {
            Commands::Cache { action } => self.cache_command(action),
            Commands::Queue { action } => self.queue_command(action).await,
            Commands::Config {
                action: ConfigAction::Show,
            } => Ok(self.config.summary()),
        }
    }

    fn cache_command(&self, action: &CacheAction) -> Result<String> {
        match action {
            CacheAction::List => {
                let entries: Vec<_> = self
                    .cache
                    .cached_ids()
                    .into_iter()
                    .map(|id| {
                        let snapshot = self.cache.get(&id);
                        (id, snapshot)
                    })
                    .collect();
                Ok(formatting::format_cache_listing(
                    &entries,
                    &self.cache.get_metadata(),
                    self.cache.capacity(),
                ))
            }
            CacheAction::Show { workspace } => match self.cache.get(workspace) {
                Some(snapshot) => Ok(format!("{}\n", serde_json::to_string_pretty(&snapshot)?)),
                None => Err(anyhow::anyhow!("No cached snapshot for '{}'", workspace)),
            },
            CacheAction::Clear => {
                let removed = self.cache.len();
                if self.cache.clear() {
                    Ok(format!("Cleared {} cached workspaces\n", removed))
                } else {
                    Err(anyhow::anyhow!("Cache could not be fully cleared; see log"))
                }
            }
        }
    }

    async fn queue_command(&self, action: &QueueAction) -> Result<String> {
        match action {
            QueueAction::Status => Ok(formatting::format_queue_status(
                &self.queue.entries_snapshot(),
            )),
            QueueAction::Drain => {
                // Draining removes entries from storage; without a real
                // remote they would be gone for good.
                let Some(remote) = &self.remote else {
                    return Err(anyhow::anyhow!(
                        "No remote configured; set [remote] base_url or CANVAS_SYNC_REMOTE_URL to drain {} pending writes",
                        self.queue.pending_count()
                    ));
                };
                let report = self
                    .queue
                    .drain_queue(
                        remote.as_ref(),
                        &self.config.remote.user_id,
                        self.config.sync.conflict_policy,
                    )
                    .await;
                Ok(formatting::format_drain_report(&report))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryDocumentStore;
    use crate::storage::MemoryStorage;
    use canvas_graph::WorkspaceSnapshot;

    fn state() -> CliState {
        CliState::from_parts(
            AppConfig::default(),
            Arc::new(MemoryStorage::new()),
            Some(Arc::new(RemoteGraph::new(MemoryDocumentStore::new()))),
        )
    }

    #[test]
    fn parses_nested_subcommands() {
        let cli = Cli::parse_from(["canvas-sync", "cache", "show", "ws-1"]);
        assert_eq!(
            cli.command,
            Commands::Cache {
                action: CacheAction::Show {
                    workspace: "ws-1".to_string()
                }
            }
        );

        let cli = Cli::parse_from(["canvas-sync", "--config", "alt.toml", "queue", "drain"]);
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        assert_eq!(
            cli.command,
            Commands::Queue {
                action: QueueAction::Drain
            }
        );
    }

    #[tokio::test]
    async fn cache_commands_round_trip() {
        let state = state();
        state
            .cache
            .set("ws-1", &WorkspaceSnapshot::new(vec![], vec![]));

        let listing = state
            .execute(&Commands::Cache {
                action: CacheAction::List,
            })
            .await
            .unwrap();
        assert!(listing.contains("ws-1"));

        let missing = state
            .execute(&Commands::Cache {
                action: CacheAction::Show {
                    workspace: "nope".to_string(),
                },
            })
            .await;
        assert!(missing.is_err());

        let cleared = state
            .execute(&Commands::Cache {
                action: CacheAction::Clear,
            })
            .await
            .unwrap();
        assert_eq!(cleared, "Cleared 1 cached workspaces\n");
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn queue_drain_reports_commits() {
        let state = state();
        state.queue.queue_save("ws-1", vec![], vec![]);

        let status = state
            .execute(&Commands::Queue {
                action: QueueAction::Status,
            })
            .await
            .unwrap();
        assert!(status.contains("Pending writes (1)"));

        let drained = state
            .execute(&Commands::Queue {
                action: QueueAction::Drain,
            })
            .await
            .unwrap();
        assert!(drained.contains("committed ws-1"));
        assert_eq!(state.queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn drain_without_remote_keeps_the_queue() {
        let config = AppConfig::embedded_default().unwrap();
        assert!(config.remote.base_url.is_none());
        assert!(build_remote(&config).unwrap().is_none());

        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let state = CliState::from_parts(config, Arc::clone(&storage), None);
        assert!(state.queue.queue_save("ws-1", vec![], vec![]));

        let err = state
            .execute(&Commands::Queue {
                action: QueueAction::Drain,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No remote configured"));
        assert_eq!(state.queue.pending_count(), 1);

        let reopened = OfflineQueue::restore(storage);
        assert_eq!(reopened.pending_workspaces(), vec!["ws-1"]);
    }

    #[test]
    fn log_filter_merges_rust_log_with_configured_level() {
        let mut config = AppConfig::default();
        config.logging.level = "DEBUG".to_string();

        assert_eq!(log_filter(&config, None), "canvas_sync=debug");
        assert_eq!(log_filter(&config, Some("  ")), "canvas_sync=debug");
        assert_eq!(log_filter(&config, Some("duckdb=warn")), "duckdb=warn,canvas_sync=debug");
        assert_eq!(log_filter(&config, Some("canvas_sync=trace")), "canvas_sync=trace");
    }
}
