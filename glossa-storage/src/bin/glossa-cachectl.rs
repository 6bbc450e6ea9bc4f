//! Translation cache maintenance tool.
//!
//! Usage: glossa-cachectl <command> [args]
//!
//! Reads the same environment as the service (`GLOSSA_CACHE_DIR`,
//! `GLOSSA_CACHE_MAX_SIZE`, ...). Results go to stdout as JSON, logs to
//! stderr (`RUST_LOG` filters, `GLOSSA_LOG_FORMAT=json` for JSON logs).

use std::process::ExitCode;
use std::sync::Arc;

use glossa_core::{CacheConfig, CacheResult, Clock, DurableConfig, SystemClock};
use glossa_storage::{
    migrate_legacy_snapshot, CacheFacade, DurableStore, FileSnapshotStore, LmdbDurableStore,
};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "\
Usage: glossa-cachectl <command> [args]

Commands:
  stats                  Show memory and durable tier sizes
  get <key>              Print the cached value for a key
  invalidate <pattern>   Remove every key containing <pattern> from both tiers
  purge                  Remove expired durable records
  clear                  Empty both tiers
  migrate <legacy-dir>   Import a legacy snapshot directory into the durable tier";

/// Operations served through the cache facade.
enum CacheCommand {
    Stats,
    Get(String),
    Invalidate(String),
    Purge,
    Clear,
}

enum Command {
    Cache(CacheCommand),
    Migrate(String),
}

impl Command {
    fn parse(args: &[String]) -> Option<Self> {
        let command = match args {
            [cmd] if cmd == "stats" => Command::Cache(CacheCommand::Stats),
            [cmd, key] if cmd == "get" => Command::Cache(CacheCommand::Get(key.clone())),
            [cmd, pattern] if cmd == "invalidate" && !pattern.is_empty() => {
                Command::Cache(CacheCommand::Invalidate(pattern.clone()))
            }
            [cmd] if cmd == "purge" => Command::Cache(CacheCommand::Purge),
            [cmd] if cmd == "clear" => Command::Cache(CacheCommand::Clear),
            [cmd, dir] if cmd == "migrate" => Command::Migrate(dir.clone()),
            _ => return None,
        };
        Some(command)
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("glossa_storage=info,warn"));
    let json = std::env::var("GLOSSA_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .try_init();
}

async fn run(command: Command) -> CacheResult<Value> {
    let config = CacheConfig::from_env();
    config.validate()?;
    let durable_config = DurableConfig::from_env();
    durable_config.validate()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(LmdbDurableStore::new(durable_config, clock.clone()));
    store.open().await?;

    match command {
        Command::Migrate(dir) => {
            let legacy = FileSnapshotStore::new(dir, config.snapshot_limit_bytes);
            let report = migrate_legacy_snapshot::<Value, _>(
                &legacy,
                store.as_ref(),
                &config.snapshot_namespace,
                clock.as_ref(),
            )
            .await?;
            Ok(match report {
                Some(report) => json!({
                    "migrated": true,
                    "found": report.found,
                    "imported": report.imported,
                    "skippedExpired": report.skipped_expired,
                }),
                None => json!({ "migrated": false }),
            })
        }
        Command::Cache(command) => {
            let cache: CacheFacade<Value, LmdbDurableStore> =
                CacheFacade::open(config, store.clone(), None, clock).await?;
            run_cache(command, &cache, &store).await
        }
    }
}

async fn run_cache(
    command: CacheCommand,
    cache: &CacheFacade<Value, LmdbDurableStore>,
    store: &LmdbDurableStore,
) -> CacheResult<Value> {
    let output = match command {
        CacheCommand::Stats => {
            let stats = cache.stats();
            json!({
                "memory": {
                    "size": stats.size,
                    "maxSize": stats.max_size,
                    "ttlInDays": stats.ttl_in_days,
                },
                "durableRecords": store.len().await?,
                "path": store.path().display().to_string(),
            })
        }
        CacheCommand::Get(key) => {
            let value = cache.get(&key).await;
            json!({ "key": key, "hit": value.is_some(), "value": value })
        }
        CacheCommand::Invalidate(pattern) => {
            let removed = cache.clear_by_key_pattern(&pattern).await;
            cache.close().await;
            json!({ "pattern": pattern, "removedFromMemory": removed })
        }
        CacheCommand::Purge => json!({ "purged": cache.purge_expired().await }),
        CacheCommand::Clear => {
            cache.clear_all().await;
            json!({ "cleared": true })
        }
    };
    Ok(output)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = Command::parse(&args) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    match run(command).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
