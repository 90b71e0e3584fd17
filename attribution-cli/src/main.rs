use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use envconfig::Envconfig;

use attribution::config::{Config, CookieConfig};
use attribution::publish::PrintSink;
use attribution::rewrite::RewriteMode;
use attribution::storage::{Backends, MemoryCookieJar, MemoryStore, StorageError, StringStore};
use attribution::time::SystemTime;
use attribution::Tracker;

#[derive(Envconfig)]
struct CliConfig {
    #[envconfig(from = "ATTRIBUTION_STATE_PATH", default = "attribution-state.json")]
    state_path: String,
    #[envconfig(from = "ATTRIBUTION_REWRITE_MODE", default = "composite")]
    rewrite_mode: String,
    #[envconfig(from = "ATTRIBUTION_COOKIE_DOMAIN")]
    cookie_domain: Option<String>,
}

/// Durable store backed by a JSON file, standing in for localStorage so
/// first-touch state survives between invocations.
struct FileStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileStore {
    fn open(path: PathBuf) -> anyhow::Result<FileStore> {
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("unparseable state file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err).context("failed to read state file"),
        };
        Ok(FileStore {
            path,
            entries: RwLock::new(entries),
        })
    }

    fn flush(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let blob = serde_json::to_vec_pretty(entries)?;
        std::fs::write(&self.path, blob).map_err(|err| {
            tracing::warn!("failed to write state file: {}", err);
            StorageError::Unavailable
        })
    }
}

impl StringStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Unavailable)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Unavailable)?;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Unavailable)?;
        entries.remove(key);
        self.flush(&entries)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = CliConfig::init_from_env().context("invalid configuration")?;

    let mut args = env::args().skip(1);
    let page_url = args
        .next()
        .context("usage: attribution-cli <page-url> [referrer]")?;
    let referrer = args.next().unwrap_or_default();

    let rewrite_mode = match cli.rewrite_mode.as_str() {
        "individual" => RewriteMode::Individual,
        "composite" => RewriteMode::Composite,
        other => anyhow::bail!("unknown rewrite mode {other:?}"),
    };

    let config = Config {
        rewrite_mode,
        cookie: CookieConfig {
            domain: cli.cookie_domain,
            ..Default::default()
        },
        ..Default::default()
    };

    let timesource = Arc::new(SystemTime {});
    let backends = Backends {
        durable: Arc::new(FileStore::open(PathBuf::from(cli.state_path))?),
        session: Arc::new(MemoryStore::new()),
        cookies: Arc::new(MemoryCookieJar::new(timesource.clone())),
    };

    let tracker = Tracker::new(backends, Arc::new(PrintSink {}), timesource, config);
    let view = tracker.process(&page_url, &referrer)?;

    println!("{}", view.rewritten_url);
    println!("{}", serde_json::to_string_pretty(&view.event)?);

    Ok(())
}
