use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config_store::{ConfigStore, VersionedConfig};
use crate::ledger::{PredictionLedger, PredictionRecord};
use crate::tuner::ReviewQueue;

const CACHE_DIR: &str = "mlb_edge";
const LEDGER_FILE: &str = "ledger.json";
const CONFIG_FILE: &str = "config_history.json";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    records: Vec<PredictionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigHistoryFile {
    version: u32,
    active: u64,
    versions: Vec<VersionedConfig>,
    #[serde(default)]
    review: ReviewQueue,
}

/// `$XDG_CACHE_HOME/mlb_edge`, falling back to `~/.cache/mlb_edge`.
pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(CACHE_DIR));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

pub fn default_ledger_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join(LEDGER_FILE))
}

pub fn default_config_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join(CONFIG_FILE))
}

pub fn save_ledger(ledger: &PredictionLedger, path: &Path) -> Result<()> {
    let file = LedgerFile {
        version: SNAPSHOT_VERSION,
        records: ledger.snapshot(),
    };
    let json = serde_json::to_string_pretty(&file).context("serialize ledger")?;
    write_atomic(path, &json)?;
    info!(path = %path.display(), records = file.records.len(), "ledger saved");
    Ok(())
}

pub fn load_ledger(path: &Path) -> Result<PredictionLedger> {
    let raw = fs::read_to_string(path).with_context(|| format!("read ledger {}", path.display()))?;
    let file: LedgerFile =
        serde_json::from_str(&raw).with_context(|| format!("parse ledger {}", path.display()))?;
    if file.version != SNAPSHOT_VERSION {
        bail!("ledger snapshot version {} is not supported", file.version);
    }
    Ok(PredictionLedger::restore(file.records))
}

/// Saves every config version plus the proposals still awaiting review.
pub fn save_config_history(store: &ConfigStore, review: &ReviewQueue, path: &Path) -> Result<()> {
    let file = ConfigHistoryFile {
        version: SNAPSHOT_VERSION,
        active: store.current_version(),
        versions: store.history().iter().map(|v| (**v).clone()).collect(),
        review: review.clone(),
    };
    let json = serde_json::to_string_pretty(&file).context("serialize config history")?;
    write_atomic(path, &json)?;
    info!(
        path = %path.display(),
        active = file.active,
        pending = file.review.proposals.len(),
        "config history saved"
    );
    Ok(())
}

pub fn load_config_history(path: &Path) -> Result<(ConfigStore, ReviewQueue)> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read config history {}", path.display()))?;
    let file: ConfigHistoryFile = serde_json::from_str(&raw)
        .with_context(|| format!("parse config history {}", path.display()))?;
    if file.version != SNAPSHOT_VERSION {
        bail!("config history version {} is not supported", file.version);
    }
    let store = ConfigStore::from_history(file.versions, file.active)
        .with_context(|| format!("restore config history {}", path.display()))?;
    Ok((store, file.review))
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("swap {}", path.display()))?;
    Ok(())
}
