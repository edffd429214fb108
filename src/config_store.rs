use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{SimulationConfig, TunableParam};
use crate::error::{EngineError, Result};

/// Why a version exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigOrigin {
    Defaults,
    Loaded,
    AutoTuned { changes: Vec<(TunableParam, f64)> },
    ManualReview { proposal_id: u64 },
    Rollback { restored_version: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedConfig {
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub origin: ConfigOrigin,
    pub params: SimulationConfig,
}

/// Append-only arena of config versions plus a lock-free pointer to the
/// active one.
///
/// Readers take an `Arc` snapshot with [`ConfigStore::current`] and keep it
/// for the whole computation. Writers validate first and then publish with a
/// single swap, so a failed or abandoned replace leaves the active version
/// untouched.
pub struct ConfigStore {
    current: ArcSwap<VersionedConfig>,
    history: Mutex<Vec<Arc<VersionedConfig>>>,
}

impl ConfigStore {
    pub fn new(params: SimulationConfig) -> Result<Self> {
        params.validate()?;
        let first = Arc::new(VersionedConfig {
            version: 1,
            created_at: Utc::now(),
            origin: ConfigOrigin::Defaults,
            params,
        });
        Ok(Self {
            current: ArcSwap::new(first.clone()),
            history: Mutex::new(vec![first]),
        })
    }

    /// Rebuilds a store from a persisted history. Versions must be strictly
    /// increasing and `active` must name one of them.
    pub fn from_history(versions: Vec<VersionedConfig>, active: u64) -> Result<Self> {
        if versions.is_empty() {
            return Err(EngineError::Persistence("empty config history".to_string()));
        }
        let mut prev = 0;
        for v in &versions {
            if v.version <= prev {
                return Err(EngineError::Persistence(format!(
                    "config history out of order at version {}",
                    v.version
                )));
            }
            v.params.validate()?;
            prev = v.version;
        }
        let history: Vec<Arc<VersionedConfig>> = versions.into_iter().map(Arc::new).collect();
        let Some(active_cfg) = history.iter().find(|v| v.version == active).cloned() else {
            return Err(EngineError::UnknownVersion(active));
        };
        Ok(Self {
            current: ArcSwap::new(active_cfg),
            history: Mutex::new(history),
        })
    }

    pub fn current(&self) -> Arc<VersionedConfig> {
        self.current.load_full()
    }

    pub fn current_version(&self) -> u64 {
        self.current.load().version
    }

    /// Validates `params` and publishes them as a new version.
    pub fn replace(&self, params: SimulationConfig, origin: ConfigOrigin) -> Result<Arc<VersionedConfig>> {
        validate_swap(&params)?;
        let mut history = self.history.lock();
        Ok(self.publish(&mut history, params, origin))
    }

    /// Like [`ConfigStore::replace`], but only if `expected` is still the
    /// active version. The check and the swap happen under one lock, so a
    /// rollback or approval that lands first is never overwritten.
    pub fn replace_if_current(
        &self,
        expected: u64,
        params: SimulationConfig,
        origin: ConfigOrigin,
    ) -> Result<Arc<VersionedConfig>> {
        validate_swap(&params)?;
        let mut history = self.history.lock();
        let found = self.current.load().version;
        if found != expected {
            warn!(expected, found, "config moved underneath a conditional swap");
            return Err(EngineError::VersionConflict { expected, found });
        }
        Ok(self.publish(&mut history, params, origin))
    }

    fn publish(
        &self,
        history: &mut Vec<Arc<VersionedConfig>>,
        params: SimulationConfig,
        origin: ConfigOrigin,
    ) -> Arc<VersionedConfig> {
        let next = Arc::new(VersionedConfig {
            version: history.last().map(|v| v.version + 1).unwrap_or(1),
            created_at: Utc::now(),
            origin,
            params,
        });
        history.push(next.clone());
        self.current.store(next.clone());
        info!(version = next.version, origin = ?next.origin, "config swapped");
        next
    }

    /// Reinstates the parameters of `version` under a fresh version id.
    pub fn rollback(&self, version: u64) -> Result<Arc<VersionedConfig>> {
        let params = self.get(version)?.params.clone();
        self.replace(
            params,
            ConfigOrigin::Rollback {
                restored_version: version,
            },
        )
    }

    pub fn get(&self, version: u64) -> Result<Arc<VersionedConfig>> {
        self.history
            .lock()
            .iter()
            .find(|v| v.version == version)
            .cloned()
            .ok_or(EngineError::UnknownVersion(version))
    }

    pub fn history(&self) -> Vec<Arc<VersionedConfig>> {
        self.history.lock().clone()
    }
}

fn validate_swap(params: &SimulationConfig) -> Result<()> {
    params.validate().inspect_err(|err| warn!(error = %err, "rejected config swap"))
}
