use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::betting::{MarketPrice, Recommendation, recommend};
use crate::config::{BettingConfig, EngineConfig};
use crate::config_store::{ConfigStore, VersionedConfig};
use crate::error::{EngineError, Result};
use crate::fixture::{FixtureInput, Venue, canonicalize};
use crate::ledger::{PredictionLedger, PredictionRecord};
use crate::performance::FinalScore;
use crate::quality::{PitcherProfile, PitcherSlot};
use crate::simulation::{SimulationResult, derive_seed, simulate};
use crate::tuner::{
    AutoTuner, CancelToken, CycleReport, ReviewQueue, TuningProposal, TuningStatus, TuningWorker,
};

/// What a collaborator sees for one fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub key: String,
    pub result: SimulationResult,
    pub recommendation: Option<Recommendation>,
}

impl From<PredictionRecord> for Prediction {
    fn from(record: PredictionRecord) -> Self {
        Self {
            key: record.key,
            result: record.result,
            recommendation: record.recommendation,
        }
    }
}

/// Serving and feedback paths wired around one config store and ledger.
pub struct PredictionService {
    store: Arc<ConfigStore>,
    ledger: Arc<PredictionLedger>,
    tuner: Arc<AutoTuner>,
    betting: BettingConfig,
    markets: RwLock<HashMap<String, MarketPrice>>,
    worker: Mutex<Option<TuningWorker>>,
}

impl PredictionService {
    pub fn new(cfg: EngineConfig) -> Result<Self> {
        let store = ConfigStore::new(cfg.simulation.clone())?;
        Self::with_state(cfg, store, PredictionLedger::new())
    }

    /// Builds a service around a restored store and ledger. The simulation
    /// section of `cfg` is ignored in favour of the store's active version.
    pub fn with_state(cfg: EngineConfig, store: ConfigStore, ledger: PredictionLedger) -> Result<Self> {
        cfg.betting.validate()?;
        cfg.tuner.validate()?;
        let store = Arc::new(store);
        let ledger = Arc::new(ledger);
        let tuner = Arc::new(AutoTuner::new(
            cfg.tuner,
            cfg.performance,
            store.clone(),
            ledger.clone(),
        ));
        Ok(Self {
            store,
            ledger,
            tuner,
            betting: cfg.betting,
            markets: RwLock::new(HashMap::new()),
            worker: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<PredictionLedger> {
        &self.ledger
    }

    pub fn current_config(&self) -> Arc<VersionedConfig> {
        self.store.current()
    }

    /// Returns the locked prediction for `fixture`, simulating it the first
    /// time it is seen. A starter that the feed now names but the ledger
    /// still holds as unannounced goes through the announcement path, and an
    /// unlocked record is re-simulated before it is served.
    pub fn predict(&self, fixture: &FixtureInput, seed: Option<u64>) -> Result<Prediction> {
        let key = fixture.key();
        if let Some(existing) = self.ledger.get(&key) {
            let mut latest = existing;
            for venue in [Venue::Away, Venue::Home] {
                let PitcherSlot::Announced(profile) = &fixture.side(venue).pitcher else {
                    continue;
                };
                if latest.started || latest.fixture.side(venue).pitcher.is_announced() {
                    continue;
                }
                latest = self.announce_record(&key, venue, profile.clone(), seed)?;
            }
            if !latest.locked && !latest.started {
                latest = self
                    .ledger
                    .refresh(&key, |f| self.resimulate(&key, f, seed))?;
            }
            return Ok(latest.into());
        }

        let config = self.store.current();
        let result = simulate(fixture, &config, seed)?;
        let recommendation = self.recommendation_for(&key, &result);
        self.ledger.upsert(
            &key,
            PredictionRecord::new(fixture.clone(), result, recommendation),
        );
        self.ledger
            .get(&key)
            .map(Prediction::from)
            .ok_or(EngineError::UnknownFixture(key))
    }

    /// Predicts every fixture in parallel. Order of the output matches the
    /// input. An explicit seed is mixed with each fixture's key so no two
    /// fixtures share a trial stream.
    pub fn predict_slate(&self, fixtures: &[FixtureInput], seed: Option<u64>) -> Vec<Result<Prediction>> {
        let out: Vec<Result<Prediction>> = fixtures
            .par_iter()
            .map(|fixture| {
                let fixture_seed = seed.map(|s| derive_seed(s, &fixture.key()));
                self.predict(fixture, fixture_seed)
            })
            .collect();
        info!(
            fixtures = fixtures.len(),
            failed = out.iter().filter(|r| r.is_err()).count(),
            "slate predicted"
        );
        out
    }

    /// Caches the market and regrades the displayed result against it.
    pub fn update_market(&self, raw_key: &str, price: MarketPrice) -> Result<Option<Recommendation>> {
        let key = canonicalize(raw_key);
        self.markets.write().insert(key.clone(), price);
        let Some(record) = self.ledger.get(&key) else {
            debug!(key = %key, "market cached ahead of prediction");
            return Ok(None);
        };
        if record.started {
            return Ok(record.recommendation);
        }
        let recommendation = self.recommendation_for(&key, &record.result);
        self.ledger.set_recommendation(&key, recommendation.clone())?;
        Ok(recommendation)
    }

    pub fn record_outcome(&self, raw_key: &str, score: FinalScore) -> Result<()> {
        self.ledger.record_outcome(raw_key, score)
    }

    pub fn mark_started(&self, raw_key: &str) -> Result<()> {
        self.ledger.mark_started(raw_key)
    }

    pub fn announce_pitcher(
        &self,
        raw_key: &str,
        venue: Venue,
        profile: PitcherProfile,
        seed: Option<u64>,
    ) -> Result<Prediction> {
        self.announce_record(&canonicalize(raw_key), venue, profile, seed)
            .map(Prediction::from)
    }

    fn announce_record(
        &self,
        key: &str,
        venue: Venue,
        profile: PitcherProfile,
        seed: Option<u64>,
    ) -> Result<PredictionRecord> {
        self.ledger
            .announce_pitcher(key, venue, profile, |fixture| self.resimulate(key, fixture, seed))
    }

    /// Re-simulates a record whose displayed result no longer matches its
    /// starters. Locked records are returned as they are.
    pub fn refresh(&self, raw_key: &str, seed: Option<u64>) -> Result<Prediction> {
        let key = canonicalize(raw_key);
        self.ledger
            .refresh(&key, |fixture| self.resimulate(&key, fixture, seed))
            .map(Prediction::from)
    }

    fn resimulate(
        &self,
        key: &str,
        fixture: &FixtureInput,
        seed: Option<u64>,
    ) -> Result<(SimulationResult, Option<Recommendation>)> {
        let config = self.store.current();
        let result = simulate(fixture, &config, seed)?;
        let recommendation = self.recommendation_for(key, &result);
        Ok((result, recommendation))
    }

    fn recommendation_for(&self, key: &str, result: &SimulationResult) -> Option<Recommendation> {
        let markets = self.markets.read();
        let market = markets.get(key)?;
        recommend(result, market, &self.betting)
    }

    pub fn prediction(&self, raw_key: &str) -> Option<Prediction> {
        self.ledger.get(raw_key).map(Prediction::from)
    }

    pub fn tuning_status(&self) -> TuningStatus {
        self.tuner.status()
    }

    /// Runs a cycle on the calling thread under the same guard the worker uses.
    pub fn trigger_tuning(&self) -> CycleReport {
        self.tuner.run_cycle(&CancelToken::new())
    }

    /// Starts the periodic tuning thread; a running one is replaced.
    pub fn start_tuning(&self, interval: Duration) {
        let worker = TuningWorker::spawn(self.tuner.clone(), interval);
        if let Some(old) = self.worker.lock().replace(worker) {
            old.shutdown();
        }
    }

    pub fn stop_tuning(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.shutdown();
        }
    }

    pub fn pending_proposals(&self) -> Vec<TuningProposal> {
        self.tuner.pending()
    }

    pub fn approve_proposal(&self, id: u64) -> Result<Arc<VersionedConfig>> {
        self.tuner.approve(id)
    }

    pub fn dismiss_proposal(&self, id: u64) -> Result<TuningProposal> {
        self.tuner.dismiss(id)
    }

    pub fn review_queue(&self) -> ReviewQueue {
        self.tuner.review_queue()
    }

    pub fn restore_review_queue(&self, queue: ReviewQueue) {
        self.tuner.restore_review_queue(queue)
    }

    pub fn config_history(&self) -> Vec<Arc<VersionedConfig>> {
        self.store.history()
    }

    pub fn rollback(&self, version: u64) -> Result<Arc<VersionedConfig>> {
        self.store.rollback(version)
    }
}

impl Drop for PredictionService {
    fn drop(&mut self) {
        self.stop_tuning();
    }
}
