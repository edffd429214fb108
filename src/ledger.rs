use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::betting::Recommendation;
use crate::error::{EngineError, Result};
use crate::fixture::{FixtureInput, SideInput, Venue, canonicalize};
use crate::performance::FinalScore;
use crate::quality::{PitcherProfile, PitcherSlot};
use crate::simulation::SimulationResult;

/// The single prediction kept for one fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub key: String,
    /// Every raw key spelling that resolved to `key`.
    pub aliases: BTreeSet<String>,
    pub fixture: FixtureInput,
    /// The displayed prediction.
    pub result: SimulationResult,
    /// Earlier or losing results, kept for audit.
    #[serde(default)]
    pub superseded: Vec<SimulationResult>,
    pub recommendation: Option<Recommendation>,
    pub outcome: Option<FinalScore>,
    pub started: bool,
    /// A locked record is served as-is. A merge clears the flag when the
    /// displayed result was simulated for other starters than the fixture
    /// now names; the next refresh re-simulates and locks it again.
    pub locked: bool,
    pub updated_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn new(fixture: FixtureInput, result: SimulationResult, recommendation: Option<Recommendation>) -> Self {
        Self {
            key: fixture.key(),
            aliases: BTreeSet::new(),
            fixture,
            result,
            superseded: Vec::new(),
            recommendation,
            outcome: None,
            started: false,
            locked: true,
            updated_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome.is_some()
    }

    /// True when the displayed result saw the same announced starters as
    /// the stored fixture.
    pub fn result_matches_fixture(&self) -> bool {
        starters_match(&self.fixture, &self.result)
    }
}

fn starters_match(fixture: &FixtureInput, result: &SimulationResult) -> bool {
    fixture.away.pitcher.is_announced() == result.away_pitcher_announced
        && fixture.home.pitcher.is_announced() == result.home_pitcher_announced
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Merged { conflict: bool },
    Unchanged,
}

/// Result of combining two records that share a canonical key.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub record: PredictionRecord,
    pub conflict: Option<EngineError>,
}

/// Combines two records for the same fixture. Every tie resolves to `left`
/// and `updated_at` takes the max, so merging the same right-hand record a
/// second time changes nothing.
pub fn merge(left: &PredictionRecord, right: &PredictionRecord) -> Merged {
    let right_newer = right.updated_at > left.updated_at;

    let mut fixture = if right_newer {
        FixtureInput {
            fixture_id: left.fixture.fixture_id.clone(),
            ..right.fixture.clone()
        }
    } else {
        left.fixture.clone()
    };
    fixture.away.pitcher = merge_pitcher(&left.fixture.away, &right.fixture.away, right_newer);
    fixture.home.pitcher = merge_pitcher(&left.fixture.home, &right.fixture.home, right_newer);

    let mut conflict = None;
    let outcome = match (left.outcome, right.outcome) {
        (Some(a), Some(b)) if a != b => {
            conflict = Some(EngineError::DuplicateFixtureConflict {
                key: left.key.clone(),
                detail: format!(
                    "outcome {}-{} vs {}-{}",
                    a.away, a.home, b.away, b.home
                ),
            });
            Some(if right_newer { b } else { a })
        }
        (a, b) => a.or(b),
    };

    let right_result_wins = result_rank(right, left) == std::cmp::Ordering::Greater;
    let (winner, loser) = if right_result_wins { (right, left) } else { (left, right) };

    let mut superseded: Vec<SimulationResult> = Vec::new();
    for r in left
        .superseded
        .iter()
        .chain(right.superseded.iter())
        .chain(std::iter::once(&loser.result))
    {
        if *r != winner.result && !superseded.contains(r) {
            superseded.push(r.clone());
        }
    }
    superseded.sort_by(|a, b| {
        a.config_version
            .cmp(&b.config_version)
            .then_with(|| a.seed.cmp(&b.seed))
    });

    let locked = winner.locked && starters_match(&fixture, &winner.result);
    if !locked && winner.locked {
        debug!(key = %left.key, "merged starters differ from displayed result; record unlocked");
    }

    Merged {
        record: PredictionRecord {
            key: left.key.clone(),
            aliases: left.aliases.union(&right.aliases).cloned().collect(),
            fixture,
            result: winner.result.clone(),
            superseded,
            recommendation: winner.recommendation.clone(),
            outcome,
            started: left.started || right.started,
            locked,
            updated_at: left.updated_at.max(right.updated_at),
        },
        conflict,
    }
}

fn merge_pitcher(left: &SideInput, right: &SideInput, right_newer: bool) -> PitcherSlot {
    match (&left.pitcher, &right.pitcher) {
        (PitcherSlot::Unannounced, PitcherSlot::Announced(_)) => right.pitcher.clone(),
        (PitcherSlot::Announced(a), PitcherSlot::Announced(b)) if a != b && right_newer => {
            right.pitcher.clone()
        }
        _ => left.pitcher.clone(),
    }
}

// Higher config version first, then more announced starters, then recency.
fn result_rank(a: &PredictionRecord, b: &PredictionRecord) -> std::cmp::Ordering {
    let announced = |r: &SimulationResult| {
        r.away_pitcher_announced as u8 + r.home_pitcher_announced as u8
    };
    a.result
        .config_version
        .cmp(&b.result.config_version)
        .then_with(|| announced(&a.result).cmp(&announced(&b.result)))
        .then_with(|| a.updated_at.cmp(&b.updated_at))
}

/// Keyed store of prediction records. Records are never deleted.
#[derive(Default)]
pub struct PredictionLedger {
    records: RwLock<HashMap<String, PredictionRecord>>,
}

impl PredictionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a ledger from snapshot records, merging any that collide.
    pub fn restore(records: Vec<PredictionRecord>) -> Self {
        let ledger = Self::new();
        for record in records {
            let raw = record.key.clone();
            ledger.upsert(&raw, record);
        }
        ledger
    }

    /// Inserts `record` under the canonical form of `raw_key`, merging with
    /// whatever is already stored there.
    pub fn upsert(&self, raw_key: &str, mut record: PredictionRecord) -> UpsertOutcome {
        let key = canonicalize(raw_key);
        record.key = key.clone();
        record.aliases.insert(raw_key.to_string());

        let mut records = self.records.write();
        let Some(existing) = records.get_mut(&key) else {
            debug!(key = %key, "new prediction record");
            records.insert(key, record);
            return UpsertOutcome::Inserted;
        };

        let merged = merge(existing, &record);
        if let Some(conflict) = &merged.conflict {
            warn!(key = %key, error = %conflict, "merged conflicting fixture records");
        }
        if merged.record == *existing {
            return UpsertOutcome::Unchanged;
        }
        *existing = merged.record;
        UpsertOutcome::Merged {
            conflict: merged.conflict.is_some(),
        }
    }

    pub fn get(&self, raw_key: &str) -> Option<PredictionRecord> {
        self.records.read().get(&canonicalize(raw_key)).cloned()
    }

    pub fn contains(&self, raw_key: &str) -> bool {
        self.records.read().contains_key(&canonicalize(raw_key))
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Stores the final score. A different score already on file is logged
    /// as a conflict and replaced.
    pub fn record_outcome(&self, raw_key: &str, score: FinalScore) -> Result<()> {
        let key = canonicalize(raw_key);
        let mut records = self.records.write();
        let record = records
            .get_mut(&key)
            .ok_or_else(|| EngineError::UnknownFixture(key.clone()))?;
        if let Some(prev) = record.outcome.filter(|prev| *prev != score) {
            let conflict = EngineError::DuplicateFixtureConflict {
                key: key.clone(),
                detail: format!(
                    "outcome {}-{} replaced by {}-{}",
                    prev.away, prev.home, score.away, score.home
                ),
            };
            warn!(key = %key, error = %conflict, "outcome overwritten");
        }
        record.outcome = Some(score);
        record.started = true;
        record.updated_at = Utc::now();
        Ok(())
    }

    /// Replaces the recommendation attached to the displayed result. Started
    /// fixtures keep what they had.
    pub fn set_recommendation(&self, raw_key: &str, recommendation: Option<Recommendation>) -> Result<()> {
        let key = canonicalize(raw_key);
        let mut records = self.records.write();
        let record = records
            .get_mut(&key)
            .ok_or_else(|| EngineError::UnknownFixture(key.clone()))?;
        if record.started {
            return Err(EngineError::FixtureStarted(key));
        }
        if record.recommendation != recommendation {
            record.recommendation = recommendation;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    pub fn mark_started(&self, raw_key: &str) -> Result<()> {
        let key = canonicalize(raw_key);
        let mut records = self.records.write();
        let record = records
            .get_mut(&key)
            .ok_or_else(|| EngineError::UnknownFixture(key.clone()))?;
        if !record.started {
            record.started = true;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Moves `venue`'s starter from unannounced to announced and re-runs the
    /// prediction through `resimulate`. The previous result stays in
    /// `superseded`. An already announced slot or a placeholder name leaves
    /// a locked record as it was; an unlocked one is re-simulated anyway.
    pub fn announce_pitcher<F>(
        &self,
        raw_key: &str,
        venue: Venue,
        profile: PitcherProfile,
        resimulate: F,
    ) -> Result<PredictionRecord>
    where
        F: FnOnce(&FixtureInput) -> Result<(SimulationResult, Option<Recommendation>)>,
    {
        let key = canonicalize(raw_key);
        self.resimulate_with(&key, |fixture| fixture.side_mut(venue).pitcher.announce(profile), resimulate)
    }

    /// Re-simulates an unlocked record against its stored fixture. Locked
    /// records come back unchanged and `resimulate` is not called.
    pub fn refresh<F>(&self, raw_key: &str, resimulate: F) -> Result<PredictionRecord>
    where
        F: FnOnce(&FixtureInput) -> Result<(SimulationResult, Option<Recommendation>)>,
    {
        let key = canonicalize(raw_key);
        self.resimulate_with(&key, |_| false, resimulate)
    }

    fn resimulate_with<E, F>(&self, key: &str, edit: E, resimulate: F) -> Result<PredictionRecord>
    where
        E: FnOnce(&mut FixtureInput) -> bool,
        F: FnOnce(&FixtureInput) -> Result<(SimulationResult, Option<Recommendation>)>,
    {
        let (base, locked) = {
            let records = self.records.read();
            let record = records
                .get(key)
                .ok_or_else(|| EngineError::UnknownFixture(key.to_string()))?;
            if record.started {
                return Err(EngineError::FixtureStarted(key.to_string()));
            }
            (record.fixture.clone(), record.locked)
        };
        let mut fixture = base.clone();
        if !edit(&mut fixture) && locked {
            debug!(key = %key, "record already current");
            return self.get(key).ok_or_else(|| EngineError::UnknownFixture(key.to_string()));
        }

        // Simulate outside the lock; re-check the record before writing.
        let (result, recommendation) = resimulate(&fixture)?;

        let mut records = self.records.write();
        let record = records
            .get_mut(key)
            .ok_or_else(|| EngineError::UnknownFixture(key.to_string()))?;
        if record.started {
            return Err(EngineError::FixtureStarted(key.to_string()));
        }
        if record.fixture != base || record.locked != locked {
            debug!(key = %key, "record changed while re-simulating; keeping stored record");
            return Ok(record.clone());
        }
        let previous = std::mem::replace(&mut record.result, result);
        if !record.superseded.contains(&previous) {
            record.superseded.push(previous);
        }
        record.fixture = fixture;
        record.recommendation = recommendation;
        record.locked = true;
        record.updated_at = Utc::now();
        info!(
            key = %key,
            away = record.fixture.away.pitcher.name().unwrap_or_default(),
            home = record.fixture.home.pitcher.name().unwrap_or_default(),
            "prediction re-simulated"
        );
        Ok(record.clone())
    }

    /// Records with a realized outcome, ordered by fixture date then key.
    pub fn completed(&self) -> Vec<PredictionRecord> {
        let mut out: Vec<PredictionRecord> = self
            .records
            .read()
            .values()
            .filter(|r| r.is_completed())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.fixture.date.cmp(&b.fixture.date).then_with(|| a.key.cmp(&b.key)));
        out
    }

    pub fn completed_count(&self) -> usize {
        self.records.read().values().filter(|r| r.is_completed()).count()
    }

    /// All records sorted by key.
    pub fn snapshot(&self) -> Vec<PredictionRecord> {
        let mut out: Vec<PredictionRecord> = self.records.read().values().cloned().collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}
