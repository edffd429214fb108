use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{PerformanceConfig, SimulationConfig, TunableParam, TunerConfig};
use crate::config_store::{ConfigOrigin, ConfigStore, VersionedConfig};
use crate::error::{EngineError, Result};
use crate::ledger::PredictionLedger;
use crate::performance::{PerformanceMetric, SliceMetric, evaluate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TunerState {
    Idle,
    Analyzing,
    Proposing,
    AutoApplied,
    QueuedForReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProposalConfidence {
    Low,
    Medium,
    High,
}

/// The band a proposal was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMetric {
    WinnerAccuracy,
    TotalAccuracy,
    MeanAbsError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningProposal {
    /// Assigned by the tuner; zero until then.
    pub id: u64,
    pub param: TunableParam,
    pub current: f64,
    pub delta: f64,
    pub proposed: f64,
    pub confidence: ProposalConfidence,
    pub trigger: TriggerMetric,
    pub evidence: PerformanceMetric,
    pub created_at: DateTime<Utc>,
}

/// Proposals awaiting a manual decision, with the id the next one gets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewQueue {
    pub next_id: u64,
    pub proposals: Vec<TuningProposal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Another cycle held the guard.
    Skipped,
    Cancelled,
    InsufficientEvidence { have: usize, need: usize },
    /// Every metric sat inside its band.
    NoChange,
    Completed {
        applied_version: Option<u64>,
        auto_applied: Vec<TuningProposal>,
        queued: Vec<u64>,
    },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// States visited, in order.
    pub states: Vec<TunerState>,
    pub metric: Option<PerformanceMetric>,
    pub outcome: CycleOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningStatus {
    pub state: TunerState,
    pub config_version: u64,
    pub last_metric: Option<PerformanceMetric>,
    pub pending_proposals: usize,
    pub last_outcome: Option<CycleOutcome>,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Turns out-of-band metrics into parameter deltas, one step each.
///
/// Segments decide confidence: a miss in every segment of the window is a
/// persistent miss (HIGH) unless the step would leave the parameter's range
/// (LOW). A miss in the aggregate only is MEDIUM.
pub fn propose(metric: &PerformanceMetric, params: &SimulationConfig, cfg: &TunerConfig) -> Vec<TuningProposal> {
    let overall = &metric.overall;
    let mut deltas: BTreeMap<TunableParam, (f64, TriggerMetric, bool)> = BTreeMap::new();
    let mut raise = |param: TunableParam, sign: f64, trigger: TriggerMetric, persistent: bool| {
        deltas
            .entry(param)
            .or_insert((sign * cfg.bounds(param).step, trigger, persistent));
    };

    if overall.winner_accuracy < cfg.winner_accuracy_floor {
        let persistent = all_segments(metric, |s| s.winner_accuracy < cfg.winner_accuracy_floor);
        raise(TunableParam::TeamStrengthMultiplier, 1.0, TriggerMetric::WinnerAccuracy, persistent);
        raise(TunableParam::HomeFieldAdvantage, 1.0, TriggerMetric::WinnerAccuracy, persistent);
    }
    if overall.total_accuracy < cfg.total_accuracy_floor {
        let persistent = all_segments(metric, |s| s.total_accuracy < cfg.total_accuracy_floor);
        raise(TunableParam::PitcherEraWeight, 1.0, TriggerMetric::TotalAccuracy, persistent);
        raise(TunableParam::GameChaosVariance, -1.0, TriggerMetric::TotalAccuracy, persistent);
    }
    if overall.mean_abs_error > cfg.max_mean_abs_error {
        let persistent = all_segments(metric, |s| s.mean_abs_error > cfg.max_mean_abs_error);
        let sign = if overall.mean_bias > 0.0 { -1.0 } else { 1.0 };
        raise(TunableParam::BaseLambda, sign, TriggerMetric::MeanAbsError, persistent);
    }

    let now = Utc::now();
    deltas
        .into_iter()
        .map(|(param, (delta, trigger, persistent))| {
            let current = param.get(params);
            let proposed = current + delta;
            let confidence = if !cfg.bounds(param).contains(proposed) {
                ProposalConfidence::Low
            } else if persistent {
                ProposalConfidence::High
            } else {
                ProposalConfidence::Medium
            };
            TuningProposal {
                id: 0,
                param,
                current,
                delta,
                proposed,
                confidence,
                trigger,
                evidence: metric.clone(),
                created_at: now,
            }
        })
        .collect()
}

fn all_segments(metric: &PerformanceMetric, out_of_band: impl Fn(&SliceMetric) -> bool) -> bool {
    !metric.segments.is_empty() && metric.segments.iter().all(|s| s.sample_size > 0 && out_of_band(s))
}

/// Folds proposals into a copy of `params`, stepping from the values in
/// `params` rather than the ones the proposals were computed against.
pub fn apply_proposals(params: &SimulationConfig, proposals: &[TuningProposal]) -> SimulationConfig {
    let mut next = params.clone();
    for p in proposals {
        let value = p.param.get(&next) + p.delta;
        p.param.set(&mut next, value);
    }
    next
}

/// Feedback loop from the ledger's realized outcomes to the config store.
pub struct AutoTuner {
    cfg: TunerConfig,
    performance: PerformanceConfig,
    store: Arc<ConfigStore>,
    ledger: Arc<PredictionLedger>,
    running: AtomicBool,
    next_id: AtomicU64,
    state: Mutex<TunerState>,
    pending: Mutex<Vec<TuningProposal>>,
    last_report: Mutex<Option<CycleReport>>,
}

struct RunGuard<'a>(&'a AutoTuner);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.0.state.lock() = TunerState::Idle;
        self.0.running.store(false, Ordering::Release);
    }
}

impl AutoTuner {
    pub fn new(
        cfg: TunerConfig,
        performance: PerformanceConfig,
        store: Arc<ConfigStore>,
        ledger: Arc<PredictionLedger>,
    ) -> Self {
        Self {
            cfg,
            performance,
            store,
            ledger,
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            state: Mutex::new(TunerState::Idle),
            pending: Mutex::new(Vec::new()),
            last_report: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one cycle. Returns `Skipped` at once if a cycle is already in
    /// flight; the trigger is not queued.
    pub fn run_cycle(&self, cancel: &CancelToken) -> CycleReport {
        let started_at = Utc::now();
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("tuning cycle already running; trigger skipped");
            return CycleReport {
                started_at,
                finished_at: Utc::now(),
                states: Vec::new(),
                metric: None,
                outcome: CycleOutcome::Skipped,
            };
        }
        let guard = RunGuard(self);

        let mut states = vec![TunerState::Idle];
        let (outcome, metric) = self.cycle(cancel, &mut states);
        drop(guard);
        states.push(TunerState::Idle);

        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            states,
            metric,
            outcome,
        };
        info!(outcome = ?report.outcome, "tuning cycle finished");
        *self.last_report.lock() = Some(report.clone());
        report
    }

    fn enter(&self, state: TunerState, states: &mut Vec<TunerState>) {
        debug!(?state, "tuner transition");
        *self.state.lock() = state;
        states.push(state);
    }

    fn cycle(&self, cancel: &CancelToken, states: &mut Vec<TunerState>) -> (CycleOutcome, Option<PerformanceMetric>) {
        self.enter(TunerState::Analyzing, states);
        let records = self.ledger.completed();
        let metric = evaluate(&records, self.cfg.window, &self.performance, self.cfg.observation_segments);
        let have = metric.sample_size();
        if have < self.cfg.min_sample_size {
            let err = EngineError::InsufficientEvidence {
                have,
                need: self.cfg.min_sample_size,
            };
            info!(%err, "skipping tuning cycle");
            return (
                CycleOutcome::InsufficientEvidence {
                    have,
                    need: self.cfg.min_sample_size,
                },
                Some(metric),
            );
        }
        let outcome = self.act_on(&metric, cancel, states);
        (outcome, Some(metric))
    }

    fn act_on(&self, metric: &PerformanceMetric, cancel: &CancelToken, states: &mut Vec<TunerState>) -> CycleOutcome {
        if cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        self.enter(TunerState::Proposing, states);
        let snapshot = self.store.current();
        let mut proposals = propose(metric, &snapshot.params, &self.cfg);
        if proposals.is_empty() {
            debug!(version = snapshot.version, "all metrics inside their bands");
            return CycleOutcome::NoChange;
        }
        for p in &mut proposals {
            p.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        }
        let (high, review): (Vec<_>, Vec<_>) = proposals
            .into_iter()
            .partition(|p| p.confidence == ProposalConfidence::High);

        if cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        let mut applied_version = None;
        let mut auto_applied = Vec::new();
        if !high.is_empty() {
            match self.commit(&snapshot, &high) {
                Ok(v) => {
                    self.enter(TunerState::AutoApplied, states);
                    info!(version = v.version, count = high.len(), "auto-applied tuning proposals");
                    applied_version = Some(v.version);
                    auto_applied = high;
                }
                Err(err) => {
                    warn!(%err, "auto-tuned config not committed");
                    return CycleOutcome::Failed {
                        reason: err.to_string(),
                    };
                }
            }
        }

        let queued: Vec<u64> = review.iter().map(|p| p.id).collect();
        if !review.is_empty() {
            self.enter(TunerState::QueuedForReview, states);
            let mut pending = self.pending.lock();
            for p in review {
                if let Some(old) = pending.iter().position(|q| q.param == p.param) {
                    debug!(param = p.param.name(), replaced = pending[old].id, "newer proposal replaces pending one");
                    pending.remove(old);
                }
                info!(
                    id = p.id,
                    param = p.param.name(),
                    delta = p.delta,
                    confidence = ?p.confidence,
                    "proposal queued for review"
                );
                pending.push(p);
            }
        }

        CycleOutcome::Completed {
            applied_version,
            auto_applied,
            queued,
        }
    }

    /// Folds `high` into `base` and swaps it in only while `base` is still
    /// the active version.
    fn commit(&self, base: &VersionedConfig, high: &[TuningProposal]) -> Result<Arc<VersionedConfig>> {
        let next = apply_proposals(&base.params, high);
        let changes = high.iter().map(|p| (p.param, p.delta)).collect();
        self.store
            .replace_if_current(base.version, next, ConfigOrigin::AutoTuned { changes })
    }

    pub fn pending(&self) -> Vec<TuningProposal> {
        self.pending.lock().clone()
    }

    /// Applies a queued proposal on top of the current config.
    pub fn approve(&self, id: u64) -> Result<Arc<VersionedConfig>> {
        let mut pending = self.pending.lock();
        let idx = pending
            .iter()
            .position(|p| p.id == id)
            .ok_or(EngineError::UnknownProposal(id))?;
        let current = self.store.current();
        let next = apply_proposals(&current.params, std::slice::from_ref(&pending[idx]));
        let version = self.store.replace_if_current(
            current.version,
            next,
            ConfigOrigin::ManualReview { proposal_id: id },
        )?;
        let approved = pending.remove(idx);
        info!(id, param = approved.param.name(), version = version.version, "proposal approved");
        Ok(version)
    }

    pub fn dismiss(&self, id: u64) -> Result<TuningProposal> {
        let mut pending = self.pending.lock();
        let idx = pending
            .iter()
            .position(|p| p.id == id)
            .ok_or(EngineError::UnknownProposal(id))?;
        let dismissed = pending.remove(idx);
        info!(id, param = dismissed.param.name(), "proposal dismissed");
        Ok(dismissed)
    }

    /// The pending queue and id counter, for saving between runs.
    pub fn review_queue(&self) -> ReviewQueue {
        ReviewQueue {
            next_id: self.next_id.load(Ordering::Relaxed),
            proposals: self.pending.lock().clone(),
        }
    }

    /// Replaces the pending queue with a saved one. Ids keep counting from
    /// past every restored proposal.
    pub fn restore_review_queue(&self, queue: ReviewQueue) {
        let floor = queue.proposals.iter().map(|p| p.id + 1).max().unwrap_or(1);
        self.next_id
            .store(queue.next_id.max(floor), Ordering::Relaxed);
        debug!(pending = queue.proposals.len(), "review queue restored");
        *self.pending.lock() = queue.proposals;
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.lock().clone()
    }

    pub fn status(&self) -> TuningStatus {
        let last = self.last_report.lock();
        TuningStatus {
            state: *self.state.lock(),
            config_version: self.store.current_version(),
            last_metric: last.as_ref().and_then(|r| r.metric.clone()),
            pending_proposals: self.pending.lock().len(),
            last_outcome: last.as_ref().map(|r| r.outcome.clone()),
        }
    }
}

pub enum TuningCommand {
    Trigger,
    Shutdown,
}

/// Background thread that runs a cycle every `interval` and on demand.
pub struct TuningWorker {
    tx: Sender<TuningCommand>,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl TuningWorker {
    pub fn spawn(tuner: Arc<AutoTuner>, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = thread::spawn(move || {
            let mut next_tick = Instant::now() + interval;
            loop {
                let wait = next_tick.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(TuningCommand::Trigger) => {
                        tuner.run_cycle(&token);
                    }
                    Ok(TuningCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        tuner.run_cycle(&token);
                        next_tick = Instant::now() + interval;
                    }
                }
                if token.is_cancelled() {
                    break;
                }
            }
            debug!("tuning worker stopped");
        });
        Self {
            tx,
            cancel,
            handle: Some(handle),
        }
    }

    /// Asks for an immediate cycle. False once the worker has stopped.
    pub fn trigger(&self) -> bool {
        self.tx.send(TuningCommand::Trigger).is_ok()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        let _ = self.tx.send(TuningCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("tuning worker panicked");
            }
        }
    }
}

impl Drop for TuningWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
