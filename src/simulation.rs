use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::{Distribution, Gamma};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::config_store::VersionedConfig;
use crate::error::{EngineError, Result};
use crate::fixture::FixtureInput;
use crate::quality::{QualityFactor, pitcher_factor, team_factor};

/// Runs per side at or above this land in the last score bucket.
pub const MAX_RUNS_BUCKET: u32 = 20;
const MAX_TOTAL_BUCKET: usize = (MAX_RUNS_BUCKET as usize) * 2;
const MIN_RATE: f64 = 0.10;
const TRIALS_PER_CHUNK: u32 = 256;
const CHUNK_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;
// Inverse-CDF search stops here; the tail mass beyond is negligible for run rates.
const MAX_POISSON_DRAW: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBucket {
    pub away: u32,
    pub home: u32,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub fixture_key: String,
    pub config_version: u64,
    pub seed: u64,
    pub trial_count: u32,
    pub away_win_probability: f64,
    pub home_win_probability: f64,
    /// Trials that ended level; not credited to either side.
    pub push_probability: f64,
    pub expected_away_runs: f64,
    pub expected_home_runs: f64,
    pub expected_total_runs: f64,
    pub total_runs_stddev: f64,
    /// Non-empty buckets sorted by (away, home).
    pub score_distribution: Vec<ScoreBucket>,
    /// Probability of each combined total, indexed by runs.
    pub total_distribution: Vec<f64>,
    pub away_pitcher_announced: bool,
    pub home_pitcher_announced: bool,
    pub low_confidence_inputs: u8,
    pub confidence: Confidence,
}

impl SimulationResult {
    pub fn prob_total_over(&self, line: f64) -> f64 {
        self.total_distribution
            .iter()
            .enumerate()
            .filter(|(runs, _)| *runs as f64 > line)
            .map(|(_, p)| *p)
            .sum()
    }

    pub fn prob_total_under(&self, line: f64) -> f64 {
        self.total_distribution
            .iter()
            .enumerate()
            .filter(|(runs, _)| (*runs as f64) < line)
            .map(|(_, p)| *p)
            .sum()
    }

    pub fn most_likely_score(&self) -> Option<ScoreBucket> {
        self.score_distribution
            .iter()
            .copied()
            .max_by(|a, b| a.probability.total_cmp(&b.probability))
    }
}

/// Per-side scoring rates after quality adjustments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpectedRates {
    pub away: f64,
    pub home: f64,
    pub low_confidence_inputs: u8,
    pub pitchers_low_confidence: u8,
}

pub fn expected_rates(fixture: &FixtureInput, cfg: &SimulationConfig) -> ExpectedRates {
    let away_team = team_factor(&fixture.away.profile, cfg);
    let home_team = team_factor(&fixture.home.profile, cfg);
    let away_pitcher = pitcher_factor(&fixture.away.pitcher, cfg);
    let home_pitcher = pitcher_factor(&fixture.home.pitcher, cfg);

    // A stronger opposing starter divides the rate down.
    let away = side_rate(cfg, away_team, home_pitcher, 0.0);
    let home = side_rate(cfg, home_team, away_pitcher, cfg.home_field_advantage);

    let flags = [away_team, home_team, away_pitcher, home_pitcher];
    ExpectedRates {
        away,
        home,
        low_confidence_inputs: flags.iter().filter(|f| f.low_confidence).count() as u8,
        pitchers_low_confidence: [away_pitcher, home_pitcher]
            .iter()
            .filter(|f| f.low_confidence)
            .count() as u8,
    }
}

fn side_rate(cfg: &SimulationConfig, team: QualityFactor, opp_pitcher: QualityFactor, bonus: f64) -> f64 {
    let team_mult = 1.0 + cfg.team_strength_multiplier * (team.value - 1.0);
    (cfg.base_lambda * team_mult / opp_pitcher.value + bonus).max(MIN_RATE)
}

/// Simulates `fixture` against one config snapshot.
///
/// With `Some(seed)` the result is reproducible bit for bit: trials are cut
/// into fixed chunks, each chunk owns an RNG derived from the seed and its
/// index, and the tallies are integer counts, so rayon's scheduling cannot
/// change the outcome. With `None` a fresh seed is drawn and recorded.
pub fn simulate(fixture: &FixtureInput, config: &VersionedConfig, seed: Option<u64>) -> Result<SimulationResult> {
    let cfg = &config.params;
    cfg.validate()?;
    let seed = seed.unwrap_or_else(|| rand::thread_rng().next_u64());
    let rates = expected_rates(fixture, cfg);
    let chaos = ChaosMultiplier::new(cfg.game_chaos_variance)?;

    let chunks = cfg.trial_count.div_ceil(TRIALS_PER_CHUNK);
    let tally = (0..chunks)
        .into_par_iter()
        .map(|chunk| {
            let start = chunk * TRIALS_PER_CHUNK;
            let trials = TRIALS_PER_CHUNK.min(cfg.trial_count - start);
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(CHUNK_SEED_STRIDE.wrapping_mul(chunk as u64 + 1)));
            run_chunk(&mut rng, trials, rates, &chaos)
        })
        .reduce(TrialTally::empty, TrialTally::merge);

    Ok(tally.into_result(fixture, config, seed, rates))
}

/// Mixes a base seed with a fixture key (FNV-1a, then a splitmix64
/// finaliser) so fixtures sharing a base seed get unrelated streams.
pub fn derive_seed(seed: u64, key: &str) -> u64 {
    let mut hash: u64 = 0xCBF2_9CE4_8422_2325;
    for byte in key.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    let mut z = seed ^ hash;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Mean-one Gamma multiplier with the configured variance.
struct ChaosMultiplier(Option<Gamma<f64>>);

impl ChaosMultiplier {
    fn new(variance: f64) -> Result<Self> {
        if variance <= 0.0 {
            return Ok(Self(None));
        }
        // shape k, scale 1/k: mean 1, variance 1/k
        Gamma::new(1.0 / variance, variance)
            .map(|g| Self(Some(g)))
            .map_err(|e| EngineError::InvalidConfig(format!("game_chaos_variance: {e}")))
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match &self.0 {
            Some(g) => g.sample(rng),
            None => 1.0,
        }
    }
}

fn run_chunk<R: Rng>(rng: &mut R, trials: u32, rates: ExpectedRates, chaos: &ChaosMultiplier) -> TrialTally {
    let mut tally = TrialTally::empty();
    for _ in 0..trials {
        let away_rate = rates.away * chaos.sample(rng);
        let home_rate = rates.home * chaos.sample(rng);
        let away = poisson_inverse_cdf(away_rate, rng.gen_range(0.0..1.0));
        let home = poisson_inverse_cdf(home_rate, rng.gen_range(0.0..1.0));
        tally.record(away, home);
    }
    tally
}

/// Smallest k with P(X <= k) >= u. One uniform per draw keeps the sample
/// monotone in `lambda` for a fixed random stream.
fn poisson_inverse_cdf(lambda: f64, u: f64) -> u32 {
    let mut p = (-lambda).exp();
    let mut cdf = p;
    let mut k = 0;
    while cdf < u && k < MAX_POISSON_DRAW {
        k += 1;
        p *= lambda / k as f64;
        cdf += p;
    }
    k
}

#[derive(Debug, Clone)]
struct TrialTally {
    trials: u64,
    away_wins: u64,
    home_wins: u64,
    pushes: u64,
    away_runs: u64,
    home_runs: u64,
    total_sq: u64,
    scores: Vec<u64>,
    totals: Vec<u64>,
}

impl TrialTally {
    fn empty() -> Self {
        let side = MAX_RUNS_BUCKET as usize + 1;
        Self {
            trials: 0,
            away_wins: 0,
            home_wins: 0,
            pushes: 0,
            away_runs: 0,
            home_runs: 0,
            total_sq: 0,
            scores: vec![0; side * side],
            totals: vec![0; MAX_TOTAL_BUCKET + 1],
        }
    }

    fn record(&mut self, away: u32, home: u32) {
        self.trials += 1;
        if away > home {
            self.away_wins += 1;
        } else if home > away {
            self.home_wins += 1;
        } else {
            self.pushes += 1;
        }
        let total = (away + home) as u64;
        self.away_runs += away as u64;
        self.home_runs += home as u64;
        self.total_sq += total * total;

        let side = MAX_RUNS_BUCKET as usize + 1;
        let a = away.min(MAX_RUNS_BUCKET) as usize;
        let h = home.min(MAX_RUNS_BUCKET) as usize;
        self.scores[a * side + h] += 1;
        self.totals[(total as usize).min(MAX_TOTAL_BUCKET)] += 1;
    }

    fn merge(mut self, other: Self) -> Self {
        self.trials += other.trials;
        self.away_wins += other.away_wins;
        self.home_wins += other.home_wins;
        self.pushes += other.pushes;
        self.away_runs += other.away_runs;
        self.home_runs += other.home_runs;
        self.total_sq += other.total_sq;
        for (a, b) in self.scores.iter_mut().zip(other.scores) {
            *a += b;
        }
        for (a, b) in self.totals.iter_mut().zip(other.totals) {
            *a += b;
        }
        self
    }

    fn into_result(self, fixture: &FixtureInput, config: &VersionedConfig, seed: u64, rates: ExpectedRates) -> SimulationResult {
        let cfg = &config.params;
        let n = self.trials.max(1) as f64;
        let away_win = self.away_wins as f64 / n;
        let home_win = self.home_wins as f64 / n;
        let expected_away = self.away_runs as f64 / n;
        let expected_home = self.home_runs as f64 / n;
        let expected_total = expected_away + expected_home;
        let variance = (self.total_sq as f64 / n - expected_total * expected_total).max(0.0);

        let side = MAX_RUNS_BUCKET as usize + 1;
        let score_distribution = self
            .scores
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > 0)
            .map(|(idx, c)| ScoreBucket {
                away: (idx / side) as u32,
                home: (idx % side) as u32,
                probability: *c as f64 / n,
            })
            .collect();
        let total_distribution = self.totals.iter().map(|c| *c as f64 / n).collect();

        let stderr = (home_win * (1.0 - home_win) / n).sqrt();
        let confidence = label_confidence(cfg, self.trials, rates, stderr);

        SimulationResult {
            fixture_key: fixture.key(),
            config_version: config.version,
            seed,
            trial_count: cfg.trial_count,
            away_win_probability: away_win,
            home_win_probability: home_win,
            push_probability: self.pushes as f64 / n,
            expected_away_runs: expected_away,
            expected_home_runs: expected_home,
            expected_total_runs: expected_total,
            total_runs_stddev: variance.sqrt(),
            score_distribution,
            total_distribution,
            away_pitcher_announced: fixture.away.pitcher.is_announced(),
            home_pitcher_announced: fixture.home.pitcher.is_announced(),
            low_confidence_inputs: rates.low_confidence_inputs,
            confidence,
        }
    }
}

fn label_confidence(cfg: &SimulationConfig, trials: u64, rates: ExpectedRates, stderr: f64) -> Confidence {
    let enough_trials = trials >= cfg.confidence_trial_floor as u64;
    if enough_trials && rates.low_confidence_inputs == 0 && stderr <= cfg.max_win_prob_stderr {
        Confidence::High
    } else if rates.pitchers_low_confidence >= 2 || (!enough_trials && rates.low_confidence_inputs > 0) {
        Confidence::Low
    } else {
        Confidence::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poisson_draw_is_monotone_in_lambda() {
        for u in [0.05, 0.3, 0.5, 0.8, 0.99] {
            let mut prev = 0;
            for step in 1..60 {
                let k = poisson_inverse_cdf(step as f64 * 0.2, u);
                assert!(k >= prev);
                prev = k;
            }
        }
    }

    #[test]
    fn poisson_draw_mean_is_close_to_lambda() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20_000;
        let sum: u64 = (0..n)
            .map(|_| poisson_inverse_cdf(4.5, rng.gen_range(0.0..1.0)) as u64)
            .sum();
        let mean = sum as f64 / n as f64;
        assert!((mean - 4.5).abs() < 0.1, "mean {mean}");
    }

    #[test]
    fn chaos_multiplier_has_unit_mean_and_configured_variance() {
        let chaos = ChaosMultiplier::new(0.04).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| chaos.sample(&mut rng)).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        assert!((mean - 1.0).abs() < 0.02, "mean {mean}");
        assert!((var - 0.04).abs() < 0.006, "variance {var}");
        assert_eq!(ChaosMultiplier::new(0.0).unwrap().sample(&mut rng), 1.0);
    }

    #[test]
    fn derived_seeds_are_stable_and_key_specific() {
        let a = derive_seed(7, "2025-09-02|cubs @ cardinals");
        assert_eq!(a, derive_seed(7, "2025-09-02|cubs @ cardinals"));
        assert_ne!(a, derive_seed(7, "2025-09-02|mets @ braves"));
        assert_ne!(a, derive_seed(8, "2025-09-02|cubs @ cardinals"));
    }

    #[test]
    fn tally_merge_is_order_free() {
        let mut a = TrialTally::empty();
        a.record(3, 2);
        a.record(1, 1);
        let mut b = TrialTally::empty();
        b.record(0, 7);
        let ab = a.clone().merge(b.clone());
        let ba = b.merge(a);
        assert_eq!(ab.scores, ba.scores);
        assert_eq!(ab.totals, ba.totals);
        assert_eq!((ab.away_wins, ab.home_wins, ab.pushes), (1, 1, 1));
    }
}
