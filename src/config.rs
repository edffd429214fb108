use std::env;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Ascending cut points for a "lower is better" statistic such as ERA or WHIP.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierCuts {
    pub ace: f64,
    pub good: f64,
    pub average: f64,
}

/// Sub-factor assigned to each tier. Values between cut points take the
/// enclosing tier's factor; there is no interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierFactors {
    pub ace: f64,
    pub good: f64,
    pub average: f64,
    pub poor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityTiers {
    pub era: TierCuts,
    pub whip: TierCuts,
    pub era_factors: TierFactors,
    pub whip_factors: TierFactors,
}

impl Default for QualityTiers {
    fn default() -> Self {
        Self {
            era: TierCuts {
                ace: 3.00,
                good: 3.75,
                average: 4.50,
            },
            whip: TierCuts {
                ace: 1.10,
                good: 1.25,
                average: 1.40,
            },
            era_factors: TierFactors {
                ace: 1.20,
                good: 1.10,
                average: 1.00,
                poor: 0.88,
            },
            whip_factors: TierFactors {
                ace: 1.15,
                good: 1.07,
                average: 1.00,
                poor: 0.90,
            },
        }
    }
}

/// The parameter vector the simulator runs on. The store wraps it in a
/// `VersionedConfig`; it is never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Expected runs per side before any adjustment.
    pub base_lambda: f64,
    pub home_field_advantage: f64,
    pub team_strength_multiplier: f64,
    pub pitcher_era_weight: f64,
    pub pitcher_whip_weight: f64,
    /// Variance of the mean-one per-trial rate multiplier.
    pub game_chaos_variance: f64,
    pub trial_count: u32,

    pub min_quality_factor: f64,
    pub max_quality_factor: f64,
    pub tiers: QualityTiers,
    /// League scoring baseline the team factor is measured against.
    pub league_runs_per_game: f64,

    pub min_pitcher_starts: u32,
    pub min_pitcher_innings: f64,
    pub min_team_games: u32,

    pub confidence_trial_floor: u32,
    pub max_win_prob_stderr: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            base_lambda: 4.40,
            home_field_advantage: 0.15,
            team_strength_multiplier: 0.50,
            pitcher_era_weight: 0.60,
            pitcher_whip_weight: 0.40,
            game_chaos_variance: 0.02,
            trial_count: 2_000,
            min_quality_factor: 0.75,
            max_quality_factor: 1.30,
            tiers: QualityTiers::default(),
            league_runs_per_game: 4.50,
            min_pitcher_starts: 3,
            min_pitcher_innings: 15.0,
            min_team_games: 10,
            confidence_trial_floor: 1_000,
            max_win_prob_stderr: 0.02,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.base_lambda > 0.0) {
            return Err(EngineError::invalid_config("base_lambda must be positive"));
        }
        if self.trial_count == 0 {
            return Err(EngineError::invalid_config("trial_count must be at least 1"));
        }
        if !(self.home_field_advantage >= 0.0) {
            return Err(EngineError::invalid_config(
                "home_field_advantage must not be negative",
            ));
        }
        if !(self.team_strength_multiplier > 0.0) {
            return Err(EngineError::invalid_config(
                "team_strength_multiplier must be positive",
            ));
        }
        if !(self.pitcher_era_weight > 0.0) || !(self.pitcher_whip_weight > 0.0) {
            return Err(EngineError::invalid_config("pitcher weights must be positive"));
        }
        let sum = self.pitcher_era_weight + self.pitcher_whip_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::InvalidConfig(format!(
                "pitcher_era_weight + pitcher_whip_weight must equal 1 (got {sum})"
            )));
        }
        if !(self.game_chaos_variance >= 0.0) {
            return Err(EngineError::invalid_config(
                "game_chaos_variance must not be negative",
            ));
        }
        if !(self.min_quality_factor > 0.0)
            || !(self.min_quality_factor <= 1.0)
            || !(self.max_quality_factor >= 1.0)
        {
            return Err(EngineError::invalid_config(
                "quality bounds must satisfy 0 < min <= 1 <= max",
            ));
        }
        validate_cuts("era", &self.tiers.era)?;
        validate_cuts("whip", &self.tiers.whip)?;
        validate_factors("era", &self.tiers.era_factors)?;
        validate_factors("whip", &self.tiers.whip_factors)?;
        if !(self.league_runs_per_game > 0.0) {
            return Err(EngineError::invalid_config(
                "league_runs_per_game must be positive",
            ));
        }
        if !(self.min_pitcher_innings >= 0.0) {
            return Err(EngineError::invalid_config(
                "min_pitcher_innings must not be negative",
            ));
        }
        if self.confidence_trial_floor == 0 {
            return Err(EngineError::invalid_config(
                "confidence_trial_floor must be at least 1",
            ));
        }
        if !(self.max_win_prob_stderr > 0.0) {
            return Err(EngineError::invalid_config(
                "max_win_prob_stderr must be positive",
            ));
        }
        Ok(())
    }
}

fn validate_cuts(label: &str, cuts: &TierCuts) -> Result<()> {
    if !(cuts.ace > 0.0 && cuts.ace < cuts.good && cuts.good < cuts.average) {
        return Err(EngineError::InvalidConfig(format!(
            "{label} tier cuts must be positive and strictly ascending"
        )));
    }
    Ok(())
}

fn validate_factors(label: &str, f: &TierFactors) -> Result<()> {
    if [f.ace, f.good, f.average, f.poor].iter().any(|v| !(*v > 0.0)) {
        return Err(EngineError::InvalidConfig(format!(
            "{label} tier factors must be positive"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BettingConfig {
    pub min_edge: f64,
    pub medium_confidence_ev: f64,
    pub high_confidence_ev: f64,
    /// Damping applied to the full-Kelly fraction, in (0, 1].
    pub kelly_fraction: f64,
    pub max_stake_fraction: f64,
    /// Subtracted from the model probability of a side without an announced starter.
    pub unannounced_penalty: f64,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            min_edge: 0.03,
            medium_confidence_ev: 0.05,
            high_confidence_ev: 0.08,
            kelly_fraction: 0.25,
            max_stake_fraction: 0.05,
            unannounced_penalty: 0.10,
        }
    }
}

impl BettingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_edge >= 0.0) {
            return Err(EngineError::invalid_config("min_edge must not be negative"));
        }
        if !(self.high_confidence_ev > self.medium_confidence_ev
            && self.medium_confidence_ev > self.min_edge)
        {
            return Err(EngineError::invalid_config(
                "thresholds must be strictly ordered: high > medium > min_edge",
            ));
        }
        if !(self.kelly_fraction > 0.0 && self.kelly_fraction <= 1.0) {
            return Err(EngineError::invalid_config("kelly_fraction must be in (0, 1]"));
        }
        if !(self.max_stake_fraction > 0.0 && self.max_stake_fraction <= 1.0) {
            return Err(EngineError::invalid_config(
                "max_stake_fraction must be in (0, 1]",
            ));
        }
        if !(self.unannounced_penalty >= 0.0 && self.unannounced_penalty < 1.0) {
            return Err(EngineError::invalid_config(
                "unannounced_penalty must be in [0, 1)",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Over/under line used to grade total predictions.
    pub total_line: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { total_line: 9.5 }
    }
}

/// Valid range and per-cycle step for one tunable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParamBounds {
    pub const fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunableParam {
    BaseLambda,
    HomeFieldAdvantage,
    TeamStrengthMultiplier,
    /// Moving the ERA weight moves the WHIP weight by the opposite amount.
    PitcherEraWeight,
    GameChaosVariance,
}

impl TunableParam {
    pub const ALL: [TunableParam; 5] = [
        TunableParam::BaseLambda,
        TunableParam::HomeFieldAdvantage,
        TunableParam::TeamStrengthMultiplier,
        TunableParam::PitcherEraWeight,
        TunableParam::GameChaosVariance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TunableParam::BaseLambda => "base_lambda",
            TunableParam::HomeFieldAdvantage => "home_field_advantage",
            TunableParam::TeamStrengthMultiplier => "team_strength_multiplier",
            TunableParam::PitcherEraWeight => "pitcher_era_weight",
            TunableParam::GameChaosVariance => "game_chaos_variance",
        }
    }

    pub fn get(self, cfg: &SimulationConfig) -> f64 {
        match self {
            TunableParam::BaseLambda => cfg.base_lambda,
            TunableParam::HomeFieldAdvantage => cfg.home_field_advantage,
            TunableParam::TeamStrengthMultiplier => cfg.team_strength_multiplier,
            TunableParam::PitcherEraWeight => cfg.pitcher_era_weight,
            TunableParam::GameChaosVariance => cfg.game_chaos_variance,
        }
    }

    pub fn set(self, cfg: &mut SimulationConfig, value: f64) {
        match self {
            TunableParam::BaseLambda => cfg.base_lambda = value,
            TunableParam::HomeFieldAdvantage => cfg.home_field_advantage = value,
            TunableParam::TeamStrengthMultiplier => cfg.team_strength_multiplier = value,
            TunableParam::PitcherEraWeight => {
                cfg.pitcher_era_weight = value;
                cfg.pitcher_whip_weight = 1.0 - value;
            }
            TunableParam::GameChaosVariance => cfg.game_chaos_variance = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Fewer completed records than this and the cycle is skipped.
    pub min_sample_size: usize,
    /// Trailing count of completed records evaluated per cycle.
    pub window: usize,
    /// Contiguous slices of the window that must all miss a band for a HIGH proposal.
    pub observation_segments: usize,
    pub winner_accuracy_floor: f64,
    pub total_accuracy_floor: f64,
    pub max_mean_abs_error: f64,
    pub base_lambda: ParamBounds,
    pub home_field_advantage: ParamBounds,
    pub team_strength_multiplier: ParamBounds,
    pub pitcher_era_weight: ParamBounds,
    pub game_chaos_variance: ParamBounds,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 20,
            window: 60,
            observation_segments: 3,
            winner_accuracy_floor: 0.55,
            total_accuracy_floor: 0.52,
            max_mean_abs_error: 3.50,
            base_lambda: ParamBounds::new(3.50, 5.50, 0.05),
            home_field_advantage: ParamBounds::new(0.0, 0.50, 0.02),
            team_strength_multiplier: ParamBounds::new(0.10, 1.50, 0.05),
            pitcher_era_weight: ParamBounds::new(0.30, 0.80, 0.02),
            game_chaos_variance: ParamBounds::new(0.0, 0.20, 0.005),
        }
    }
}

impl TunerConfig {
    pub fn bounds(&self, param: TunableParam) -> ParamBounds {
        match param {
            TunableParam::BaseLambda => self.base_lambda,
            TunableParam::HomeFieldAdvantage => self.home_field_advantage,
            TunableParam::TeamStrengthMultiplier => self.team_strength_multiplier,
            TunableParam::PitcherEraWeight => self.pitcher_era_weight,
            TunableParam::GameChaosVariance => self.game_chaos_variance,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_sample_size == 0 {
            return Err(EngineError::invalid_config("min_sample_size must be at least 1"));
        }
        if self.window < self.min_sample_size {
            return Err(EngineError::invalid_config(
                "window must be at least min_sample_size",
            ));
        }
        if self.observation_segments == 0 {
            return Err(EngineError::invalid_config(
                "observation_segments must be at least 1",
            ));
        }
        for floor in [self.winner_accuracy_floor, self.total_accuracy_floor] {
            if !(0.0..=1.0).contains(&floor) {
                return Err(EngineError::invalid_config("accuracy floors must be in [0, 1]"));
            }
        }
        if !(self.max_mean_abs_error > 0.0) {
            return Err(EngineError::invalid_config("max_mean_abs_error must be positive"));
        }
        for param in TunableParam::ALL {
            let b = self.bounds(param);
            if !(b.min < b.max) || !(b.step > 0.0) {
                return Err(EngineError::InvalidConfig(format!(
                    "bounds for {} need min < max and a positive step",
                    param.name()
                )));
            }
        }
        let era = self.pitcher_era_weight;
        if !(era.min > 0.0 && era.max < 1.0) {
            return Err(EngineError::invalid_config(
                "pitcher_era_weight bounds must stay inside (0, 1)",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub simulation: SimulationConfig,
    pub betting: BettingConfig,
    pub tuner: TunerConfig,
    pub performance: PerformanceConfig,
}

impl EngineConfig {
    /// Defaults, then `MLB_EDGE_CONFIG` (a JSON file) if set, then individual
    /// `MLB_EDGE_*` overrides. The result is validated.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = match env::var("MLB_EDGE_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::load(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read engine config {}", path.display()))?;
        let cfg: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parse engine config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let f64_var = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f64>().ok());
        let usize_var = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok());

        let sim = &mut self.simulation;
        if let Some(v) = f64_var("MLB_EDGE_BASE_LAMBDA") {
            sim.base_lambda = v;
        }
        if let Some(v) = f64_var("MLB_EDGE_HOME_FIELD_ADVANTAGE") {
            sim.home_field_advantage = v;
        }
        if let Some(v) = f64_var("MLB_EDGE_TEAM_STRENGTH_MULTIPLIER") {
            sim.team_strength_multiplier = v;
        }
        if let Some(v) = f64_var("MLB_EDGE_PITCHER_ERA_WEIGHT") {
            sim.pitcher_era_weight = v;
        }
        if let Some(v) = f64_var("MLB_EDGE_PITCHER_WHIP_WEIGHT") {
            sim.pitcher_whip_weight = v;
        }
        if let Some(v) = f64_var("MLB_EDGE_CHAOS_VARIANCE") {
            sim.game_chaos_variance = v;
        }
        if let Some(v) = lookup("MLB_EDGE_TRIAL_COUNT").and_then(|v| v.trim().parse::<u32>().ok())
        {
            sim.trial_count = v;
        }

        let bet = &mut self.betting;
        if let Some(v) = f64_var("MLB_EDGE_MIN_EDGE") {
            bet.min_edge = v;
        }
        if let Some(v) = f64_var("MLB_EDGE_MEDIUM_CONFIDENCE_EV") {
            bet.medium_confidence_ev = v;
        }
        if let Some(v) = f64_var("MLB_EDGE_HIGH_CONFIDENCE_EV") {
            bet.high_confidence_ev = v;
        }
        if let Some(v) = f64_var("MLB_EDGE_KELLY_FRACTION") {
            bet.kelly_fraction = v;
        }
        if let Some(v) = f64_var("MLB_EDGE_MAX_STAKE_FRACTION") {
            bet.max_stake_fraction = v;
        }

        if let Some(v) = usize_var("MLB_EDGE_TUNER_MIN_SAMPLE") {
            self.tuner.min_sample_size = v;
        }
        if let Some(v) = usize_var("MLB_EDGE_TUNER_WINDOW") {
            self.tuner.window = v;
        }
        if let Some(v) = f64_var("MLB_EDGE_TOTAL_LINE") {
            self.performance.total_line = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.simulation.validate()?;
        self.betting.validate()?;
        self.tuner.validate()?;
        if !(self.performance.total_line > 0.0) {
            return Err(EngineError::invalid_config("total_line must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn pitcher_weights_must_sum_to_one() {
        let cfg = SimulationConfig {
            pitcher_era_weight: 0.7,
            pitcher_whip_weight: 0.4,
            ..SimulationConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn zero_weight_is_rejected_not_clamped() {
        let cfg = SimulationConfig {
            pitcher_era_weight: 1.0,
            pitcher_whip_weight: 0.0,
            ..SimulationConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn betting_thresholds_must_be_strictly_ordered() {
        let cfg = BettingConfig {
            medium_confidence_ev: 0.08,
            high_confidence_ev: 0.08,
            ..BettingConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overrides_parse_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = [
            ("MLB_EDGE_BASE_LAMBDA", "4.8"),
            ("MLB_EDGE_TRIAL_COUNT", "nope"),
            ("MLB_EDGE_TUNER_MIN_SAMPLE", " 30 "),
        ]
        .into_iter()
        .collect();
        let mut cfg = EngineConfig::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.simulation.base_lambda, 4.8);
        assert_eq!(cfg.simulation.trial_count, 2_000);
        assert_eq!(cfg.tuner.min_sample_size, 30);
    }

    #[test]
    fn era_weight_setter_keeps_pair_summing_to_one() {
        let mut cfg = SimulationConfig::default();
        TunableParam::PitcherEraWeight.set(&mut cfg, 0.62);
        cfg.validate().unwrap();
        assert!((cfg.pitcher_whip_weight - 0.38).abs() < 1e-12);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"simulation":{"base_lambda":4.1}}"#).unwrap();
        assert_eq!(cfg.simulation.base_lambda, 4.1);
        assert_eq!(cfg.betting, BettingConfig::default());
    }
}
