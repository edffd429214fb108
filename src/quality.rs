use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{SimulationConfig, TierCuts, TierFactors};
use crate::error::EngineError;

pub const NEUTRAL_FACTOR: f64 = 1.0;

const PLACEHOLDER_NAMES: [&str; 7] = ["", "tbd", "tba", "unannounced", "unknown", "n/a", "none"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitcherProfile {
    pub name: String,
    pub era: Option<f64>,
    pub whip: Option<f64>,
    pub starts: u32,
    pub innings: f64,
}

/// A side's starting pitcher. The only legal transition is
/// `Unannounced -> Announced`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PitcherSlot {
    #[default]
    Unannounced,
    Announced(PitcherProfile),
}

impl PitcherSlot {
    /// Builds a slot from a feed record; placeholder names ("TBD" and the
    /// like) stay unannounced.
    pub fn from_feed(profile: PitcherProfile) -> Self {
        if is_placeholder_name(&profile.name) {
            PitcherSlot::Unannounced
        } else {
            PitcherSlot::Announced(profile)
        }
    }

    pub fn is_announced(&self) -> bool {
        matches!(self, PitcherSlot::Announced(_))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            PitcherSlot::Announced(p) => Some(p.name.as_str()),
            PitcherSlot::Unannounced => None,
        }
    }

    /// Returns false (and leaves the slot alone) if a starter is already set
    /// or the profile only carries a placeholder name.
    pub fn announce(&mut self, profile: PitcherProfile) -> bool {
        if self.is_announced() || is_placeholder_name(&profile.name) {
            return false;
        }
        *self = PitcherSlot::Announced(profile);
        true
    }
}

pub fn is_placeholder_name(name: &str) -> bool {
    let n = name.trim().to_ascii_lowercase();
    PLACEHOLDER_NAMES.contains(&n.as_str())
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TeamProfile {
    /// Recent runs scored per game.
    pub runs_per_game: Option<f64>,
    pub games_played: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityFactor {
    pub value: f64,
    /// Set when the factor fell back to neutral for lack of data.
    pub low_confidence: bool,
}

impl QualityFactor {
    fn neutral() -> Self {
        Self {
            value: NEUTRAL_FACTOR,
            low_confidence: true,
        }
    }
}

/// Pitcher strength: above 1.0 suppresses the opponent's scoring.
pub fn pitcher_factor(slot: &PitcherSlot, cfg: &SimulationConfig) -> QualityFactor {
    let PitcherSlot::Announced(p) = slot else {
        return QualityFactor::neutral();
    };
    if p.starts < cfg.min_pitcher_starts || p.innings < cfg.min_pitcher_innings {
        return QualityFactor::neutral();
    }
    let (era, whip) = match resolve_rates(p) {
        Ok(rates) => rates,
        Err(err) => {
            debug!(pitcher = %p.name, error = %err, "falling back to neutral pitcher factor");
            return QualityFactor::neutral();
        }
    };

    let tiers = &cfg.tiers;
    let blended = cfg.pitcher_era_weight * tier_factor(era, &tiers.era, &tiers.era_factors)
        + cfg.pitcher_whip_weight * tier_factor(whip, &tiers.whip, &tiers.whip_factors);
    QualityFactor {
        value: blended.clamp(cfg.min_quality_factor, cfg.max_quality_factor),
        low_confidence: false,
    }
}

/// Offensive strength relative to the league scoring baseline.
pub fn team_factor(profile: &TeamProfile, cfg: &SimulationConfig) -> QualityFactor {
    if profile.games_played < cfg.min_team_games {
        return QualityFactor::neutral();
    }
    let Some(rpg) = profile.runs_per_game.filter(|v| v.is_finite() && *v >= 0.0) else {
        debug!("team profile missing a usable scoring rate; using neutral factor");
        return QualityFactor::neutral();
    };
    QualityFactor {
        value: (rpg / cfg.league_runs_per_game)
            .clamp(cfg.min_quality_factor, cfg.max_quality_factor),
        low_confidence: false,
    }
}

fn resolve_rates(p: &PitcherProfile) -> Result<(f64, f64), EngineError> {
    let era = p
        .era
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| EngineError::UnresolvedInput(format!("{}: missing ERA", p.name)))?;
    let whip = p
        .whip
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| EngineError::UnresolvedInput(format!("{}: missing WHIP", p.name)))?;
    Ok((era, whip))
}

// Discrete steps: a value between two cut points takes the enclosing tier's
// factor rather than an interpolated one.
fn tier_factor(value: f64, cuts: &TierCuts, factors: &TierFactors) -> f64 {
    if value <= cuts.ace {
        factors.ace
    } else if value <= cuts.good {
        factors.good
    } else if value <= cuts.average {
        factors.average
    } else {
        factors.poor
    }
}
