use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BettingConfig;
use crate::simulation::{Confidence, SimulationResult};

/// Quoted prices for one fixture, American odds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketPrice {
    pub away_moneyline: Option<i32>,
    pub home_moneyline: Option<i32>,
    pub total_line: Option<f64>,
    pub over_price: Option<i32>,
    pub under_price: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    AwayMoneyline,
    HomeMoneyline,
    Over,
    Under,
}

impl Market {
    pub fn is_moneyline(self) -> bool {
        matches!(self, Market::AwayMoneyline | Market::HomeMoneyline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    pub market: Market,
    pub price: i32,
    /// Set for totals picks.
    pub line: Option<f64>,
    pub model_probability: f64,
    pub implied_probability: f64,
    pub edge: f64,
    pub tier: Tier,
    pub decimal_odds: f64,
    pub stake_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub fixture_key: String,
    pub config_version: u64,
    pub picks: Vec<Pick>,
}

/// Break-even probability of an American price. Prices strictly between
/// -100 and +100 do not exist and yield `None`.
pub fn implied_probability(odds: i32) -> Option<f64> {
    let o = odds as f64;
    if odds >= 100 {
        Some(100.0 / (o + 100.0))
    } else if odds <= -100 {
        Some(-o / (-o + 100.0))
    } else {
        None
    }
}

pub fn decimal_odds(odds: i32) -> Option<f64> {
    let o = odds as f64;
    if odds >= 100 {
        Some(1.0 + o / 100.0)
    } else if odds <= -100 {
        Some(1.0 + 100.0 / -o)
    } else {
        None
    }
}

/// Fractional Kelly for a bet paying `decimal` with win probability `p` and
/// loss probability `q` (the remainder is a push and returns the stake).
pub fn kelly_stake(p: f64, q: f64, decimal: f64, cfg: &BettingConfig) -> f64 {
    let b = decimal - 1.0;
    if !(b > 0.0) {
        return 0.0;
    }
    let full = (p * b - q) / b;
    (cfg.kelly_fraction * full).clamp(0.0, cfg.max_stake_fraction)
}

struct Candidate {
    market: Market,
    price: Option<i32>,
    line: Option<f64>,
    win: f64,
    loss: f64,
    penalised: bool,
}

/// Grades the market against a simulation. Returns `None` when nothing
/// clears the gates, including every LOW-confidence result.
pub fn recommend(
    result: &SimulationResult,
    market: &MarketPrice,
    cfg: &BettingConfig,
) -> Option<Recommendation> {
    if result.confidence == Confidence::Low {
        debug!(fixture = %result.fixture_key, "low confidence result; no recommendation");
        return None;
    }

    let both_announced = result.away_pitcher_announced && result.home_pitcher_announced;
    let mut moneyline = vec![
        Candidate {
            market: Market::AwayMoneyline,
            price: market.away_moneyline,
            line: None,
            win: result.away_win_probability,
            loss: result.home_win_probability,
            penalised: !result.away_pitcher_announced,
        },
        Candidate {
            market: Market::HomeMoneyline,
            price: market.home_moneyline,
            line: None,
            win: result.home_win_probability,
            loss: result.away_win_probability,
            penalised: !result.home_pitcher_announced,
        },
    ];
    let mut totals = Vec::new();
    if let Some(line) = market.total_line.filter(|l| l.is_finite() && *l > 0.0) {
        let over = result.prob_total_over(line);
        let under = result.prob_total_under(line);
        totals.push(Candidate {
            market: Market::Over,
            price: market.over_price,
            line: Some(line),
            win: over,
            loss: under,
            penalised: !both_announced,
        });
        totals.push(Candidate {
            market: Market::Under,
            price: market.under_price,
            line: Some(line),
            win: under,
            loss: over,
            penalised: !both_announced,
        });
    }

    let mut picks = Vec::new();
    for group in [&mut moneyline, &mut totals] {
        let best = group
            .drain(..)
            .filter_map(|c| grade(c, cfg))
            .max_by(|a, b| a.edge.total_cmp(&b.edge));
        picks.extend(best);
    }

    if picks.is_empty() {
        return None;
    }
    Some(Recommendation {
        fixture_key: result.fixture_key.clone(),
        config_version: result.config_version,
        picks,
    })
}

fn grade(c: Candidate, cfg: &BettingConfig) -> Option<Pick> {
    let price = c.price?;
    let (Some(implied), Some(decimal)) = (implied_probability(price), decimal_odds(price)) else {
        debug!(market = ?c.market, price, "skipping invalid american price");
        return None;
    };
    let penalty = if c.penalised { cfg.unannounced_penalty } else { 0.0 };
    let p = (c.win - penalty).max(0.0);
    // The penalty moves mass from the win column to the loss column.
    let q = (c.loss + (c.win - p)).min(1.0);
    let edge = p - implied;
    if edge < cfg.min_edge {
        return None;
    }
    let tier = if edge >= cfg.high_confidence_ev {
        Tier::High
    } else if edge >= cfg.medium_confidence_ev {
        Tier::Medium
    } else {
        return None;
    };
    Some(Pick {
        market: c.market,
        price,
        line: c.line,
        model_probability: p,
        implied_probability: implied,
        edge,
        tier,
        decimal_odds: decimal,
        stake_fraction: kelly_stake(p, q, decimal, cfg),
    })
}
