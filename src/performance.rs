use serde::{Deserialize, Serialize};

use crate::betting::{Market, Pick, Tier};
use crate::config::PerformanceConfig;
use crate::fixture::Venue;
use crate::ledger::PredictionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalScore {
    pub away: u32,
    pub home: u32,
}

impl FinalScore {
    pub fn total(&self) -> u32 {
        self.away + self.home
    }

    /// `None` for a tie (suspended games and the like).
    pub fn winner(&self) -> Option<Venue> {
        if self.home > self.away {
            Some(Venue::Home)
        } else if self.away > self.home {
            Some(Venue::Away)
        } else {
            None
        }
    }
}

/// Accuracy figures for one slice of completed predictions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SliceMetric {
    pub sample_size: usize,
    pub winner_accuracy: f64,
    pub total_accuracy: f64,
    pub perfect_accuracy: f64,
    pub mean_abs_error: f64,
    /// Mean of predicted minus actual total; positive means the model runs high.
    pub mean_bias: f64,
    pub brier_score: f64,
}

/// Settled picks at a flat one unit each.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PickSlice {
    pub picks: usize,
    pub wins: usize,
    pub losses: usize,
    pub pushes: usize,
    /// Net units won.
    pub units: f64,
}

impl PickSlice {
    /// Wins over decided picks; pushes are left out.
    pub fn hit_rate(&self) -> f64 {
        let decided = self.wins + self.losses;
        if decided == 0 {
            0.0
        } else {
            self.wins as f64 / decided as f64
        }
    }

    /// Net units per unit staked.
    pub fn roi(&self) -> f64 {
        if self.picks == 0 {
            0.0
        } else {
            self.units / self.picks as f64
        }
    }

    fn settle(&mut self, pick: &Pick, result: PickResult) {
        self.picks += 1;
        match result {
            PickResult::Win => {
                self.wins += 1;
                self.units += pick.decimal_odds - 1.0;
            }
            PickResult::Loss => {
                self.losses += 1;
                self.units -= 1.0;
            }
            PickResult::Push => self.pushes += 1,
        }
    }
}

/// How the recommendations attached to the window's records paid out.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BettingPerformance {
    pub overall: PickSlice,
    pub high: PickSlice,
    pub medium: PickSlice,
}

impl BettingPerformance {
    pub fn tier(&self, tier: Tier) -> &PickSlice {
        match tier {
            Tier::High => &self.high,
            Tier::Medium => &self.medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub window: usize,
    pub total_line: f64,
    pub overall: SliceMetric,
    /// Contiguous slices of the window, oldest first.
    pub segments: Vec<SliceMetric>,
    #[serde(default)]
    pub betting: BettingPerformance,
}

impl PerformanceMetric {
    pub fn sample_size(&self) -> usize {
        self.overall.sample_size
    }
}

struct Graded {
    winner_correct: bool,
    total_correct: bool,
    error: f64,
    brier: f64,
}

/// Scores the trailing `window` completed records (ordered by date, then key).
pub fn evaluate(
    records: &[PredictionRecord],
    window: usize,
    cfg: &PerformanceConfig,
    segments: usize,
) -> PerformanceMetric {
    let mut completed: Vec<&PredictionRecord> =
        records.iter().filter(|r| r.outcome.is_some()).collect();
    completed.sort_by(|a, b| a.fixture.date.cmp(&b.fixture.date).then_with(|| a.key.cmp(&b.key)));
    let skip = completed.len().saturating_sub(window);

    let window_records = &completed[skip..];
    let graded: Vec<Graded> = window_records
        .iter()
        .filter_map(|r| grade(r, cfg.total_line))
        .collect();

    let n = graded.len();
    let parts = segments.max(1).min(n.max(1));
    let segments = if n == 0 {
        Vec::new()
    } else {
        (0..parts)
            .map(|i| summarize(&graded[i * n / parts..(i + 1) * n / parts]))
            .collect()
    };

    PerformanceMetric {
        window,
        total_line: cfg.total_line,
        overall: summarize(&graded),
        segments,
        betting: grade_picks(window_records),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PickResult {
    Win,
    Loss,
    Push,
}

fn settle(pick: &Pick, score: FinalScore) -> Option<PickResult> {
    let backed = |won: bool, lost: bool| {
        if won {
            PickResult::Win
        } else if lost {
            PickResult::Loss
        } else {
            PickResult::Push
        }
    };
    let winner = score.winner();
    let total = score.total() as f64;
    Some(match pick.market {
        Market::AwayMoneyline => backed(winner == Some(Venue::Away), winner == Some(Venue::Home)),
        Market::HomeMoneyline => backed(winner == Some(Venue::Home), winner == Some(Venue::Away)),
        Market::Over => {
            let line = pick.line?;
            backed(total > line, total < line)
        }
        Market::Under => {
            let line = pick.line?;
            backed(total < line, total > line)
        }
    })
}

fn grade_picks(records: &[&PredictionRecord]) -> BettingPerformance {
    let mut perf = BettingPerformance::default();
    for record in records {
        let (Some(score), Some(rec)) = (record.outcome, &record.recommendation) else {
            continue;
        };
        for pick in &rec.picks {
            let Some(result) = settle(pick, score) else {
                continue;
            };
            perf.overall.settle(pick, result);
            match pick.tier {
                Tier::High => perf.high.settle(pick, result),
                Tier::Medium => perf.medium.settle(pick, result),
            }
        }
    }
    perf
}

fn grade(record: &PredictionRecord, line: f64) -> Option<Graded> {
    let actual = record.outcome?;
    let result = &record.result;
    let predicted_winner = if result.expected_away_runs > result.expected_home_runs {
        Venue::Away
    } else {
        Venue::Home
    };
    let predicted_total = result.expected_total_runs;
    let actual_total = actual.total() as f64;
    let home_won = if actual.winner() == Some(Venue::Home) { 1.0 } else { 0.0 };

    Some(Graded {
        winner_correct: actual.winner() == Some(predicted_winner),
        total_correct: (predicted_total > line) == (actual_total > line),
        error: predicted_total - actual_total,
        brier: (result.home_win_probability - home_won).powi(2),
    })
}

fn summarize(graded: &[Graded]) -> SliceMetric {
    if graded.is_empty() {
        return SliceMetric::default();
    }
    let n = graded.len() as f64;
    let rate = |f: &dyn Fn(&Graded) -> bool| graded.iter().filter(|g| f(g)).count() as f64 / n;
    SliceMetric {
        sample_size: graded.len(),
        winner_accuracy: rate(&|g| g.winner_correct),
        total_accuracy: rate(&|g| g.total_correct),
        perfect_accuracy: rate(&|g| g.winner_correct && g.total_correct),
        mean_abs_error: graded.iter().map(|g| g.error.abs()).sum::<f64>() / n,
        mean_bias: graded.iter().map(|g| g.error).sum::<f64>() / n,
        brier_score: graded.iter().map(|g| g.brier).sum::<f64>() / n,
    }
}
