use chrono::{NaiveDate, Utc};

use mlb_edge::EngineError;
use mlb_edge::config::SimulationConfig;
use mlb_edge::config_store::{ConfigOrigin, VersionedConfig};
use mlb_edge::fixture::{FixtureInput, SideInput};
use mlb_edge::quality::{PitcherProfile, PitcherSlot, TeamProfile};
use mlb_edge::simulation::{Confidence, simulate};

fn versioned(params: SimulationConfig) -> VersionedConfig {
    VersionedConfig {
        version: 1,
        created_at: Utc::now(),
        origin: ConfigOrigin::Defaults,
        params,
    }
}

fn starter(name: &str, era: f64, whip: f64) -> PitcherSlot {
    PitcherSlot::Announced(PitcherProfile {
        name: name.to_string(),
        era: Some(era),
        whip: Some(whip),
        starts: 22,
        innings: 130.0,
    })
}

fn side(team: &str, rpg: f64, pitcher: PitcherSlot) -> SideInput {
    SideInput {
        team: team.to_string(),
        profile: TeamProfile {
            runs_per_game: Some(rpg),
            games_played: 118,
        },
        pitcher,
    }
}

fn fixture(away_pitcher: PitcherSlot, home_pitcher: PitcherSlot) -> FixtureInput {
    FixtureInput {
        fixture_id: "745001".to_string(),
        date: NaiveDate::from_ymd_opt(2025, 8, 14).unwrap(),
        away: side("Seattle Mariners", 4.4, away_pitcher),
        home: side("Baltimore Orioles", 4.6, home_pitcher),
    }
}

fn resolved() -> FixtureInput {
    fixture(starter("Logan Gilbert", 3.2, 1.05), starter("Dean Kremer", 4.3, 1.30))
}

#[test]
fn explicit_seed_is_reproducible() {
    let cfg = versioned(SimulationConfig::default());
    let a = simulate(&resolved(), &cfg, Some(42)).unwrap();
    let b = simulate(&resolved(), &cfg, Some(42)).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.seed, 42);
    assert_eq!(a.fixture_key, "2025-08-14|mariners @ orioles");
}

#[test]
fn thread_count_does_not_change_results() {
    let cfg = versioned(SimulationConfig::default());
    let parallel = simulate(&resolved(), &cfg, Some(9)).unwrap();
    let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let serial = pool.install(|| simulate(&resolved(), &cfg, Some(9)).unwrap());
    assert_eq!(parallel, serial);
}

#[test]
fn fresh_seed_is_recorded() {
    let cfg = versioned(SimulationConfig::default());
    let first = simulate(&resolved(), &cfg, None).unwrap();
    let replay = simulate(&resolved(), &cfg, Some(first.seed)).unwrap();
    assert_eq!(first, replay);
}

#[test]
fn higher_base_lambda_scores_more() {
    let mut totals = Vec::new();
    for lambda in [3.8, 4.4, 5.0] {
        let cfg = versioned(SimulationConfig {
            base_lambda: lambda,
            ..SimulationConfig::default()
        });
        totals.push(simulate(&resolved(), &cfg, Some(7)).unwrap().expected_total_runs);
    }
    assert!(totals[0] < totals[1], "{totals:?}");
    assert!(totals[1] < totals[2], "{totals:?}");
}

#[test]
fn probabilities_and_distributions_are_normalised() {
    let cfg = versioned(SimulationConfig::default());
    let r = simulate(&resolved(), &cfg, Some(3)).unwrap();
    let outcome = r.away_win_probability + r.home_win_probability + r.push_probability;
    assert!((outcome - 1.0).abs() < 1e-9);
    let totals: f64 = r.total_distribution.iter().sum();
    assert!((totals - 1.0).abs() < 1e-9);
    let scores: f64 = r.score_distribution.iter().map(|b| b.probability).sum();
    assert!((scores - 1.0).abs() < 1e-9);
    assert!((r.prob_total_over(8.5) + r.prob_total_under(8.5) - 1.0).abs() < 1e-9);
}

#[test]
fn identical_sides_favour_home() {
    let cfg = versioned(SimulationConfig {
        trial_count: 20_000,
        ..SimulationConfig::default()
    });
    let mut f = resolved();
    f.home.profile = f.away.profile.clone();
    f.home.pitcher = f.away.pitcher.clone();
    let r = simulate(&f, &cfg, Some(11)).unwrap();
    assert!(r.home_win_probability > r.away_win_probability);
    assert!(r.expected_home_runs > r.expected_away_runs);
}

#[test]
fn ace_suppresses_opponent_scoring() {
    let cfg = versioned(SimulationConfig::default());
    let vs_ace = simulate(
        &fixture(starter("Away", 4.0, 1.3), starter("Ace", 2.4, 0.95)),
        &cfg,
        Some(5),
    )
    .unwrap();
    let vs_poor = simulate(
        &fixture(starter("Away", 4.0, 1.3), starter("Poor", 5.6, 1.6)),
        &cfg,
        Some(5),
    )
    .unwrap();
    assert!(vs_ace.expected_away_runs < vs_poor.expected_away_runs);
}

#[test]
fn resolved_inputs_with_enough_trials_are_high() {
    let cfg = versioned(SimulationConfig::default());
    let r = simulate(&resolved(), &cfg, Some(1)).unwrap();
    assert_eq!(r.low_confidence_inputs, 0);
    assert_eq!(r.confidence, Confidence::High);
}

#[test]
fn both_unannounced_is_low() {
    let cfg = versioned(SimulationConfig::default());
    let r = simulate(
        &fixture(PitcherSlot::Unannounced, PitcherSlot::Unannounced),
        &cfg,
        Some(1),
    )
    .unwrap();
    assert_eq!(r.confidence, Confidence::Low);
    assert!(!r.away_pitcher_announced && !r.home_pitcher_announced);
    assert_eq!(r.low_confidence_inputs, 2);
}

#[test]
fn short_run_with_gaps_is_low_and_clean_short_run_is_medium() {
    let cfg = versioned(SimulationConfig {
        trial_count: 500,
        ..SimulationConfig::default()
    });
    let gap = simulate(
        &fixture(starter("Known", 3.5, 1.2), PitcherSlot::Unannounced),
        &cfg,
        Some(2),
    )
    .unwrap();
    assert_eq!(gap.confidence, Confidence::Low);

    let clean = simulate(&resolved(), &cfg, Some(2)).unwrap();
    assert_eq!(clean.confidence, Confidence::Medium);
}

#[test]
fn one_unannounced_with_enough_trials_is_medium() {
    let cfg = versioned(SimulationConfig::default());
    let r = simulate(
        &fixture(starter("Known", 3.5, 1.2), PitcherSlot::Unannounced),
        &cfg,
        Some(2),
    )
    .unwrap();
    assert_eq!(r.confidence, Confidence::Medium);
}

#[test]
fn zero_chaos_still_simulates() {
    let cfg = versioned(SimulationConfig {
        game_chaos_variance: 0.0,
        ..SimulationConfig::default()
    });
    let r = simulate(&resolved(), &cfg, Some(8)).unwrap();
    assert!(r.expected_total_runs > 0.0);
}

#[test]
fn invalid_weights_are_rejected() {
    let cfg = versioned(SimulationConfig {
        pitcher_era_weight: 0.5,
        pitcher_whip_weight: 0.6,
        ..SimulationConfig::default()
    });
    assert!(matches!(
        simulate(&resolved(), &cfg, Some(1)),
        Err(EngineError::InvalidConfig(_))
    ));
}
