use chrono::{NaiveDate, Utc};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use mlb_edge::config::{PerformanceConfig, SimulationConfig};
use mlb_edge::config_store::{ConfigOrigin, VersionedConfig};
use mlb_edge::fixture::{FixtureInput, SideInput, canonicalize};
use mlb_edge::ledger::PredictionRecord;
use mlb_edge::performance::{FinalScore, evaluate};
use mlb_edge::quality::{PitcherProfile, PitcherSlot, TeamProfile};
use mlb_edge::simulation::simulate;

fn sample_fixture(day: u64) -> FixtureInput {
    let side = |team: &str, rpg: f64, era: f64, whip: f64| SideInput {
        team: team.to_string(),
        profile: TeamProfile {
            runs_per_game: Some(rpg),
            games_played: 110,
        },
        pitcher: PitcherSlot::Announced(PitcherProfile {
            name: format!("{team} starter"),
            era: Some(era),
            whip: Some(whip),
            starts: 21,
            innings: 124.0,
        }),
    };
    FixtureInput {
        fixture_id: format!("bench-{day}"),
        date: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap() + chrono::Days::new(day),
        away: side("Philadelphia Phillies", 4.9, 3.4, 1.12),
        home: side("Atlanta Braves", 4.7, 3.9, 1.24),
    }
}

fn config(trials: u32) -> VersionedConfig {
    VersionedConfig {
        version: 1,
        created_at: Utc::now(),
        origin: ConfigOrigin::Defaults,
        params: SimulationConfig {
            trial_count: trials,
            ..SimulationConfig::default()
        },
    }
}

fn bench_simulate(c: &mut Criterion) {
    let fixture = sample_fixture(0);
    let default_cfg = config(2_000);
    let deep_cfg = config(50_000);

    c.bench_function("simulate_2k_trials", |b| {
        b.iter(|| simulate(black_box(&fixture), black_box(&default_cfg), Some(7)).unwrap())
    });
    c.bench_function("simulate_50k_trials", |b| {
        b.iter(|| simulate(black_box(&fixture), black_box(&deep_cfg), Some(7)).unwrap())
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let cfg = config(200);
    let records: Vec<PredictionRecord> = (0..500)
        .map(|day| {
            let fixture = sample_fixture(day);
            let result = simulate(&fixture, &cfg, Some(day)).unwrap();
            let mut record = PredictionRecord::new(fixture, result, None);
            record.outcome = Some(FinalScore {
                away: (day % 7) as u32,
                home: (day % 5) as u32 + 1,
            });
            record
        })
        .collect();
    let perf = PerformanceConfig::default();

    c.bench_function("evaluate_500_records", |b| {
        b.iter(|| evaluate(black_box(&records), 60, &perf, 3))
    });
}

fn bench_canonicalize(c: &mut Criterion) {
    let raw = "2025-08-14|  Seattle_Mariners@Baltimore\tOrioles ";
    c.bench_function("canonicalize_key", |b| b.iter(|| canonicalize(black_box(raw))));
}

criterion_group!(benches, bench_simulate, bench_evaluate, bench_canonicalize);
criterion_main!(benches);
