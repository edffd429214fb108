use chrono::{Duration, NaiveDate, Utc};

use mlb_edge::EngineError;
use mlb_edge::config::SimulationConfig;
use mlb_edge::config_store::{ConfigOrigin, VersionedConfig};
use mlb_edge::fixture::{FixtureInput, SideInput, Venue};
use mlb_edge::ledger::{PredictionLedger, PredictionRecord, UpsertOutcome, merge};
use mlb_edge::performance::FinalScore;
use mlb_edge::quality::{PitcherProfile, PitcherSlot, TeamProfile};
use mlb_edge::simulation::simulate;

fn profile(name: &str) -> PitcherProfile {
    PitcherProfile {
        name: name.to_string(),
        era: Some(3.4),
        whip: Some(1.12),
        starts: 18,
        innings: 104.0,
    }
}

fn fixture(away_pitcher: PitcherSlot) -> FixtureInput {
    let team = |name: &str, pitcher| SideInput {
        team: name.to_string(),
        profile: TeamProfile {
            runs_per_game: Some(4.5),
            games_played: 90,
        },
        pitcher,
    };
    FixtureInput {
        fixture_id: "7001".to_string(),
        date: NaiveDate::from_ymd_opt(2025, 7, 4).unwrap(),
        away: team("New York Yankees", away_pitcher),
        home: team("Boston Red Sox", PitcherSlot::Announced(profile("Home Starter"))),
    }
}

fn record(fixture: FixtureInput, version: u64, seed: u64, age_secs: i64) -> PredictionRecord {
    let cfg = VersionedConfig {
        version,
        created_at: Utc::now(),
        origin: ConfigOrigin::Defaults,
        params: SimulationConfig {
            trial_count: 300,
            ..SimulationConfig::default()
        },
    };
    let result = simulate(&fixture, &cfg, Some(seed)).unwrap();
    let mut r = PredictionRecord::new(fixture, result, None);
    r.updated_at = Utc::now() - Duration::seconds(age_secs);
    r
}

#[test]
fn announced_pitcher_survives_merge_with_unannounced() {
    let named = record(fixture(PitcherSlot::Announced(profile("Gerrit Cole"))), 1, 1, 100);
    let blank = record(fixture(PitcherSlot::Unannounced), 1, 2, 10);

    for (left, right) in [(&named, &blank), (&blank, &named)] {
        let merged = merge(left, right).record;
        assert_eq!(merged.fixture.away.pitcher.name(), Some("Gerrit Cole"));
    }
}

#[test]
fn placeholder_from_feed_never_displaces_a_name() {
    let tbd = PitcherSlot::from_feed(profile("TBD"));
    let named = record(fixture(PitcherSlot::Announced(profile("Gerrit Cole"))), 1, 1, 100);
    let blank = record(fixture(tbd), 1, 2, 0);
    let merged = merge(&named, &blank).record;
    assert_eq!(merged.fixture.away.pitcher.name(), Some("Gerrit Cole"));
}

#[test]
fn merge_is_idempotent() {
    let mut a = record(fixture(PitcherSlot::Unannounced), 1, 1, 300);
    a.aliases.insert("2025-07-04|NYY @ BOS".to_string());
    let mut b = record(fixture(PitcherSlot::Announced(profile("Carlos Rodon"))), 2, 2, 50);
    b.aliases.insert("2025-07-04|Yankees_@_Red_Sox".to_string());
    b.outcome = Some(FinalScore { away: 5, home: 3 });

    let once = merge(&a, &b).record;
    let twice = merge(&once, &b).record;
    assert_eq!(once, twice);

    let swapped = merge(&b, &a).record;
    assert_eq!(merge(&swapped, &a).record, swapped);
}

#[test]
fn later_config_version_wins_and_loser_is_kept() {
    let old = record(fixture(PitcherSlot::Unannounced), 1, 1, 10);
    let new = record(fixture(PitcherSlot::Unannounced), 3, 1, 100);
    let merged = merge(&old, &new).record;
    assert_eq!(merged.result.config_version, 3);
    assert_eq!(merged.superseded.len(), 1);
    assert_eq!(merged.superseded[0].config_version, 1);
    assert_eq!(merged.updated_at, old.updated_at);
}

#[test]
fn conflicting_outcomes_resolve_to_newer_record() {
    let mut older = record(fixture(PitcherSlot::Unannounced), 1, 1, 100);
    older.outcome = Some(FinalScore { away: 2, home: 1 });
    let mut newer = older.clone();
    newer.outcome = Some(FinalScore { away: 2, home: 4 });
    newer.updated_at = Utc::now();

    let merged = merge(&older, &newer);
    assert!(matches!(
        merged.conflict,
        Some(EngineError::DuplicateFixtureConflict { .. })
    ));
    assert_eq!(merged.record.outcome, Some(FinalScore { away: 2, home: 4 }));

    let reversed = merge(&newer, &older);
    assert_eq!(reversed.record.outcome, Some(FinalScore { away: 2, home: 4 }));
}

#[test]
fn spelling_variants_land_on_one_record() {
    let ledger = PredictionLedger::new();
    let first = record(fixture(PitcherSlot::Unannounced), 1, 1, 60);
    let second = record(fixture(PitcherSlot::Announced(profile("Gerrit Cole"))), 1, 2, 0);

    assert_eq!(
        ledger.upsert("2025-07-04|New_York_Yankees @ Boston_Red_Sox", first),
        UpsertOutcome::Inserted
    );
    assert!(matches!(
        ledger.upsert("2025-07-04 | nyy@bos", second),
        UpsertOutcome::Merged { conflict: false }
    ));
    assert_eq!(ledger.len(), 1);

    let stored = ledger.get("2025-07-04|yankees @ red sox").unwrap();
    assert_eq!(stored.aliases.len(), 2);
    assert_eq!(stored.fixture.away.pitcher.name(), Some("Gerrit Cole"));
}

#[test]
fn repeated_upsert_is_unchanged() {
    let ledger = PredictionLedger::new();
    let r = record(fixture(PitcherSlot::Unannounced), 1, 1, 0);
    ledger.upsert("2025-07-04|nyy @ bos", r.clone());
    assert_eq!(ledger.upsert("2025-07-04|nyy @ bos", r), UpsertOutcome::Unchanged);
}

#[test]
fn announce_resimulates_and_keeps_history() {
    let ledger = PredictionLedger::new();
    let r = record(fixture(PitcherSlot::Unannounced), 1, 1, 0);
    let key = r.key.clone();
    let before = r.result.clone();
    ledger.upsert(&key, r);

    let updated = ledger
        .announce_pitcher(&key, Venue::Away, profile("Gerrit Cole"), |f| {
            let cfg = VersionedConfig {
                version: 1,
                created_at: Utc::now(),
                origin: ConfigOrigin::Defaults,
                params: SimulationConfig::default(),
            };
            Ok((simulate(f, &cfg, Some(1))?, None))
        })
        .unwrap();
    assert!(updated.result.away_pitcher_announced);
    assert_eq!(updated.superseded, vec![before]);
    assert_eq!(updated.fixture.away.pitcher.name(), Some("Gerrit Cole"));
}

#[test]
fn announce_after_start_is_rejected() {
    let ledger = PredictionLedger::new();
    let r = record(fixture(PitcherSlot::Unannounced), 1, 1, 0);
    let key = r.key.clone();
    ledger.upsert(&key, r);
    ledger.mark_started(&key).unwrap();

    let err = ledger
        .announce_pitcher(&key, Venue::Away, profile("Late Name"), |_| {
            panic!("started fixtures are not re-simulated")
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::FixtureStarted(_)));
}

#[test]
fn unknown_keys_are_reported() {
    let ledger = PredictionLedger::new();
    assert!(matches!(
        ledger.record_outcome("2025-07-04|a @ b", FinalScore { away: 1, home: 0 }),
        Err(EngineError::UnknownFixture(_))
    ));
    assert!(matches!(
        ledger.mark_started("2025-07-04|a @ b"),
        Err(EngineError::UnknownFixture(_))
    ));
}

#[test]
fn restore_merges_duplicate_snapshot_rows() {
    let a = record(fixture(PitcherSlot::Unannounced), 1, 1, 30);
    let mut b = record(fixture(PitcherSlot::Announced(profile("Gerrit Cole"))), 2, 2, 0);
    b.key = "2025-07-04|NYY @ BOS".to_string();
    let ledger = PredictionLedger::restore(vec![a, b]);
    assert_eq!(ledger.len(), 1);
    let only = ledger.snapshot().remove(0);
    assert_eq!(only.result.config_version, 2);
    assert_eq!(only.superseded.len(), 1);
}

#[test]
fn completed_lists_only_scored_fixtures() {
    let ledger = PredictionLedger::new();
    let r = record(fixture(PitcherSlot::Unannounced), 1, 1, 0);
    let key = r.key.clone();
    ledger.upsert(&key, r);
    assert!(ledger.completed().is_empty());
    ledger
        .record_outcome(&key, FinalScore { away: 6, home: 2 })
        .unwrap();
    let done = ledger.completed();
    assert_eq!(done.len(), 1);
    assert!(done[0].started);
}

fn resimulate_at(version: u64) -> impl FnOnce(&FixtureInput) -> mlb_edge::Result<(mlb_edge::simulation::SimulationResult, Option<mlb_edge::betting::Recommendation>)> {
    move |f| {
        let cfg = VersionedConfig {
            version,
            created_at: Utc::now(),
            origin: ConfigOrigin::Defaults,
            params: SimulationConfig::default(),
        };
        Ok((simulate(f, &cfg, Some(3))?, None))
    }
}

#[test]
fn older_named_row_unlocks_a_newer_blank_simulation() {
    let ledger = PredictionLedger::new();
    let blank = record(fixture(PitcherSlot::Unannounced), 2, 1, 10);
    let named = record(fixture(PitcherSlot::Announced(profile("Gerrit Cole"))), 1, 2, 100);
    let key = blank.key.clone();
    ledger.upsert(&key, blank);
    ledger.upsert(&key, named);

    let stored = ledger.get(&key).unwrap();
    assert_eq!(stored.fixture.away.pitcher.name(), Some("Gerrit Cole"));
    assert_eq!(stored.result.config_version, 2);
    assert!(!stored.result.away_pitcher_announced);
    assert!(!stored.result_matches_fixture());
    assert!(!stored.locked);

    // The slot already reads as announced, yet the unlocked record re-simulates.
    let updated = ledger
        .announce_pitcher(&key, Venue::Away, profile("Gerrit Cole"), resimulate_at(2))
        .unwrap();
    assert!(updated.result.away_pitcher_announced);
    assert!(updated.result_matches_fixture());
    assert!(updated.locked);
    assert_eq!(updated.superseded.len(), 2);

    let again = ledger
        .refresh(&key, |_| panic!("locked records are not re-simulated"))
        .unwrap();
    assert_eq!(again, updated);
}

#[test]
fn matching_merge_stays_locked() {
    let old = record(fixture(PitcherSlot::Unannounced), 1, 1, 10);
    let new = record(fixture(PitcherSlot::Unannounced), 3, 1, 100);
    let merged = merge(&old, &new).record;
    assert!(merged.locked);
    assert!(merged.result_matches_fixture());
}

#[test]
fn refresh_of_started_record_is_rejected() {
    let ledger = PredictionLedger::new();
    let blank = record(fixture(PitcherSlot::Unannounced), 2, 1, 10);
    let named = record(fixture(PitcherSlot::Announced(profile("Gerrit Cole"))), 1, 2, 100);
    let key = blank.key.clone();
    ledger.upsert(&key, blank);
    ledger.upsert(&key, named);
    ledger.mark_started(&key).unwrap();
    assert!(matches!(
        ledger.refresh(&key, resimulate_at(2)),
        Err(EngineError::FixtureStarted(_))
    ));
}
