use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{info, warn};

use mlb_edge::betting::{MarketPrice, Pick};
use mlb_edge::config::EngineConfig;
use mlb_edge::config_store::ConfigStore;
use mlb_edge::fixture::FixtureInput;
use mlb_edge::ledger::PredictionLedger;
use mlb_edge::logging::init_logging;
use mlb_edge::persist;
use mlb_edge::service::{Prediction, PredictionService};
use mlb_edge::tuner::ReviewQueue;

#[derive(Debug, Deserialize)]
struct SlateFile {
    fixtures: Vec<FixtureInput>,
    /// Keyed by any spelling of the fixture key.
    #[serde(default)]
    markets: HashMap<String, MarketPrice>,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_logging();

    let slate_path = positional_arg().ok_or_else(|| {
        anyhow!("usage: mlb_edge <slate.json> [--seed N] [--ledger PATH] [--history PATH]")
    })?;
    let seed = parse_u64_arg("--seed");
    let ledger_path = parse_path_arg("--ledger");
    let history_path = parse_path_arg("--history");

    let cfg = EngineConfig::from_env().context("load engine config")?;
    let raw = fs::read_to_string(&slate_path)
        .with_context(|| format!("read slate {}", slate_path.display()))?;
    let slate: SlateFile = serde_json::from_str(&raw)
        .with_context(|| format!("parse slate {}", slate_path.display()))?;

    let ledger = match ledger_path.as_ref().filter(|p| p.exists()) {
        Some(path) => persist::load_ledger(path)?,
        None => PredictionLedger::new(),
    };
    let (store, review) = match history_path.as_ref().filter(|p| p.exists()) {
        Some(path) => persist::load_config_history(path)?,
        None => (ConfigStore::new(cfg.simulation.clone())?, ReviewQueue::default()),
    };
    let service = PredictionService::with_state(cfg, store, ledger)?;
    service.restore_review_queue(review);
    info!(
        version = service.current_config().version,
        fixtures = slate.fixtures.len(),
        "simulating slate"
    );

    for (key, price) in slate.markets {
        service.update_market(&key, price)?;
    }

    let results = service.predict_slate(&slate.fixtures, seed);
    for (fixture, result) in slate.fixtures.iter().zip(results) {
        match result {
            Ok(prediction) => print_prediction(&prediction),
            Err(err) => warn!(fixture = %fixture.fixture_id, error = %err, "prediction failed"),
        }
    }

    if let Some(path) = ledger_path {
        persist::save_ledger(service.ledger(), &path)?;
    }
    if let Some(path) = history_path {
        persist::save_config_history(service.store(), &service.review_queue(), &path)?;
    }
    Ok(())
}

fn print_prediction(p: &Prediction) {
    let r = &p.result;
    println!(
        "{}  away {:.1}%  home {:.1}%  push {:.1}%  runs {:.2}-{:.2} (total {:.2} ± {:.2})  [{:?}, v{}]",
        p.key,
        r.away_win_probability * 100.0,
        r.home_win_probability * 100.0,
        r.push_probability * 100.0,
        r.expected_away_runs,
        r.expected_home_runs,
        r.expected_total_runs,
        r.total_runs_stddev,
        r.confidence,
        r.config_version,
    );
    if let Some(best) = r.most_likely_score() {
        println!(
            "    most likely {}-{} ({:.1}%)",
            best.away,
            best.home,
            best.probability * 100.0
        );
    }
    let Some(rec) = &p.recommendation else {
        return;
    };
    for pick in &rec.picks {
        println!("    {}", describe_pick(pick));
    }
}

fn describe_pick(pick: &Pick) -> String {
    let line = pick.line.map(|l| format!(" {l}")).unwrap_or_default();
    format!(
        "{:?}{} @ {:+}  model {:.1}% vs implied {:.1}%  edge {:+.1}%  {:?}  stake {:.2}%",
        pick.market,
        line,
        pick.price,
        pick.model_probability * 100.0,
        pick.implied_probability * 100.0,
        pick.edge * 100.0,
        pick.tier,
        pick.stake_fraction * 100.0,
    )
}

fn positional_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut skip_next = false;
    for arg in &args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg.starts_with("--") {
            skip_next = !arg.contains('=');
            continue;
        }
        return Some(PathBuf::from(arg));
    }
    None
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&format!("{name}="))
            && !path.trim().is_empty()
        {
            return Some(PathBuf::from(path.trim()));
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}

fn parse_u64_arg(name: &str) -> Option<u64> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && let Ok(v) = raw.trim().parse::<u64>()
        {
            return Some(v);
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && let Ok(v) = next.trim().parse::<u64>()
        {
            return Some(v);
        }
    }
    None
}
