use std::path::PathBuf;

use anyhow::{Context, Result};

use mlb_edge::config::EngineConfig;
use mlb_edge::config_store::ConfigStore;
use mlb_edge::logging::init_logging;
use mlb_edge::persist;
use mlb_edge::service::PredictionService;
use mlb_edge::tuner::{CycleOutcome, ReviewQueue};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_logging();

    let ledger_path = parse_path_arg("--ledger")
        .or_else(persist::default_ledger_path)
        .context("unable to resolve ledger path")?;
    let history_path = parse_path_arg("--history")
        .or_else(persist::default_config_path)
        .context("unable to resolve config history path")?;
    let rollback = parse_u64_arg("--rollback");
    let approve = parse_u64_arg("--approve");
    let dismiss = parse_u64_arg("--dismiss");

    let cfg = EngineConfig::from_env().context("load engine config")?;
    let ledger = persist::load_ledger(&ledger_path)?;
    let (store, review) = if history_path.exists() {
        persist::load_config_history(&history_path)?
    } else {
        (ConfigStore::new(cfg.simulation.clone())?, ReviewQueue::default())
    };
    let service = PredictionService::with_state(cfg, store, ledger)?;
    service.restore_review_queue(review);

    if let Some(version) = rollback {
        let restored = service.rollback(version)?;
        println!("rolled back to v{version} as v{}", restored.version);
    } else if let Some(id) = approve {
        let applied = service.approve_proposal(id)?;
        println!("approved #{id} as v{}", applied.version);
    } else if let Some(id) = dismiss {
        let dropped = service.dismiss_proposal(id)?;
        println!("dismissed #{id} ({} {:+})", dropped.param.name(), dropped.delta);
    } else {
        let report = service.trigger_tuning();
        println!("states: {:?}", report.states);
        if let Some(metric) = &report.metric {
            let m = &metric.overall;
            println!(
                "sample {}  winner {:.1}%  total {:.1}%  perfect {:.1}%  mae {:.2}  bias {:+.2}  brier {:.3}",
                m.sample_size,
                m.winner_accuracy * 100.0,
                m.total_accuracy * 100.0,
                m.perfect_accuracy * 100.0,
                m.mean_abs_error,
                m.mean_bias,
                m.brier_score,
            );
            for (label, slice) in [
                ("all", &metric.betting.overall),
                ("high", &metric.betting.high),
                ("medium", &metric.betting.medium),
            ] {
                if slice.picks == 0 {
                    continue;
                }
                println!(
                    "picks {label:<6} {}  won {}  lost {}  push {}  hit {:.1}%  units {:+.2}  roi {:+.1}%",
                    slice.picks,
                    slice.wins,
                    slice.losses,
                    slice.pushes,
                    slice.hit_rate() * 100.0,
                    slice.units,
                    slice.roi() * 100.0,
                );
            }
        }
        match &report.outcome {
            CycleOutcome::Completed {
                applied_version,
                auto_applied,
                queued,
            } => {
                for p in auto_applied {
                    println!("applied {} {:+} -> {:.3}", p.param.name(), p.delta, p.proposed);
                }
                if let Some(v) = applied_version {
                    println!("new config version v{v}");
                }
                if !queued.is_empty() {
                    println!("queued for review: {queued:?}");
                }
            }
            other => println!("outcome: {other:?}"),
        }
    }

    for p in service.pending_proposals() {
        println!(
            "pending #{} {} {:+} ({:?}, {:?})",
            p.id,
            p.param.name(),
            p.delta,
            p.confidence,
            p.trigger
        );
    }
    let status = service.tuning_status();
    println!(
        "active config v{} of {}",
        status.config_version,
        service.config_history().len()
    );

    persist::save_config_history(service.store(), &service.review_queue(), &history_path)?;
    Ok(())
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
