use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::env;
use std::path::Path;
use tracing::info;

// Use library instead of local modules
use election_tally::{
    count_candidates, load_roster_csv, resolve, setup_database, tally, telemetry, Config,
    ReconciliationEngine, Topic,
};

const USAGE: &str = "usage:
  election-tally init
  election-tally import <roster.csv>
  election-tally tally <constituency|party-list> [area_id]";

fn main() -> Result<()> {
    telemetry::init();

    let args: Vec<String> = env::args().collect();
    let config = Config::from_env().context("Failed to read configuration")?;

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(&config),
        Some("import") => {
            let Some(path) = args.get(2) else {
                bail!("missing roster file\n{USAGE}");
            };
            run_import(&config, Path::new(path))
        }
        Some("tally") => {
            let Some(topic) = args.get(2) else {
                bail!("missing topic\n{USAGE}");
            };
            let area = match args.get(3) {
                Some(raw) => Some(raw.parse::<i64>().with_context(|| format!("invalid area id {raw:?}"))?),
                None => None,
            };
            run_tally(&config, topic, area)
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

fn open(config: &Config) -> Result<Connection> {
    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    setup_database(&conn).context("Failed to set up schema")?;
    Ok(conn)
}

fn run_init(config: &Config) -> Result<()> {
    open(config)?;
    info!(path = ?config.database_path, "database initialized with WAL mode");
    Ok(())
}

fn run_import(config: &Config, roster_path: &Path) -> Result<()> {
    let records = load_roster_csv(roster_path)
        .with_context(|| format!("Failed to read roster {:?}", roster_path))?;
    info!(records = records.len(), "roster loaded");

    let conn = open(config)?;
    let report = ReconciliationEngine::new().import_candidates(&conn, &records)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("candidates in database: {}", count_candidates(&conn)?);
    Ok(())
}

fn run_tally(config: &Config, topic: &str, area: Option<i64>) -> Result<()> {
    let topic: Topic = topic.parse()?;
    let conn = open(config)?;

    let counts = tally(&conn, topic, area)?;
    let resolution = resolve(&counts);

    let output = serde_json::json!({
        "topic": topic,
        "area_id": area,
        "counts": counts,
        "total": counts.total(),
        "resolution": resolution,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
