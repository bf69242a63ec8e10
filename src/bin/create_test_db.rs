use std::path::Path;

use charging_telemetry::adapters::db::{
    count_log_records, insert_log_record, list_log_records, open_connection, run_migrations,
    schema_version,
};
use charging_telemetry::app::config::DEFAULT_TOPIC;
use charging_telemetry::domain::clock::{Clock, SystemClock, TimestampMs, to_iso8601_seconds};
use charging_telemetry::domain::models::NewLogRecord;
use charging_telemetry::domain::simulator::{SessionSimulator, SimulatorSettings};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rusqlite::Connection;

const DEFAULT_PATH: &str = "./data/telemetry_test.db";
const SEED_TICK_MS: i64 = 60_000;

#[derive(Debug, PartialEq)]
struct Options {
    path: String,
    force: bool,
    seed_records: usize,
    session_id: u64,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("failed to create test db: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1))? else {
        print_help();
        return Ok(());
    };

    let path = Path::new(&options.path);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create parent directory: {error}"))?;
    }
    if options.force && path.exists() {
        std::fs::remove_file(path)
            .map_err(|error| format!("failed to remove existing db file: {error}"))?;
    }

    let mut connection = open_connection(&options.path).map_err(|error| error.to_string())?;
    run_migrations(&mut connection).map_err(|error| error.to_string())?;

    if options.seed_records > 0 {
        seed_session(&connection, options.session_id, options.seed_records)?;
    }

    report(&connection, &options.path)
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Option<Options>, String> {
    let mut options = Options {
        path: DEFAULT_PATH.to_string(),
        force: false,
        seed_records: 0,
        session_id: 1,
    };

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--path" => options.path = required_value(&mut args, "--path")?,
            "--force" => options.force = true,
            "--seed" => {
                options.seed_records = required_value(&mut args, "--seed")?
                    .parse()
                    .map_err(|_| "--seed requires a record count".to_string())?;
            }
            "--session-id" => {
                options.session_id = required_value(&mut args, "--session-id")?
                    .parse()
                    .ok()
                    .filter(|id| *id > 0)
                    .ok_or_else(|| "--session-id requires a positive integer".to_string())?;
            }
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Some(options))
}

fn required_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{flag} requires a value"))
}

// One simulated minute per record, ending at the current time.
fn seed_session(connection: &Connection, session_id: u64, records: usize) -> Result<(), String> {
    let span_ms = SEED_TICK_MS.saturating_mul(records as i64);
    let started_at = TimestampMs(SystemClock.now().0.saturating_sub(span_ms));
    let mut simulator = SessionSimulator::new(
        session_id,
        SimulatorSettings::default(),
        StdRng::seed_from_u64(session_id),
        started_at,
    );

    for tick in 1..=records as i64 {
        let now = TimestampMs(started_at.0 + tick * SEED_TICK_MS);
        let record = NewLogRecord {
            received_at: to_iso8601_seconds(now),
            topic: DEFAULT_TOPIC.to_string(),
            payload: simulator.step(now),
        };
        insert_log_record(connection, &record).map_err(|error| error.to_string())?;
    }

    println!("seeded {records} records for session {session_id}");
    Ok(())
}

fn report(connection: &Connection, path: &str) -> Result<(), String> {
    let version = schema_version(connection).map_err(|error| error.to_string())?;
    let records = count_log_records(connection).map_err(|error| error.to_string())?;
    let latest = list_log_records(connection)
        .map_err(|error| error.to_string())?
        .pop()
        .map(|record| record.received_at);

    println!("telemetry db ready at: {path}");
    println!("schema version: {version}");
    println!("log records: {records}");
    println!("latest received_at: {}", latest.as_deref().unwrap_or("-"));
    Ok(())
}

fn print_help() {
    println!("create_test_db");
    println!();
    println!("Usage:");
    println!("  cargo run --bin create_test_db -- [--path <file>] [--force] [--seed <n>]");
    println!();
    println!("Options:");
    println!("  --path <file>       target sqlite file (default: {DEFAULT_PATH})");
    println!("  --force             delete existing file before creating");
    println!("  --seed <n>          insert n simulated telemetry records");
    println!("  --session-id <id>   session used for seeded records (default: 1)");
}
