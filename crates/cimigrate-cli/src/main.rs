use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use cimigrate_core::{
    ConfigOverrides, MigrationConfig, Network, RunMode, RunOptions, analyze, migrate_genesis_file,
};
use cimigrate_error::MigrateError;
use cimigrate_store::{KvStore, SqliteStore, StoreSession, contract_key};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod render;

const DEFAULT_NETWORK: Network = Network::Mainnet;

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Help,
    Migrate(MigrateArgs),
    Inspect {
        db: PathBuf,
        address: Vec<u8>,
        json: bool,
    },
    Genesis {
        input: PathBuf,
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
struct MigrateArgs {
    db: PathBuf,
    config_file: Option<PathBuf>,
    overrides: ConfigOverrides,
    skip_validation: bool,
    strict: bool,
    json: bool,
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let exit_code = run(std::env::args_os(), &mut stdout, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run<I, W, E>(args: I, out: &mut W, err: &mut E) -> i32
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let command = match parse_args(args) {
        Ok(command) => command,
        Err(message) => {
            let _ = writeln!(err, "error: {message}");
            let _ = write_usage(err);
            return 2;
        }
    };

    let result = match command {
        Command::Help => {
            if write_usage(out).is_err() {
                return 1;
            }
            return 0;
        }
        Command::Migrate(args) => run_migrate(&args, out),
        Command::Inspect { db, address, json } => run_inspect(&db, &address, json, out),
        Command::Genesis { input, output } => run_genesis(&input, &output, out),
    };

    match result {
        Ok(()) => 0,
        Err(error) => {
            let _ = writeln!(err, "error: {error}");
            if let Some(hint) = error.suggestion() {
                let _ = writeln!(err, "hint: {hint}");
            }
            error.exit_code()
        }
    }
}

fn run_migrate<W: Write>(args: &MigrateArgs, out: &mut W) -> Result<(), MigrateError> {
    let file_overrides = match &args.config_file {
        Some(path) => ConfigOverrides::load(path)?,
        None => ConfigOverrides::default(),
    };
    let overrides = file_overrides.merge(args.overrides.clone());
    let config = MigrationConfig::resolve(DEFAULT_NETWORK, &overrides)?;
    let store = SqliteStore::open(&args.db)?;

    // The verdict is applied after printing so a strict failure still
    // shows the full report.
    let options = RunOptions {
        mode: RunMode::Lenient,
        skip_validation: args.skip_validation,
    };
    let mut report = cimigrate_core::run(&store, &config, options)?;
    let mode = if args.strict {
        RunMode::Strict
    } else {
        RunMode::Lenient
    };
    report.mode = mode;

    if args.json {
        write_json(out, &report)?;
    } else {
        write_text(out, &render::run_report(&report))?;
    }
    report.enforce(mode)
}

fn run_inspect<W: Write>(
    db: &Path,
    address: &[u8],
    json: bool,
    out: &mut W,
) -> Result<(), MigrateError> {
    let store = SqliteStore::open(db)?;
    let mut session = store.open_session()?;
    let address_hex = hex::encode(address);
    let value = session
        .get(&contract_key(address))?
        .ok_or_else(|| MigrateError::store("get", format!("no contract info for {address_hex}")))?;

    let analysis = analyze(&value);
    if json {
        write_json(out, &analysis)
    } else {
        write_text(out, &render::analysis(&address_hex, &analysis))
    }
}

fn run_genesis<W: Write>(input: &Path, output: &Path, out: &mut W) -> Result<(), MigrateError> {
    info!(
        input = %input.display(),
        output = %output.display(),
        "migrating genesis export"
    );
    let summary = migrate_genesis_file(input, output)?;
    write_text(out, &render::genesis_summary(&summary))
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), MigrateError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| MigrateError::internal(format!("report serialization: {e}")))?;
    writeln!(out, "{text}")?;
    Ok(())
}

fn write_text<W: Write>(out: &mut W, text: &str) -> Result<(), MigrateError> {
    out.write_all(text.as_bytes())?;
    Ok(())
}

fn parse_args<I>(args: I) -> Result<Command, String>
where
    I: IntoIterator<Item = OsString>,
{
    let mut iter = args.into_iter().map(|arg| arg.to_string_lossy().into_owned());
    let _argv0 = iter.next();

    let Some(subcommand) = iter.next() else {
        return Err(String::from("missing command"));
    };
    let rest: Vec<String> = iter.collect();
    if rest.iter().any(|arg| arg == "-h" || arg == "--help") {
        return Ok(Command::Help);
    }

    match subcommand.as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "migrate" => parse_migrate(rest).map(Command::Migrate),
        "inspect" => parse_inspect(rest),
        "genesis" => parse_genesis(rest),
        other => Err(format!("unknown command `{other}`")),
    }
}

fn parse_migrate(args: Vec<String>) -> Result<MigrateArgs, String> {
    let mut parsed = MigrateArgs::default();
    let mut db = None;
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--db" => db = Some(PathBuf::from(next_value(&mut iter, "--db")?)),
            "--network" => {
                parsed.overrides.network = Some(parse_network(&next_value(&mut iter, "--network")?)?);
            }
            "--config" => parsed.config_file = Some(PathBuf::from(next_value(&mut iter, "--config")?)),
            "--workers" => {
                let value = next_value(&mut iter, "--workers")?;
                parsed.overrides.workers = Some(parse_number(&value, "--workers")?);
            }
            "--seed" => {
                let value = next_value(&mut iter, "--seed")?;
                parsed.overrides.validation_seed = Some(parse_number(&value, "--seed")?);
            }
            "--dry-run" => parsed.overrides.dry_run = Some(true),
            "--skip-validation" => parsed.skip_validation = true,
            "--strict" => parsed.strict = true,
            "--json" => parsed.json = true,
            other if other.starts_with('-') => return Err(format!("unknown option `{other}`")),
            other => return Err(format!("unexpected argument `{other}`")),
        }
    }

    parsed.db = db.ok_or_else(|| String::from("`migrate` requires `--db PATH`"))?;
    Ok(parsed)
}

fn parse_inspect(args: Vec<String>) -> Result<Command, String> {
    let mut db = None;
    let mut address = None;
    let mut json = false;
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--db" => db = Some(PathBuf::from(next_value(&mut iter, "--db")?)),
            "--json" => json = true,
            other if other.starts_with('-') => return Err(format!("unknown option `{other}`")),
            other => {
                if address.is_some() {
                    return Err(String::from("`inspect` takes exactly one ADDRESS_HEX"));
                }
                let bytes = hex::decode(other.trim_start_matches("0x"))
                    .map_err(|e| format!("invalid address `{other}`: {e}"))?;
                address = Some(bytes);
            }
        }
    }

    Ok(Command::Inspect {
        db: db.ok_or_else(|| String::from("`inspect` requires `--db PATH`"))?,
        address: address.ok_or_else(|| String::from("`inspect` requires an ADDRESS_HEX"))?,
        json,
    })
}

fn parse_genesis(args: Vec<String>) -> Result<Command, String> {
    let mut positional = Vec::new();
    for arg in args {
        if arg.starts_with('-') {
            return Err(format!("unknown option `{arg}`"));
        }
        positional.push(PathBuf::from(arg));
    }

    let [input, output]: [PathBuf; 2] = positional
        .try_into()
        .map_err(|_| String::from("`genesis` takes INPUT and OUTPUT paths"))?;
    Ok(Command::Genesis { input, output })
}

fn next_value(iter: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    iter.next()
        .ok_or_else(|| format!("missing value for `{flag}`"))
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T, String> {
    value
        .parse::<T>()
        .map_err(|_| format!("invalid integer for `{flag}`: `{value}`"))
}

fn parse_network(value: &str) -> Result<Network, String> {
    value.parse::<Network>().map_err(|e| e.to_string())
}

fn write_usage<W>(out: &mut W) -> io::Result<()>
where
    W: Write,
{
    writeln!(
        out,
        "Usage:\n\
         \n\
         cimigrate migrate --db PATH [--network mainnet|testnet|devnet] [--config FILE]\n\
         \x20                 [--workers N] [--seed N] [--dry-run] [--skip-validation]\n\
         \x20                 [--strict] [--json]\n\
         cimigrate inspect --db PATH [--json] ADDRESS_HEX\n\
         cimigrate genesis INPUT OUTPUT\n\
         \n\
         Logging goes to stderr; set RUST_LOG to change the level (default info).\n",
    )
}
