// ABOUTME: Entry point for the idrestore binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and drives snapshot listing, restore, and credential persistence.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use idrestore_core::IdentifierSet;
use idrestore_engine::{OverallStatus, Proceed, RestoreConfig, RestoreReport, Restorer};
use idrestore_store::itemdb::DEFAULT_AUTH_TYPE;
use idrestore_store::{
    CredentialRecord, ItemDatabase, SettingsStore, Snapshot, SnapshotError, list_snapshots,
};

const EXIT_PARTIAL_FAILURE: u8 = 1;
const EXIT_ABORTED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "idrestore", version, about = "Restore device and machine identifiers from a snapshot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List snapshots, newest first
    List,

    /// Print a snapshot's identifiers, masked
    Show {
        path: PathBuf,
    },

    /// Restore identifiers from a snapshot into every store
    Restore {
        /// Snapshot file to restore (default: the newest one)
        #[arg(long, value_name = "PATH")]
        snapshot: Option<PathBuf>,

        /// Apply the restore. Without it only the plan is printed.
        #[arg(long)]
        yes: bool,

        /// Print the step ledger as JSON
        #[arg(long)]
        json: bool,
    },

    /// Store a credential record in the application database
    Credential {
        #[arg(long)]
        token: String,

        #[arg(long)]
        email: String,

        #[arg(long, default_value = DEFAULT_AUTH_TYPE)]
        auth_type: String,
    },
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("idrestore=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_ABORTED)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = RestoreConfig::from_env()?;
    tracing::debug!("using settings file {}", config.settings_path.display());

    match cli.command {
        Command::List => list(&config),
        Command::Show { path } => {
            let snapshot = open_snapshot(&path)?;
            print_identifiers(&snapshot.identifiers);
            Ok(ExitCode::SUCCESS)
        }
        Command::Restore {
            snapshot,
            yes,
            json,
        } => restore(&config, snapshot.as_deref(), yes, json),
        Command::Credential {
            token,
            email,
            auth_type,
        } => {
            let record = CredentialRecord::new(token, email).with_auth_type(auth_type);
            let rows = ItemDatabase::new(&config.database_path)
                .persist_credential(&record)
                .map_err(|e| anyhow!("{e} ({})", e.kind().remediation()))?;
            println!(
                "stored credential for {} ({rows} rows) in {}",
                record.email,
                config.database_path.display()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn list(config: &RestoreConfig) -> Result<ExitCode> {
    let prefix = SettingsStore::new(&config.settings_path).file_name();
    let snapshots = match list_snapshots(&config.snapshot_dir, &prefix) {
        Ok(snapshots) => snapshots,
        Err(SnapshotError::NoSnapshots { .. }) => {
            println!("no snapshots of {prefix} in {}", config.snapshot_dir.display());
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(e).context("listing snapshots"),
    };

    for info in &snapshots {
        println!(
            "{}  {}  {} bytes",
            info.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            info.path.display(),
            info.size_bytes
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn restore(config: &RestoreConfig, chosen: Option<&Path>, yes: bool, json: bool) -> Result<ExitCode> {
    let snapshot = match chosen {
        Some(path) => open_snapshot(path)?,
        None => {
            let prefix = SettingsStore::new(&config.settings_path).file_name();
            let newest = list_snapshots(&config.snapshot_dir, &prefix)
                .context("selecting the newest snapshot")?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("no snapshots in {}", config.snapshot_dir.display()))?;
            Snapshot::load(newest).context("loading the newest snapshot")?
        }
    };

    println!(
        "snapshot {} (captured {})",
        snapshot.info.path.display(),
        snapshot.info.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    print_identifiers(&snapshot.identifiers);

    if !yes {
        println!("dry run: nothing changed. Re-run with --yes to restore.");
        return Ok(ExitCode::SUCCESS);
    }

    let mut restorer = Restorer::from_config(config);
    let report = match restorer.restore(&snapshot, Proceed::confirmed()) {
        Ok(report) => report,
        Err(abort) => {
            eprintln!("aborted at {}: {abort}", abort.stage());
            eprintln!("hint: {}", abort.kind().remediation());
            return Ok(ExitCode::from(EXIT_ABORTED));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(match report.status {
        OverallStatus::Success => ExitCode::SUCCESS,
        OverallStatus::PartialFailure { .. } => ExitCode::from(EXIT_PARTIAL_FAILURE),
    })
}

fn open_snapshot(path: &Path) -> Result<Snapshot> {
    Snapshot::open(path).map_err(|e| {
        anyhow!(
            "{} {}: {e} ({})",
            e.kind(),
            path.display(),
            e.kind().remediation()
        )
    })
}

fn print_identifiers(ids: &IdentifierSet) {
    for (key, masked) in ids.masked() {
        println!("  {key:<20} {masked}");
    }
}

fn print_report(report: &RestoreReport) {
    println!("backup written to {}", report.backup.display());
    for step in &report.steps {
        println!("  {step}");
    }
    match &report.status {
        OverallStatus::Success => println!("restore succeeded"),
        OverallStatus::PartialFailure { failed } => {
            let names: Vec<&str> = failed.iter().map(|s| s.name()).collect();
            println!("restore partially failed: {}", names.join(", "));
        }
    }
}
