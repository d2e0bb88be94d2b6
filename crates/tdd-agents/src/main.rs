use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordination::gates::{content_hash, validate_evidence_for_gate, EvidenceBundle, GateType};
use tdd_agents::{CommandTestRunner, HttpGateDispatcher, TddConfig};
use tracing::{info, warn};

const GATE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Inspection tools for the TDD loop's gate evidence.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a flat-map evidence bundle (JSON) and check it against its gate
    ValidateBundle {
        #[arg(long)]
        file: PathBuf,
    },
    /// Print each gate with the evidence types it accepts
    Gates,
    /// Print the SHA-256 content hash of a file, as recorded on evidence items
    Hash {
        #[arg(long)]
        file: PathBuf,
    },
    /// Print the effective configuration (TOML file overlaid with TDD_* env vars)
    /// and check that the test command and gate URL it names are usable
    Config {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::ValidateBundle { file } => validate_bundle(&file),
        Command::Gates => {
            print_gates();
            Ok(())
        }
        Command::Hash { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            println!("{}  {}", content_hash(&raw), file.display());
            Ok(())
        }
        Command::Config { file } => {
            let config = match file {
                Some(path) => TddConfig::load(&path)?,
                None => TddConfig::from_env(),
            };
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to render config")?
            );
            check_collaborators(&config)
        }
    }
}

/// Build the test runner and gate client the configuration names, the same
/// way an embedding orchestrator would, and report what they resolve to.
fn check_collaborators(config: &TddConfig) -> Result<()> {
    let workspace = std::env::current_dir().context("Failed to resolve working directory")?;
    match CommandTestRunner::from_config(config, &workspace)
        .context("Invalid test_command")?
    {
        Some(runner) => println!(
            "# test runner: {} ({}s timeout, in {})",
            runner.program(),
            config.test_timeout_secs,
            workspace.display()
        ),
        None => println!("# test runner: none (test_command unset)"),
    }
    match HttpGateDispatcher::from_config(config, GATE_REQUEST_TIMEOUT)
        .context("Invalid gate_url")?
    {
        Some(gates) => println!("# gate endpoint: {}", gates.endpoint()),
        None => println!("# gate endpoint: none (gate_url unset)"),
    }
    Ok(())
}

fn validate_bundle(file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read bundle file {}", file.display()))?;
    let map: HashMap<String, String> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a flat string map", file.display()))?;
    let bundle = EvidenceBundle::from_map(&map).context("Failed to decode evidence bundle")?;

    let age = chrono::Utc::now().signed_duration_since(bundle.created_at);
    println!("bundle:   {}", bundle.bundle_id);
    println!("task:     {}", bundle.task_id);
    println!("gate:     {}", bundle.gate_type);
    println!("git sha:  {}", bundle.git_sha);
    println!("created:  {} ({}m ago)", bundle.created_at.to_rfc3339(), age.num_minutes());
    println!("items:    {}", bundle.item_types().join(", "));

    match validate_evidence_for_gate(&bundle) {
        Ok(()) => {
            info!(bundle_id = %bundle.bundle_id, gate = %bundle.gate_type, "Bundle covers its gate");
            println!("status:   OK");
            Ok(())
        }
        Err(e) => {
            warn!(bundle_id = %bundle.bundle_id, error = %e, "Bundle rejected");
            Err(e).context("Evidence validation failed")
        }
    }
}

fn print_gates() {
    for gate in GateType::ALL {
        println!("{:<11} {}", gate.as_str(), gate.accepted_evidence().join(" | "));
    }
}
