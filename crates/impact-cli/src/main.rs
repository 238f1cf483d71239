use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use impact_core::codec::parse_number;
use impact_core::{
    lattice_lines, parse_impact_input, validate_lattice, CodecError, DigestError, InputError,
    Validation,
};
use impact_runner::{load_run_config, ConfigError, ImpactRun, RunConfig, RunError, RunOutcome};

#[derive(Parser)]
#[command(name = "impact", version, about = "Impact-T run manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure, execute and ingest one run.
    Run {
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        bin: Option<String>,
        #[arg(long)]
        mpi: bool,
        #[arg(long)]
        timeout_seconds: Option<f64>,
        #[arg(long)]
        workdir: Option<PathBuf>,
        #[arg(long)]
        path: Option<PathBuf>,
        /// Keep the workspace after the run.
        #[arg(long)]
        keep: bool,
        #[arg(long)]
        archive: Option<PathBuf>,
        #[arg(long = "set")]
        set_values: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Summarize an input file.
    Describe {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the encoded lattice lines.
    Lines { input: PathBuf },
    /// Re-encode every element and compare with its original line.
    Validate {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the input fingerprint.
    Fingerprint {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let json_command = json_command_name(&cli.command);
    match run_command(cli.command) {
        Ok(Some(report)) => {
            print_report(&report);
            if report.get("ok") == Some(&Value::Bool(false)) {
                std::process::exit(1);
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => match json_command {
            Some(command) => {
                print_report(&failure_report(command, &err));
                std::process::exit(1);
            }
            None => Err(err),
        },
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            input,
            config,
            bin,
            mpi,
            timeout_seconds,
            workdir,
            path,
            keep,
            archive,
            set_values,
            json,
        } => {
            let mut cfg = match config {
                Some(p) => load_run_config(&p)?,
                None => RunConfig::default(),
            };
            if let Some(bin) = bin {
                cfg.impact_bin = bin;
            }
            if mpi {
                cfg.use_mpi = true;
            }
            if timeout_seconds.is_some() {
                cfg.timeout_seconds = timeout_seconds;
            }
            if workdir.is_some() {
                cfg.workdir = workdir;
            }
            if path.is_some() {
                cfg.path = path;
            }
            if keep {
                cfg.auto_cleanup = false;
            }
            let overrides = parse_overrides(&set_values)?;

            let mut run = ImpactRun::new(cfg);
            run.load_input(&input)?;
            for (key, value) in &overrides {
                run.set_property(key, *value)?;
                info!(property = %key, value = *value, "override applied");
            }
            let warnings: Vec<String> = run.configure()?.iter().map(|w| w.to_string()).collect();
            let outcome = run.run();
            if outcome == RunOutcome::NotConfigured {
                bail!("run not configured: {}", warnings.join("; "));
            }
            let fingerprint = run.fingerprint()?;
            let archived = match &archive {
                Some(p) => Some(run.archive(p)?),
                None => None,
            };
            let kept = if keep {
                run.path().map(|p| p.display().to_string())
            } else {
                None
            };

            if json {
                let (ok, why) = match &outcome {
                    RunOutcome::Failed(why) => (false, Some(why.clone())),
                    _ => (true, None),
                };
                return Ok(Some(json!({
                    "ok": ok,
                    "command": "run",
                    "state": run.state().to_string(),
                    "fingerprint": fingerprint,
                    "run_info": run.run_info(),
                    "why_run_error": why,
                    "warnings": warnings,
                    "workspace": kept,
                    "archive": archive.map(|p| p.display().to_string()),
                    "archive_entries": archived,
                    "stats_columns": run.output.stats.keys().collect::<Vec<_>>(),
                    "particle_groups": run.particles.keys().collect::<Vec<_>>(),
                })));
            }
            println!("{}", run);
            println!("fingerprint: {}", fingerprint);
            if let Some(info) = run.run_info() {
                println!("run time: {:.3} s", info.run_time);
            }
            if let Some(p) = &archive {
                println!("archive: {}", p.display());
            }
            if let Some(p) = kept {
                println!("workspace kept: {}", p);
            }
            if let RunOutcome::Failed(why) = outcome {
                bail!("run failed: {}", why);
            }
        }
        Commands::Describe { input, json } => {
            let parsed = parse_impact_input(&input)?;
            let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
            for element in parsed.lattice.iter().filter(|e| !e.is_comment()) {
                *by_type.entry(element.element_type().to_string()).or_default() += 1;
            }
            let fingerprint = impact_core::fingerprint(&parsed)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "input": input.display().to_string(),
                    "header": parsed.header,
                    "elements": by_type.values().sum::<usize>(),
                    "element_types": by_type,
                    "fieldmaps": parsed.fieldmaps.keys().collect::<Vec<_>>(),
                    "input_particle_file": parsed.input_particle_file.as_ref().map(|p| p.display().to_string()),
                    "fingerprint": fingerprint,
                })));
            }
            print!("{}", parsed.header);
            for element in &parsed.lattice {
                let line = element.to_string();
                if !line.is_empty() {
                    println!("{}", line);
                }
            }
            for (name, count) in &by_type {
                println!("{}: {}", name, count);
            }
            println!("fingerprint: {}", fingerprint);
        }
        Commands::Lines { input } => {
            let parsed = parse_impact_input(&input)?;
            for line in lattice_lines(&parsed.lattice)? {
                println!("{}", line);
            }
        }
        Commands::Validate { input, json } => {
            let parsed = parse_impact_input(&input)?;
            let failures = validate_lattice(&parsed.lattice)?;
            let checked = parsed.lattice.iter().filter(|e| !e.is_comment()).count();
            if json {
                return Ok(Some(json!({
                    "ok": failures.is_empty(),
                    "command": "validate",
                    "checked": checked,
                    "failures": failures.iter().map(failure_to_json).collect::<Vec<_>>(),
                })));
            }
            for (name, result) in &failures {
                if let Validation::Mismatch { encoded, original } = result {
                    println!("{}:\n  encoded:  {:?}\n  original: {:?}", name, encoded, original);
                }
            }
            if !failures.is_empty() {
                bail!(
                    "{} of {} elements failed validation",
                    failures.len(),
                    checked
                );
            }
            println!("ok: {} elements validated", checked);
        }
        Commands::Fingerprint { input, json } => {
            let parsed = parse_impact_input(&input)?;
            let fingerprint = impact_core::fingerprint(&parsed)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "fingerprint",
                    "fingerprint": fingerprint,
                })));
            }
            println!("{}", fingerprint);
        }
    }
    Ok(None)
}

fn failure_to_json((name, result): &(String, Validation)) -> Value {
    match result {
        Validation::Mismatch { encoded, original } => json!({
            "element": name,
            "encoded": encoded,
            "original": original,
        }),
        other => json!({ "element": name, "result": format!("{:?}", other) }),
    }
}

fn print_report(report: &Value) {
    match serde_json::to_string(report) {
        Ok(line) => println!("{}", line),
        Err(e) => error!(error = %e, "could not encode report"),
    }
}

/// Classifies a command failure by the layer that raised it.
fn failure_kind(err: &anyhow::Error) -> &'static str {
    if let Some(run_err) = err.downcast_ref::<RunError>() {
        return match run_err {
            RunError::Config(_) => "config",
            RunError::Input(_) => "input",
            RunError::Property(_) => "property",
            RunError::Process(_) | RunError::MissingExecutable | RunError::ExecutableNotFound(_) => {
                "executable"
            }
            _ => "run",
        };
    }
    if err.is::<ConfigError>() {
        "config"
    } else if err.is::<InputError>() || err.is::<CodecError>() {
        "input"
    } else if err.is::<DigestError>() {
        "fingerprint"
    } else {
        "usage"
    }
}

fn failure_report(command: &str, err: &anyhow::Error) -> Value {
    json!({
        "ok": false,
        "command": command,
        "failure": {
            "kind": failure_kind(err),
            "message": err.to_string(),
            "causes": err.chain().skip(1).map(|c| c.to_string()).collect::<Vec<_>>(),
        }
    })
}

/// Name of the command when it reports in JSON.
fn json_command_name(command: &Commands) -> Option<&'static str> {
    match command {
        Commands::Run { json: true, .. } => Some("run"),
        Commands::Describe { json: true, .. } => Some("describe"),
        Commands::Validate { json: true, .. } => Some("validate"),
        Commands::Fingerprint { json: true, .. } => Some("fingerprint"),
        _ => None,
    }
}

/// Parses `--set <target>:<key>=<number>` overrides, e.g. `header:Np=1e4`
/// or `SOL1:solenoid_field_scale=0.2`. Numbers may use Fortran `D`
/// exponents.
fn parse_overrides(values: &[String]) -> Result<Vec<(String, f64)>> {
    values
        .iter()
        .map(|raw| {
            let (property, number) = raw
                .rsplit_once('=')
                .ok_or_else(|| anyhow!("--set {}: missing '=<number>'", raw))?;
            let property = property.trim();
            if property.is_empty() {
                bail!("--set {}: no property before '='", raw);
            }
            let value = parse_number(number.trim())
                .ok_or_else(|| anyhow!("--set {}: '{}' is not a number", raw, number.trim()))?;
            Ok((property.to_string(), value))
        })
        .collect()
}
