//! `deriv` - inspect, validate and upgrade persisted derivative data

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use deriv_core::{AttachmentData, DerivativesConfig, Format};
use serde_json::{json, Value};
use std::io::Read;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let file = || {
        Arg::new("file")
            .required(true)
            .help("Persisted attachment record (JSON), or '-' for stdin")
    };

    Command::new("deriv")
        .version(deriv_core::VERSION)
        .about("Inspect, validate and upgrade persisted derivative data")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .help("YAML configuration file"),
        )
        .subcommand(
            Command::new("inspect")
                .about("List the primary and every derivative with its storage and id")
                .arg(file())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Print the record in the current layout")
                .arg(file()),
        )
        .subcommand(
            Command::new("validate")
                .about("Load the record and report its layout or the load error")
                .arg(file()),
        )
}

fn main() -> ExitCode {
    let matches = cli().get_matches();

    let filter = if matches.get_flag("verbose") {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&matches) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(matches: &ArgMatches) -> Result<ExitCode> {
    let config = load_config(matches.get_one::<String>("config"))?;

    match matches.subcommand() {
        Some(("inspect", args)) => {
            let data = AttachmentData::from_plain(&read_record(file_arg(args)?)?)?;
            let output = if args.get_flag("json") {
                serde_json::to_string_pretty(&inspect_json(&data, &config))?
            } else {
                inspect_text(&data, &config)
            };
            println!("{output}");
            Ok(ExitCode::SUCCESS)
        }
        Some(("upgrade", args)) => {
            let data = AttachmentData::from_plain(&read_record(file_arg(args)?)?)?;
            println!("{}", serde_json::to_string_pretty(&data.to_plain())?);
            Ok(ExitCode::SUCCESS)
        }
        Some(("validate", args)) => {
            let (ok, report) = validate(&read_record(file_arg(args)?)?);
            println!("{report}");
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        _ => bail!("no subcommand given"),
    }
}

fn file_arg(args: &ArgMatches) -> Result<&str> {
    args.get_one::<String>("file")
        .map(String::as_str)
        .context("missing file argument")
}

fn load_config(path: Option<&String>) -> Result<DerivativesConfig> {
    let Some(path) = path else {
        return Ok(DerivativesConfig::default());
    };
    let yaml = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let config = DerivativesConfig::from_yaml_str(&yaml)?;
    debug!(?config, "Loaded configuration");
    Ok(config)
}

fn read_record(file: &str) -> Result<Value> {
    let mut input = String::new();
    if file == "-" {
        std::io::stdin().read_to_string(&mut input)?;
    } else {
        input = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
    }
    if input.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&input).with_context(|| format!("{file} is not JSON"))
}

fn layout(record: &Value) -> &'static str {
    match record.as_object().map(Format::detect) {
        Some(Format::Current) => "current",
        Some(Format::LegacyFlat) => "legacy flat",
        Some(Format::LegacyVersions) => "legacy versions",
        None if record.is_null() => "empty",
        None => "unknown",
    }
}

fn validate(record: &Value) -> (bool, String) {
    let layout = layout(record);
    match AttachmentData::from_plain(record) {
        Ok(data) => {
            let primary = if data.primary.is_some() { "a primary" } else { "no primary" };
            let report = format!(
                "valid: {layout} layout, {primary}, {} derivatives",
                data.derivatives.leaf_count()
            );
            (true, report)
        }
        Err(e) => (false, format!("invalid ({layout} layout): {e}")),
    }
}

fn inspect_text(data: &AttachmentData, config: &DerivativesConfig) -> String {
    let mut lines = Vec::new();
    if let Some(primary) = &data.primary {
        lines.push(format!("(primary)\t{}\t{}", primary.storage(), primary.id()));
    }
    for (path, artifact) in data.derivatives.leaves() {
        let staged = if config.is_cache(artifact.storage()) { "\tstaged" } else { "" };
        lines.push(format!("{path}\t{}\t{}{staged}", artifact.storage(), artifact.id()));
    }
    if lines.is_empty() {
        lines.push("(empty)".to_string());
    }
    lines.join("\n")
}

fn inspect_json(data: &AttachmentData, config: &DerivativesConfig) -> Value {
    let derivatives: Vec<Value> = data
        .derivatives
        .leaves()
        .map(|(path, artifact)| {
            json!({
                "path": path.to_string(),
                "storage": artifact.storage(),
                "id": artifact.id(),
                "staged": config.is_cache(artifact.storage()),
            })
        })
        .collect();
    json!({
        "primary": data.primary.as_ref().map(|p| json!({"storage": p.storage(), "id": p.id()})),
        "derivatives": derivatives,
    })
}
