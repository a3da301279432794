use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueHint};
use mcc_compare::data::derive::DerivedParams;
use mcc_compare::data::segment::{MeasureKind, PlaneSet};
use mcc_compare::{EngineConfig, Overrides, Parameter, Session};

#[derive(Parser, Debug)]
#[command(author, version, about = "Compare MCC dosimetry scans", long_about = None)]
struct Cli {
    /// Engine configuration JSON (detector table, palettes, FOV policy)
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the derived parameter table of each file as CSV
    Table(TableArgs),
    /// Print grouped curve descriptors as JSON
    Curves(CurvesArgs),
}

#[derive(Parser, Debug)]
struct TableArgs {
    /// MCC files to read
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
struct CurvesArgs {
    /// MCC files to read, in legend order
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Parameter that selects colour and legend entry
    #[arg(long, default_value = "file_label")]
    variable: Parameter,

    /// Parameter that selects the marker shape
    #[arg(long)]
    secondary: Option<Parameter>,

    /// Measurement drawn from every file: pdd or profile
    #[arg(long, default_value = "pdd")]
    measure: MeasureKind,

    /// Leave inplane profiles out
    #[arg(long)]
    no_inplane: bool,

    /// Leave crossplane profiles out
    #[arg(long)]
    no_crossplane: bool,

    /// JSON object mapping file names to overrides
    #[arg(long, value_hint = ValueHint::FilePath)]
    overrides: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            EngineConfig::from_json(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    let mut session = Session::new(config);

    match cli.command {
        Command::Table(args) => {
            load_files(&mut session, &args.inputs);
            write_table(&session, io::stdout().lock())
        }
        Command::Curves(args) => {
            load_files(&mut session, &args.inputs);
            if let Some(path) = &args.overrides {
                apply_override_file(&mut session, path)?;
            }
            session.set_variable(args.variable);
            session.set_secondary(args.secondary);
            session.set_measure(args.measure);
            session.set_planes(PlaneSet {
                inplane: !args.no_inplane,
                crossplane: !args.no_crossplane,
            });

            for warning in session.file_warnings() {
                log::warn!("{warning}");
            }
            let output = session.curves();
            for warning in &output.warnings {
                log::warn!("{warning}");
            }
            let stdout = io::stdout().lock();
            let written = if args.pretty {
                serde_json::to_writer_pretty(stdout, &output)
            } else {
                serde_json::to_writer(stdout, &output)
            };
            written.context("writing curve JSON")?;
            Ok(())
        }
    }
}

/// Read every path and hand the bytes to the session. Unreadable or
/// unparseable files are reported and skipped.
fn load_files(session: &mut Session, paths: &[PathBuf]) {
    let mut inputs = Vec::with_capacity(paths.len());
    for path in paths {
        match fs::read(path).with_context(|| format!("reading {}", path.display())) {
            Ok(bytes) => inputs.push((path.clone(), bytes)),
            Err(e) => log::error!("{e:#}"),
        }
    }
    let report = session.load_batch(inputs);
    for (path, error) in &report.failed {
        eprintln!("skipped {}: {error}", path.display());
    }
}

fn apply_override_file(session: &mut Session, path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading overrides {}", path.display()))?;
    let mut by_name: BTreeMap<String, Overrides> = serde_json::from_str(&text)
        .with_context(|| format!("parsing overrides {}", path.display()))?;

    for index in 0..session.files().len() {
        let record = &session.files()[index].record;
        let full = record.path.display().to_string();
        let name = record.file_name();
        let found = by_name.remove(&full).or_else(|| by_name.remove(&name));
        if let (Some(overrides), Some(slot)) = (found, session.overrides_mut(index)) {
            *slot = overrides;
        }
    }
    for unused in by_name.keys() {
        log::warn!("overrides for '{unused}' match no loaded file");
    }
    Ok(())
}

fn write_table<W: Write>(session: &Session, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    let mut header = vec!["File"];
    header.extend(DerivedParams::COLUMNS);
    header.push("Warnings");
    writer.write_record(&header)?;

    for file in session.files() {
        let record = &file.record;
        let mut row = vec![record.label(&file.overrides).into_owned()];
        row.extend(record.derived.row());
        row.push(
            record
                .warnings
                .iter()
                .map(|w| w.to_string())
                .collect::<Vec<_>>()
                .join(" | "),
        );
        writer.write_record(&row)?;
    }
    writer.flush().context("writing table")?;
    Ok(())
}
