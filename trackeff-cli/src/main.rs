//! trackeff command-line interface.
//!
//! Evaluates candidate-track efficiency and purity from JSON-lines ntuples,
//! either for a single selection or for a batch described by a config file.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Args, Parser, Subcommand, ValueEnum};

use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use trackeff_algorithms::{
    candidate_multiplicity, AggregatorConfig, DedupConfig, EfficiencyPurityAggregator,
    ProvenancePolicy, Selections,
};
use trackeff_core::{EventSchema, Selection, TrackField};
use trackeff_io::{
    format_report, read_table, run_analysis, AnalysisConfig, ReportEntry, ReportFormatter,
    ReportWriter, TableSummary,
};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    TrackeffIo(#[from] trackeff_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] trackeff_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Provenance policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Provenance {
    /// The first accepted track sets the baseline for the whole file
    Latched,
    /// Each (experiment, run) window sets its own source baseline
    PerWindow,
    /// Source tags are not compared
    Ignore,
}

impl From<Provenance> for ProvenancePolicy {
    fn from(value: Provenance) -> Self {
        match value {
            Provenance::PerWindow => Self::PerWindow,
            Provenance::Latched => Self::Latched,
            Provenance::Ignore => Self::Ignore,
        }
    }
}

/// Candidate-track efficiency and purity evaluation.
#[derive(Parser)]
#[command(name = "trackeff")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Worker threads for parallel counting (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

/// Event key field names.
#[derive(Args, Debug, Clone)]
struct SchemaArgs {
    /// Experiment number field
    #[arg(long, default_value = "__experiment__")]
    experiment_field: String,

    /// Run number field
    #[arg(long, default_value = "__run__")]
    run_field: String,

    /// Event number field
    #[arg(long, default_value = "__event__")]
    event_field: String,
}

impl SchemaArgs {
    fn schema(&self) -> EventSchema {
        EventSchema::new()
            .with_experiment(&self.experiment_field)
            .with_run(&self.run_field)
            .with_event(&self.event_field)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one selection on a candidate/truth sample pair
    Evaluate {
        /// Candidate JSON-lines file
        candidates: PathBuf,

        /// Truth (MC) JSON-lines file
        truth: PathBuf,

        /// Cut applied to every candidate
        #[arg(long, default_value = "")]
        common: String,

        /// Best-candidate cut
        #[arg(long, default_value = "")]
        rank: String,

        /// Truth-matching cut
        #[arg(long)]
        signal: String,

        /// Count distinct tracks of this particle prefix instead of rows
        #[arg(long, conflicts_with = "index_field")]
        track: Option<String>,

        /// Track index field, for non-standard naming
        #[arg(long, requires = "source_field")]
        index_field: Option<String>,

        /// Track source field, for non-standard naming
        #[arg(long, requires = "index_field")]
        source_field: Option<String>,

        /// How track provenance is checked
        #[arg(long, value_enum, default_value = "latched")]
        provenance: Provenance,

        /// Accept candidate files whose (experiment, run) decreases
        #[arg(long)]
        no_ordering_check: bool,

        /// Count on the rayon pool
        #[arg(long)]
        parallel: bool,

        /// Also write the result as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        #[command(flatten)]
        schema: SchemaArgs,
    },

    /// Run every particle of a config file on every channel
    Run {
        /// Analysis configuration (JSON)
        config: PathBuf,

        /// Force parallel counting
        #[arg(long)]
        parallel: bool,

        /// Write one CSV row per channel and particle
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Write per-bin efficiencies as CSV
        #[arg(long)]
        binned_csv: Option<PathBuf>,

        /// Write the full report as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Do not print the tables
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show information about a JSON-lines sample
    Info {
        /// Input file
        input: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        schema: SchemaArgs,
    },

    /// Count signal and background candidates per event
    Multiplicity {
        /// Candidate JSON-lines file
        candidates: PathBuf,

        /// Truth-matching cut
        #[arg(long)]
        signal: String,

        /// Cut applied before counting
        #[arg(long, default_value = "")]
        cut: String,

        #[command(flatten)]
        schema: SchemaArgs,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn track_field(
    track: Option<&str>,
    index_field: Option<String>,
    source_field: Option<String>,
) -> Option<TrackField> {
    match (index_field, source_field) {
        (Some(index), Some(source)) => Some(TrackField::new(index, source)),
        _ => track.map(TrackField::for_particle),
    }
}

fn write_entries(path: &Path, entries: &[ReportEntry], format: Format) -> Result<()> {
    let mut writer = ReportWriter::create(path)?;
    match format {
        Format::Csv => writer.write_csv(entries)?,
        Format::BinnedCsv => writer.write_binned_csv(entries)?,
        Format::Json => writer.write_json(entries)?,
    }
    log::info!("wrote {}", path.display());
    Ok(())
}

#[derive(Clone, Copy)]
enum Format {
    Csv,
    BinnedCsv,
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    match cli.command {
        Commands::Evaluate {
            candidates,
            truth,
            common,
            rank,
            signal,
            track,
            index_field,
            source_field,
            provenance,
            no_ordering_check,
            parallel,
            json,
            schema,
        } => {
            let selections = Selections::parse(&common, &rank, &signal)?;
            let mut config = AggregatorConfig::new()
                .with_schema(schema.schema())
                .with_dedup(
                    DedupConfig::new()
                        .with_provenance(provenance.into())
                        .with_check_ordering(!no_ordering_check),
                )
                .with_parallel(parallel);
            let track = track_field(track.as_deref(), index_field, source_field);
            if let Some(track) = &track {
                config = config.with_track_field(track.clone());
            }

            let start = Instant::now();
            let candidate_table = read_table(&candidates)?;
            let truth_table = read_table(&truth)?;
            let result = EfficiencyPurityAggregator::new(config).evaluate(
                &candidate_table,
                &truth_table,
                &selections,
            )?;
            log::info!("evaluated in {:.2?}", start.elapsed());

            print!("{}", ReportFormatter::new().format(&result));

            if let Some(path) = json {
                let particle = track.map_or_else(|| "candidate".to_string(), |t| t.index);
                let channel = candidates
                    .file_stem()
                    .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
                let entry = ReportEntry::new(channel, particle, result, Vec::new());
                write_entries(&path, &[entry], Format::Json)?;
            }
        }

        Commands::Run {
            config,
            parallel,
            csv,
            binned_csv,
            json,
            quiet,
        } => {
            let mut analysis = AnalysisConfig::load(&config)?;
            analysis.parallel |= parallel;

            let start = Instant::now();
            let entries = run_analysis(&analysis)?;
            log::info!(
                "evaluated {} entries in {:.2?}",
                entries.len(),
                start.elapsed()
            );

            if !quiet {
                print!("{}", format_report(&entries));
            }
            if let Some(path) = csv {
                write_entries(&path, &entries, Format::Csv)?;
            }
            if let Some(path) = binned_csv {
                write_entries(&path, &entries, Format::BinnedCsv)?;
            }
            if let Some(path) = json {
                write_entries(&path, &entries, Format::Json)?;
            }
        }

        Commands::Info {
            input,
            json,
            schema,
        } => {
            let table = read_table(&input)?;
            let summary = TableSummary::of(&table, &schema.schema());

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            println!("File: {}", input.display());
            println!("Records: {}", summary.rows);
            println!("Columns: {}", summary.columns.len());
            for name in &summary.columns {
                println!("  {}", name);
            }
            println!("Events: {}", summary.events);
            if summary.rows_without_key > 0 {
                println!("Records without event key: {}", summary.rows_without_key);
            }
            if let Some((lo, hi)) = summary.experiments {
                println!("Experiment range: {} - {}", lo, hi);
            }
            if let Some((lo, hi)) = summary.runs {
                println!("Run range: {} - {}", lo, hi);
            }
            println!("Windows: {}", summary.windows);
            println!(
                "Ordered by (experiment, run): {}",
                if summary.ordered { "yes" } else { "no" }
            );
        }

        Commands::Multiplicity {
            candidates,
            signal,
            cut,
            schema,
        } => {
            let table = read_table(&candidates)?;
            let summary = candidate_multiplicity(
                &table,
                &schema.schema(),
                &Selection::parse(&cut)?,
                &Selection::parse(&signal)?,
            )?;

            println!("Events with candidates: {}", summary.events);
            println!("Signal candidates: {}", summary.signal_candidates);
            println!("Background candidates: {}", summary.background_candidates);
            if summary.events > 0 {
                println!(
                    "Multi-candidate events: {} ({:.2}%)",
                    summary.multi_candidate_events(),
                    100.0 * summary.multi_candidate_events() as f64 / summary.events as f64
                );
            }
            println!();
            println!("{:>8} {:>8} {:>10}", "nSig", "nBkg", "events");
            println!("{:-<28}", "");
            for ((sig, bkg), events) in &summary.tally {
                println!("{:>8} {:>8} {:>10}", sig, bkg, events);
            }
        }
    }

    Ok(())
}
