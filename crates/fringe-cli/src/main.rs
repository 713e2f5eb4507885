use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, Local};
use clap::{Parser, Subcommand, ValueEnum};
use fringe_core::{MergeMode, ScrapeBatch};
use fringe_engine::{
    cleaned_to_rows, compare, merge, summary_to_rows, Converter, Snapshot, CLEANED_COLUMNS,
    SUMMARY_COLUMNS,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fringe-cli")]
#[command(about = "Fringe listings tracker command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Merge a scraped batch into the canonical dataset
    Merge {
        /// Performances CSV exported by the scrape
        #[arg(long)]
        performances: PathBuf,
        /// Show detail CSV from the same scrape
        #[arg(long)]
        shows: Option<PathBuf>,
        /// Venue detail CSV from the same scrape
        #[arg(long)]
        venues: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = ModeArg::Recent)]
        mode: ModeArg,
        /// Genre the scrape covered; repeatable. Defaults to the genres
        /// present in the batch itself.
        #[arg(long = "genre")]
        genres: Vec<String>,
        /// Also write a date-stamped snapshot of the merged performances
        #[arg(long)]
        snapshot: bool,
    },
    /// Compare two snapshots and report the differences
    Compare {
        /// Older snapshot CSV; defaults to the latest one on disk
        #[arg(long)]
        previous: Option<PathBuf>,
        /// Newer snapshot CSV
        #[arg(long)]
        current: PathBuf,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
        /// Write the report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Convert a raw performances CSV into spreadsheet-friendly files
    Convert {
        input: PathBuf,
        /// Base name for output files; defaults to the input file stem
        #[arg(long)]
        base_name: Option<String>,
        /// Which outputs to produce; defaults to all three
        #[arg(long = "formats", value_enum, value_delimiter = ',')]
        formats: Vec<ConvertFormat>,
    },
    /// Print the effective configuration and dataset counts
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Recent,
    Full,
}

impl From<ModeArg> for MergeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Recent => MergeMode::Recent,
            ModeArg::Full => MergeMode::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Text,
    Html,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConvertFormat {
    Cleaned,
    Summary,
    Wide,
}

/// Runtime paths and defaults, overridable per environment.
#[derive(Debug, Clone)]
struct Config {
    data_dir: PathBuf,
    snapshot_dir: PathBuf,
    output_dir: PathBuf,
    default_year: i32,
}

impl Config {
    fn from_env() -> Self {
        let data_dir = env_path("FRINGE_DATA_DIR", "data/current");
        let snapshot_dir = env_path("FRINGE_SNAPSHOT_DIR", "data/snapshots");
        let output_dir = env_path("FRINGE_OUTPUT_DIR", "data/exports");
        let default_year = env::var("FRINGE_DEFAULT_YEAR")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_else(|| Local::now().year());
        Self {
            data_dir,
            snapshot_dir,
            output_dir,
            default_year,
        }
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Merge {
            performances,
            shows,
            venues,
            mode,
            genres,
            snapshot,
        } => run_merge(&config, &performances, shows.as_deref(), venues.as_deref(), mode, genres, snapshot),
        Commands::Compare {
            previous,
            current,
            format,
            output,
        } => run_compare(&config, previous.as_deref(), &current, format, output.as_deref()),
        Commands::Convert {
            input,
            base_name,
            formats,
        } => run_convert(&config, &input, base_name, &formats),
        Commands::Info => run_info(&config),
    }
}

fn run_merge(
    config: &Config,
    performances_path: &Path,
    shows_path: Option<&Path>,
    venues_path: Option<&Path>,
    mode: ModeArg,
    genres: Vec<String>,
    snapshot: bool,
) -> Result<()> {
    let (canonical, load_report) = fringe_store::load_dataset(&config.data_dir)?;
    if load_report.total_dropped() > 0 {
        warn!(
            dropped = load_report.total_dropped(),
            "canonical dataset contained unreadable rows"
        );
    }

    let (batch_performances, dropped) = fringe_store::load_performances(performances_path)?;
    if dropped > 0 {
        warn!(dropped, path = %performances_path.display(), "skipped unreadable batch rows");
    }
    let batch_shows = match shows_path {
        Some(path) => fringe_store::load_show_info(path)?.0,
        None => Vec::new(),
    };
    let batch_venues = match venues_path {
        Some(path) => fringe_store::load_venues(path)?.0,
        None => Vec::new(),
    };

    let genres = if genres.is_empty() {
        batch_performances
            .iter()
            .filter_map(|perf| perf.genre.clone())
            .collect()
    } else {
        genres.into_iter().collect()
    };

    let batch = ScrapeBatch {
        performances: batch_performances,
        shows: batch_shows,
        venues: batch_venues,
        genres,
    };

    let outcome = merge(canonical, batch, mode.into());
    fringe_store::save_dataset(&outcome.dataset, &config.data_dir)?;

    if snapshot {
        let today = Local::now().date_naive();
        let path = fringe_store::save_snapshot(
            outcome.dataset.performances.values(),
            &config.snapshot_dir,
            today,
        )?;
        info!(path = %path.display(), "snapshot written");
    }

    let stats = &outcome.stats;
    println!(
        "merge complete: run_id={} mode={:?} inserted={} updated={} discarded={} dropped={} venues_added={}",
        stats.run_id,
        stats.mode,
        stats.performances_inserted,
        stats.performances_updated,
        stats.performances_discarded,
        stats.dropped_invalid,
        stats.venues_added,
    );
    Ok(())
}

fn run_compare(
    config: &Config,
    previous_path: Option<&Path>,
    current_path: &Path,
    format: FormatArg,
    output: Option<&Path>,
) -> Result<()> {
    let previous_path = match previous_path {
        Some(path) => path.to_path_buf(),
        None => {
            fringe_store::require_latest_snapshot(
                &config.snapshot_dir,
                snapshot_date_of(current_path).as_deref(),
            )?
        }
    };
    info!(
        previous = %previous_path.display(),
        current = %current_path.display(),
        "comparing snapshots"
    );

    let previous = load_snapshot(&previous_path)?;
    let current = load_snapshot(current_path)?;
    let diff = compare(&previous, &current);

    let rendered = match format {
        FormatArg::Text => fringe_report::render_text(&diff),
        FormatArg::Html => fringe_report::render_html(&diff),
        FormatArg::Json => fringe_report::render_json(&diff)?,
    };

    match output {
        Some(path) => {
            fs::write(path, &rendered)
                .with_context(|| format!("writing report to {}", path.display()))?;
            println!(
                "report written: {} ({} changes)",
                path.display(),
                diff.total_changes()
            );
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let (rows, dropped) = fringe_store::load_performances(path)?;
    if dropped > 0 {
        warn!(dropped, path = %path.display(), "skipped unreadable snapshot rows");
    }
    let label = Snapshot::label_from_rows(&rows)
        .or_else(|| snapshot_date_of(path))
        .unwrap_or_else(|| "Unknown".to_string());
    Ok(Snapshot::from_performances(label, rows))
}

/// The date prefix of a `YYYY-MM-DD-snapshot.csv` file name, if present.
fn snapshot_date_of(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let date = stem.strip_suffix("-snapshot").unwrap_or(stem);
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .map(|_| date.to_string())
}

fn run_convert(
    config: &Config,
    input: &Path,
    base_name: Option<String>,
    formats: &[ConvertFormat],
) -> Result<()> {
    let formats: Vec<ConvertFormat> = if formats.is_empty() {
        vec![ConvertFormat::Cleaned, ConvertFormat::Summary, ConvertFormat::Wide]
    } else {
        formats.to_vec()
    };
    let base = match base_name {
        Some(name) => name,
        None => input
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_string)
            .with_context(|| format!("no usable file stem in {}", input.display()))?,
    };

    let (rows, dropped) = fringe_store::load_performances(input)?;
    if dropped > 0 {
        warn!(dropped, path = %input.display(), "skipped unreadable rows");
    }

    let converter = Converter::new(config.default_year);
    let cleaned = converter.clean(&rows);
    info!(input = rows.len(), cleaned = cleaned.len(), "cleaned input rows");

    for format in formats {
        let path = match format {
            ConvertFormat::Cleaned => {
                let path = config.output_dir.join(format!("Cleaned-{base}.csv"));
                let header: Vec<String> = CLEANED_COLUMNS.iter().map(|c| c.to_string()).collect();
                fringe_store::write_rows(&path, &header, &cleaned_to_rows(&cleaned))?;
                path
            }
            ConvertFormat::Summary => {
                let path = config.output_dir.join(format!("Summary-{base}.csv"));
                let header: Vec<String> = SUMMARY_COLUMNS.iter().map(|c| c.to_string()).collect();
                let summaries = converter.summary(&cleaned);
                fringe_store::write_rows(&path, &header, &summary_to_rows(&summaries))?;
                path
            }
            ConvertFormat::Wide => {
                let path = config.output_dir.join(format!("WideFormat-{base}.csv"));
                let table = converter.wide(&cleaned);
                fringe_store::write_rows(&path, &table.header, &table.rows)?;
                path
            }
        };
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn run_info(config: &Config) -> Result<()> {
    println!("data dir:      {}", config.data_dir.display());
    println!("snapshot dir:  {}", config.snapshot_dir.display());
    println!("output dir:    {}", config.output_dir.display());
    println!("default year:  {}", config.default_year);

    let (dataset, report) = fringe_store::load_dataset(&config.data_dir)?;
    println!("performances:  {}", dataset.performances.len());
    println!("shows:         {}", dataset.shows.len());
    println!("venues:        {}", dataset.venues.len());
    if report.total_dropped() > 0 {
        println!("unreadable:    {}", report.total_dropped());
    }

    match fringe_store::find_latest_snapshot(&config.snapshot_dir, None)? {
        Some(path) => println!("latest snapshot: {}", path.display()),
        None => println!("latest snapshot: none"),
    }
    Ok(())
}
