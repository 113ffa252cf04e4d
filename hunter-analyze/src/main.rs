mod constants;

use clap::{Parser, ValueEnum};
use hunter_core::stats::{analyze, load_campaign, write_csv, Campaign, CampaignSummary, Counts};
use hunter_core::Gazetteer;
use serde::Serialize;
use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use constants::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Validation {
    /// Reject hunts whose target hop is silent or ambiguous.
    Target,
    None,
    Both,
}

impl Validation {
    fn modes(self) -> &'static [bool] {
        match self {
            Self::Target => &[true],
            Self::None => &[false],
            Self::Both => &[true, false],
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Classify persisted hunt records against ground truth")]
struct Args {
    /// Directory of hunt record JSON files.
    #[arg(long)]
    campaign: PathBuf,

    /// Gazetteer resolving ground-truth codes and nearest airports.
    #[arg(long)]
    gazetteer: Option<PathBuf>,

    /// CSV file receiving the per-record rows.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Validation::Target)]
    validation: Validation,

    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisOutput {
    campaign: String,
    records: usize,
    unreadable: Vec<String>,
    summaries: Vec<CampaignSummary>,
    csv: Vec<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let gazetteer = match &args.gazetteer {
        Some(path) => Gazetteer::load(path)?,
        None => {
            warn!("no gazetteer given, only records with full ground truth are classified");
            Gazetteer::default()
        }
    };
    let loaded = load_campaign(&args.campaign)?;

    let both = args.validation == Validation::Both;
    let mut campaigns = Vec::new();
    let mut written = Vec::new();
    for &validate in args.validation.modes() {
        let campaign = analyze(&loaded.records, &gazetteer, validate);
        if let Some(base) = &args.output {
            let path = csv_path(base, validate, both);
            write_csv(&campaign.rows, BufWriter::new(File::create(&path)?))?;
            info!(path = %path.display(), rows = campaign.rows.len(), "campaign csv written");
            written.push(path);
        }
        campaigns.push(campaign);
    }

    if args.json {
        let output = AnalysisOutput {
            campaign: args.campaign.display().to_string(),
            records: loaded.records.len(),
            unreadable: loaded
                .unreadable
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            summaries: campaigns.iter().map(|c| c.summary.clone()).collect(),
            csv: written.iter().map(|p| p.display().to_string()).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "Campaign: {} ({} records, {} unreadable)",
        args.campaign.display(),
        loaded.records.len(),
        loaded.unreadable.len()
    );
    for campaign in &campaigns {
        print_campaign(campaign);
    }
    for path in &written {
        println!("\nRows written to {}", path.display());
    }
    Ok(())
}

fn init_tracing(verbose: bool) -> Result<(), Box<dyn Error>> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// With both validation modes, each mode gets its own file next to `base`.
fn csv_path(base: &Path, validate: bool, both: bool) -> PathBuf {
    if !both {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_CSV_STEM.to_string());
    let suffix = if validate { VALIDATED_SUFFIX } else { UNVALIDATED_SUFFIX };
    base.with_file_name(format!("{stem}_{suffix}.csv"))
}

fn print_campaign(campaign: &Campaign) {
    let s = &campaign.summary;
    let mode = if s.validate_target_hop {
        "with target-hop validation"
    } else {
        "without target-hop validation"
    };
    println!("\nOutcomes {} ({} classified):", mode, s.classified);
    print_counts("country", &s.country);
    print_counts("city", &s.city);
    if !s.without_ground_truth.is_empty() {
        println!("  no ground truth ({}):", s.without_ground_truth.len());
        for name in &s.without_ground_truth {
            println!("  - {name}");
        }
    }
}

fn print_counts(label: &str, c: &Counts) {
    let precision = c
        .precision()
        .map_or_else(|| "n/a".to_string(), |p| format!("{:.1}%", p * PERCENT));
    println!(
        "- {:<8} positive={} negative={} indeterminate={} precision={}",
        label, c.positive, c.negative, c.indeterminate, precision
    );
}
