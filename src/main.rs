use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::{generate, Shell};
use console::style;
use dialoguer::{theme::ColorfulTheme, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

mod analysis;
mod error;
mod output;
mod parsers;
mod reference;
mod types;

use analysis::Calculator;
use output::{print_csv, CandidateReport, ReportGenerator};
use parsers::{parse_antigen_list, parse_blood_group, parse_recipient_hla, DonorSnapshot, SnapshotParser};
use reference::ReferenceData;
use types::{BloodGroup, CandidateProfile, DonorPool, DonorRecord};

/// Kidney transplant CRF and matchability calculator
#[derive(Parser, Debug)]
#[command(
    name = "hla-matchability",
    version,
    about = "CRF and matchability scoring against a donor snapshot",
    long_about = r#"
Computes two transplant-matching metrics for a kidney-transplant candidate:
- CRF: the fraction of blood-group-identical donors the candidate's
  antibodies (unacceptable antigens) would reject
- Matchability: a banded estimate of how easy a well-matched, compatible
  donor will be to find, from HLA-B/DR mismatch grading

Donor snapshots are wide-format CSV files (one 0/1 column per antigen),
plain or gzipped. Reference data (matchability antigens, antigen defaults,
band tables) is a TOML file.
"#
)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Donor snapshot CSV (.csv or .csv.gz)
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    donors: Option<PathBuf>,

    /// Reference data TOML (matchability antigens, defaults, band tables)
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    reference: Option<PathBuf>,

    /// Candidate blood group
    #[arg(short, long, value_enum)]
    blood_group: Option<BloodGroup>,

    /// Comma-separated unacceptable antigens (specs)
    #[arg(short, long, default_value = "")]
    specs: String,

    /// Comma-separated recipient broad HLA-B/DR antigens
    #[arg(long, default_value = "")]
    hla: String,

    /// Donor set to score against
    #[arg(long, value_enum, default_value = "all")]
    donor_set: DonorSet,

    /// Interactive mode with prompts for all parameters
    #[arg(short, long)]
    interactive: bool,

    /// Number of threads (0 = auto-detect)
    #[arg(short, long, default_value = "0")]
    threads: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Output directory for report files (print to stdout when omitted)
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate shell completions
    Completions { shell: Shell },
    /// List the configured matchability band tables
    Bands {
        /// Reference data TOML
        #[arg(value_hint = ValueHint::FilePath)]
        reference: PathBuf,
    },
    /// Score many candidates from a CSV file (columns: id, bg, specs, hla)
    Batch {
        /// Candidates CSV
        #[arg(value_hint = ValueHint::FilePath)]
        candidates: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
    All,
}

impl From<OutputFormat> for output::ReportFormat {
    fn from(format: OutputFormat) -> output::ReportFormat {
        match format {
            OutputFormat::Text => output::ReportFormat::Text,
            OutputFormat::Json => output::ReportFormat::Json,
            OutputFormat::Csv => output::ReportFormat::Csv,
            OutputFormat::All => output::ReportFormat::All,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum DonorSet {
    /// Every donor in the snapshot
    #[default]
    All,
    /// Only donors with at least one DPB antigen typed
    Dpb,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = cli.command {
        generate_completions(shell);
        return Ok(());
    }

    init_logging(cli.verbose);

    if let Some(Commands::Bands { reference }) = &cli.command {
        return list_bands(reference);
    }

    let config = if cli.interactive {
        run_interactive_mode()?
    } else {
        AppConfig::from_cli(&cli)?
    };

    init_thread_pool(config.threads)?;

    match &cli.command {
        Some(Commands::Batch { candidates }) => run_batch(&config, candidates),
        _ => run_scoring(&config),
    }
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(format!("hla_matchability={}", level))
        .init();
}

fn init_thread_pool(threads: usize) -> Result<()> {
    let num_threads = if threads == 0 {
        num_cpus::get()
    } else {
        threads
    };

    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .map_err(|e| anyhow!("Failed to initialize thread pool: {}", e))?;

    Ok(())
}

fn list_bands(path: &Path) -> Result<()> {
    let reference = load_reference(path)?;

    println!("{}", style("Configured Matchability Bands:").bold().cyan());
    println!();

    let mut groups: Vec<BloodGroup> = reference.bands.blood_groups().collect();
    groups.sort_by_key(|bg| bg.as_code());
    for blood_group in groups {
        println!(
            "  {}",
            style(format!("Blood group {}", blood_group)).green().bold()
        );
        if let Some(table) = reference.bands.table(blood_group) {
            for (band, threshold) in table {
                println!(
                    "    band {:>2} - at least {} favourable donors",
                    style(band).yellow(),
                    threshold
                );
            }
        }
        println!();
    }
    Ok(())
}

fn run_interactive_mode() -> Result<AppConfig> {
    println!(
        "{}",
        style("HLA Matchability - Interactive Mode").cyan().bold()
    );
    println!();

    let theme = ColorfulTheme::default();

    let donors: String = Input::with_theme(&theme)
        .with_prompt("Donor snapshot file (.csv or .csv.gz)")
        .interact_text()?;

    let reference: String = Input::with_theme(&theme)
        .with_prompt("Reference data file (TOML)")
        .interact_text()?;

    let groups = ["O", "A", "B", "AB"];
    let group_idx = Select::with_theme(&theme)
        .with_prompt("Candidate blood group")
        .default(0)
        .items(&groups)
        .interact()?;
    let blood_group = parse_blood_group(groups[group_idx])?;

    let specs: String = Input::with_theme(&theme)
        .with_prompt("Unacceptable antigens (comma-separated, empty for none)")
        .allow_empty(true)
        .interact_text()?;

    let hla: String = Input::with_theme(&theme)
        .with_prompt("Recipient broad HLA-B/DR antigens (empty skips matchability)")
        .allow_empty(true)
        .interact_text()?;

    let donor_sets = ["All donors", "DPB-typed donors only"];
    let set_idx = Select::with_theme(&theme)
        .with_prompt("Donor set")
        .default(0)
        .items(&donor_sets)
        .interact()?;
    let donor_set = if set_idx == 1 {
        DonorSet::Dpb
    } else {
        DonorSet::All
    };

    let formats = ["Text", "JSON", "CSV", "All formats"];
    let format_idx = Select::with_theme(&theme)
        .with_prompt("Output format")
        .default(0)
        .items(&formats)
        .interact()?;
    let format = match format_idx {
        1 => OutputFormat::Json,
        2 => OutputFormat::Csv,
        3 => OutputFormat::All,
        _ => OutputFormat::Text,
    };

    let threads: usize = Input::with_theme(&theme)
        .with_prompt("Number of threads (0 = auto-detect)")
        .default(0)
        .interact_text()?;

    Ok(AppConfig {
        donors: PathBuf::from(donors),
        reference: PathBuf::from(reference),
        blood_group: Some(blood_group),
        specs,
        hla,
        donor_set,
        threads,
        format,
        output: None,
    })
}

fn load_reference(path: &Path) -> Result<ReferenceData> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read reference data {}", path.display()))?;
    ReferenceData::from_toml_str(&raw)
        .with_context(|| format!("Invalid reference data in {}", path.display()))
}

fn load_data(config: &AppConfig) -> Result<(DonorSnapshot, ReferenceData)> {
    info!("Loading donor snapshot from {}", config.donors.display());
    let snapshot = SnapshotParser::new().parse(&config.donors)?;
    info!("Loaded {} donors", snapshot.len());

    let reference = load_reference(&config.reference)?;
    Ok((snapshot, reference))
}

fn select_donors(snapshot: &DonorSnapshot, donor_set: DonorSet) -> Vec<DonorRecord> {
    match donor_set {
        DonorSet::All => snapshot.donors().to_vec(),
        DonorSet::Dpb => snapshot.dpb_typed(),
    }
}

fn score_candidate(
    records: &[DonorRecord],
    reference: &ReferenceData,
    id: Option<String>,
    blood_group: BloodGroup,
    specs_raw: &str,
    hla_raw: &str,
) -> Result<CandidateReport> {
    let specs = parse_antigen_list(specs_raw)?;
    let broad_hla = parse_recipient_hla(hla_raw)?;

    let pool = DonorPool::restrict(records, blood_group);
    let profile = CandidateProfile {
        blood_group,
        specs,
        broad_hla,
    };
    let results = Calculator::new(&pool, &profile, reference).calculate()?;

    let mut specs: Vec<String> = profile.specs.iter().cloned().collect();
    specs.sort();
    let mut recip_hla: Vec<String> = profile
        .broad_hla
        .as_ref()
        .map(|hla| hla.b.iter().chain(hla.dr.iter()).cloned().collect())
        .unwrap_or_default();
    recip_hla.sort();

    Ok(CandidateReport {
        id,
        bg: blood_group,
        specs,
        recip_hla,
        total: records.len(),
        results,
    })
}

fn run_scoring(config: &AppConfig) -> Result<()> {
    let blood_group = config
        .blood_group
        .ok_or_else(|| anyhow!("--blood-group is required (or use --interactive)"))?;

    let (snapshot, reference) = load_data(config)?;
    let records = select_donors(&snapshot, config.donor_set);
    info!("Scoring against {} donors", records.len());

    let report = score_candidate(
        &records,
        &reference,
        None,
        blood_group,
        &config.specs,
        &config.hla,
    )?;
    emit_reports(config, vec![report])
}

/// One candidate per row: id, bg, specs, hla (lists comma-separated, quoted)
#[derive(Debug, serde::Deserialize)]
struct BatchRow {
    #[serde(default)]
    id: Option<String>,
    bg: String,
    #[serde(default)]
    specs: String,
    #[serde(default)]
    hla: String,
}

fn run_batch(config: &AppConfig, candidates: &Path) -> Result<()> {
    let (snapshot, reference) = load_data(config)?;
    let records = select_donors(&snapshot, config.donor_set);

    let mut reader = csv::Reader::from_path(candidates)
        .with_context(|| format!("Failed to open candidates file {}", candidates.display()))?;
    let rows: Vec<BatchRow> = reader
        .deserialize()
        .collect::<Result<_, _>>()
        .with_context(|| format!("Invalid candidates file {}", candidates.display()))?;
    info!("Scoring {} candidates", rows.len());

    let pb = ProgressBar::new(rows.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message("Scoring candidates...");

    let reports: Vec<CandidateReport> = rows
        .par_iter()
        .filter_map(|row| {
            let result = parse_blood_group(&row.bg)
                .map_err(anyhow::Error::from)
                .and_then(|blood_group| {
                    score_candidate(
                        &records,
                        &reference,
                        row.id.clone(),
                        blood_group,
                        &row.specs,
                        &row.hla,
                    )
                });
            pb.inc(1);
            match result {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!(
                        "Skipping candidate {}: {}",
                        row.id.as_deref().unwrap_or("<unnamed>"),
                        err
                    );
                    None
                }
            }
        })
        .collect();
    pb.finish_with_message("Scoring complete");

    info!("Scored {} of {} candidates", reports.len(), rows.len());

    // batch always lands in report files
    let output_dir = config
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from("./reports"));
    let generator = ReportGenerator::new(&output_dir)?;
    generator.generate(&reports, config.format.into())?;

    println!(
        "\n{} Reports saved to: {}",
        style("✓").green().bold(),
        style(output_dir.display()).cyan()
    );
    Ok(())
}

fn emit_reports(config: &AppConfig, reports: Vec<CandidateReport>) -> Result<()> {
    if let Some(dir) = &config.output {
        let generator = ReportGenerator::new(dir)?;
        generator.generate(&reports, config.format.into())?;
        println!(
            "\n{} Reports saved to: {}",
            style("✓").green().bold(),
            style(dir.display()).cyan()
        );
        return Ok(());
    }

    match config.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Csv => print_csv(&reports)?,
        _ => {
            for report in &reports {
                println!("{}", style("Matchability Results").bold().cyan());
                print!("{}", report.render_text());
            }
        }
    }
    Ok(())
}

#[derive(Debug)]
struct AppConfig {
    donors: PathBuf,
    reference: PathBuf,
    blood_group: Option<BloodGroup>,
    specs: String,
    hla: String,
    donor_set: DonorSet,
    threads: usize,
    format: OutputFormat,
    output: Option<PathBuf>,
}

impl AppConfig {
    fn from_cli(cli: &Cli) -> Result<Self> {
        let donors = cli
            .donors
            .clone()
            .ok_or_else(|| anyhow!("--donors is required (or use --interactive)"))?;
        let reference = cli
            .reference
            .clone()
            .ok_or_else(|| anyhow!("--reference is required (or use --interactive)"))?;

        Ok(Self {
            donors,
            reference,
            blood_group: cli.blood_group,
            specs: cli.specs.clone(),
            hla: cli.hla.clone(),
            donor_set: cli.donor_set,
            threads: cli.threads,
            format: cli.format,
            output: cli.output.clone(),
        })
    }
}
