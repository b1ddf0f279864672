use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use otu_matrix::archive;
use otu_matrix::config::{ConfigLoader, PipelineConfig};
use otu_matrix::domain::{Visit, ZeroTotalPolicy};
use otu_matrix::error::OtuError;
use otu_matrix::manifest;
use otu_matrix::output::{JsonOutput, LogSink, OutputMode};
use otu_matrix::pipeline::{
    OverlapReport, Pipeline, ProgressSink, RunReport, StageReport, VocabularyReport,
};

#[derive(Parser)]
#[command(name = "otu-matrix")]
#[command(about = "Normalize and unify per-visit taxonomy abundance tables into OTU matrices")]
#[command(version, author)]
struct Cli {
    /// Pipeline configuration (defaults to ./otu-matrix.json when present)
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Print a JSON report on stdout instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Default)]
struct Overrides {
    #[arg(long, global = true)]
    data_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    output_root: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    zero_total: Option<ZeroTotalPolicy>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Merge portal manifests and write per-visit download and metadata files")]
    Prepare(PrepareArgs),
    #[command(about = "Normalize classifier summaries into intermediate tables")]
    Normalize,
    #[command(about = "Collect taxonomy vocabularies and write unified matrices")]
    Unify(UnifyArgs),
    #[command(about = "Write paired-visit matrices from unified matrices")]
    Pair,
    #[command(about = "Report how many subjects each visit shares with a reference visit")]
    Overlap(OverlapArgs),
    #[command(about = "Run normalize, unify and pair in order")]
    Run(RunArgs),
    #[command(about = "Decompress .gz files in the visit folders of a body site")]
    Unpack(BodyDirArgs),
    #[command(about = "Remove .gz and .tar files from the visit folders of a body site")]
    Clean(BodyDirArgs),
}

#[derive(Args)]
struct PrepareArgs {
    /// Folder with the portal manifest and metadata files
    input_dir: Utf8PathBuf,

    /// Highest visit number to export
    #[arg(long, default_value_t = 2)]
    visits: u32,
}

#[derive(Args)]
struct UnifyArgs {
    /// Use existing taxonomy files instead of collecting them again
    #[arg(long)]
    reuse_vocabulary: bool,
}

#[derive(Args)]
struct OverlapArgs {
    /// Visit to compare against (defaults to the first paired visit)
    #[arg(long)]
    reference: Option<Visit>,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    no_pair: bool,
}

#[derive(Args)]
struct BodyDirArgs {
    body_dir: Utf8PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<OtuError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &OtuError) -> u8 {
    match error {
        OtuError::ConfigRead(_)
        | OtuError::ConfigParse(_)
        | OtuError::InvalidBodySite(_)
        | OtuError::InvalidVisit(_)
        | OtuError::InvalidClassifier(_)
        | OtuError::InvalidZeroTotalPolicy(_) => 2,
        OtuError::MissingManifest { .. } | OtuError::MissingVocabulary(_) => 3,
        OtuError::PartialFailure { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = apply_overrides(ConfigLoader::resolve(cli.config.as_deref())?, cli.overrides);
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogSink,
    };

    match cli.command {
        Command::Prepare(args) => {
            let report = manifest::prepare(&args.input_dir, &config.output_root, args.visits)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_prepare(&report).into_diagnostic()?,
                OutputMode::Human => {
                    println!(
                        "merged {} rows into {} (body sites: {})",
                        report.merged_rows,
                        report.merged_path,
                        report.body_sites.join(", ")
                    );
                    println!("wrote {} download and metadata files", report.files.len());
                }
            }
            Ok(())
        }
        Command::Normalize => {
            let pipeline = Pipeline::new(config);
            let stage = pipeline.normalize_all(sink)?;
            finish_stage(stage.report(), output_mode)
        }
        Command::Unify(args) => {
            let pipeline = Pipeline::new(config);
            let normalized = pipeline.load_normalized(sink)?;
            let load_failures = normalized.report().failures.len();
            let vocabularies = if args.reuse_vocabulary {
                pipeline.load_vocabularies(normalized, sink)
            } else {
                pipeline.collect(normalized, sink)
            };
            let unified = pipeline.unify_all(&vocabularies, sink);
            if matches!(output_mode, OutputMode::Human) {
                print_vocabularies(vocabularies.reports());
            }
            let mut report = unified.report().clone();
            report.failures.extend(vocabularies.failures().iter().cloned());
            let failed = report.failures.len() + load_failures;
            finish_stage(&report, output_mode)?;
            check_failures(failed, report.files.len() + failed)
        }
        Command::Pair => {
            let pipeline = Pipeline::new(config);
            let report = pipeline.pair_stored(sink)?;
            finish_stage(&report, output_mode)
        }
        Command::Overlap(args) => {
            let reference = args
                .reference
                .unwrap_or_else(|| config.paired_visits.0.clone());
            let pipeline = Pipeline::new(config);
            let report = pipeline.overlap_stored(&reference, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_overlap(&report).into_diagnostic()?,
                OutputMode::Human => print_overlap_summary(&report),
            }
            check_failures(
                report.failures.len(),
                report.groups.len() + report.failures.len(),
            )
        }
        Command::Run(args) => {
            let pipeline = Pipeline::new(config);
            let report = pipeline.run(!args.no_pair, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_run(&report).into_diagnostic()?,
                OutputMode::Human => print_run_summary(&report),
            }
            check_failures(report.failed(), report.total())
        }
        Command::Unpack(args) => {
            let unpacked = archive::unpack_gz(&args.body_dir)?;
            println!("unpacked {} files in {}", unpacked.len(), args.body_dir);
            Ok(())
        }
        Command::Clean(args) => {
            let removed = archive::clean(&args.body_dir)?;
            println!(
                "removed .tar and .gz files from {}, total of {removed} files",
                args.body_dir
            );
            Ok(())
        }
    }
}

fn apply_overrides(mut config: PipelineConfig, overrides: Overrides) -> PipelineConfig {
    if let Some(data_dir) = overrides.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(output_root) = overrides.output_root {
        if config.paired_dir.starts_with(&config.output_root) {
            let relative = config
                .paired_dir
                .strip_prefix(&config.output_root)
                .map(|path| path.to_path_buf())
                .unwrap_or_default();
            config.paired_dir = output_root.join(relative);
        }
        config.output_root = output_root;
    }
    if let Some(policy) = overrides.zero_total {
        config.normalize.zero_total = policy;
    }
    config
}

fn finish_stage(report: &StageReport, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => JsonOutput::print_stage(report).into_diagnostic()?,
        OutputMode::Human => print_stage_summary(report),
    }
    check_failures(report.failures.len(), report.files.len() + report.failures.len())
}

fn check_failures(failed: usize, total: usize) -> miette::Result<()> {
    if failed > 0 {
        return Err(OtuError::PartialFailure { failed, total }.into());
    }
    Ok(())
}

fn print_run_summary(report: &RunReport) {
    print_stage_summary(&report.normalize);
    print_vocabularies(&report.vocabulary);
    for failure in &report.vocabulary_failures {
        println!("\x1b[31m  failed {}: {}\x1b[0m", failure.unit, failure.error);
    }
    print_stage_summary(&report.unify);
    if let Some(paired) = &report.paired {
        print_stage_summary(paired);
    }
}

fn print_stage_summary(report: &StageReport) {
    let green = "\x1b[32m";
    let red = "\x1b[31m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!(
        "{cyan}{}: {} files, {} failed{reset}",
        report.stage,
        report.files.len(),
        report.failures.len()
    );
    for file in &report.files {
        println!(
            "{green}  {} ({} subjects, {} features){reset}",
            file.path, file.subjects, file.features
        );
    }
    for failure in &report.failures {
        println!("{red}  failed {}: {}{reset}", failure.unit, failure.error);
    }
}

fn print_overlap_summary(report: &OverlapReport) {
    for group in &report.groups {
        println!(
            "\x1b[36m{}/{}: {} has {} subjects\x1b[0m",
            group.body_site, group.classifier, group.reference, group.reference_subjects
        );
        for visit in &group.visits {
            println!(
                "\x1b[32m  {}: {} subjects, {} shared, {} unmatched\x1b[0m",
                visit.visit, visit.subjects, visit.shared, visit.unmatched
            );
        }
    }
    for failure in &report.failures {
        println!("\x1b[31m  failed {}: {}\x1b[0m", failure.unit, failure.error);
    }
}

fn print_vocabularies(reports: &[VocabularyReport]) {
    for vocabulary in reports {
        println!(
            "\x1b[36mtaxonomy {}/{}: {} labels from {} visits -> {}\x1b[0m",
            vocabulary.body_site,
            vocabulary.classifier,
            vocabulary.labels,
            vocabulary.visits,
            vocabulary.path
        );
    }
}
