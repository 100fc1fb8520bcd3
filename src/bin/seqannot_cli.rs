use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use seqannot::ids::parse_id_map;
use seqannot::taxonomy::NCBI_EUTILS_URL;
use seqannot::{
    combine_annotations, compute_statistics, merge_annotations, Aligner, CombineOperation,
    DatasetFamily, MemoryStore, MergeOptions, NcbiTaxonomyClient, OfflineTaxonomy, StatsOptions,
    TaxonomyResolver, TaxonomyService,
};

#[derive(Parser)]
#[command(
    name = "seqannot-rs",
    version,
    about = "Merge alignment hits with functional annotation and compute statistics"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge the hits of one dataset into a consolidated annotation file
    Annotate(AnnotateArgs),

    /// Combine two annotation files into one MERGER file
    Combine(CombineArgs),

    /// Write the statistics files of a consolidated annotation file
    Stats(StatsArgs),
}

#[derive(Args)]
struct AnnotateArgs {
    /// Directory holding the tab-separated store tables
    #[arg(long)]
    store_dir: PathBuf,

    /// Dataset identifier the alignments were loaded under
    #[arg(long)]
    dataset: String,

    /// plaza, refseq, nt or nr
    #[arg(long)]
    family: DatasetFamily,

    /// blastplus or diamond
    #[arg(long, default_value = "blastplus")]
    aligner: Aligner,

    /// Query sequences (FASTA, .gz accepted)
    #[arg(long)]
    sequences: PathBuf,

    /// Consolidated annotation output
    #[arg(short, long)]
    output: PathBuf,

    /// FASTA of the sequences left without annotation
    #[arg(long)]
    non_annotated: PathBuf,

    /// NT/NR output for non-plant hits (default: contamination-<output name>)
    #[arg(long)]
    contamination: Option<PathBuf>,

    /// Two-column map from old to new transcript ids
    #[arg(long)]
    transcript_map: Option<PathBuf>,

    /// Two-column map from transcript ids to peptide ids
    #[arg(long)]
    peptide_map: Option<PathBuf>,

    #[command(flatten)]
    taxonomy: TaxonomyArgs,
}

#[derive(Args)]
struct TaxonomyArgs {
    /// Never ask the taxonomy web service
    #[arg(long)]
    offline: bool,

    #[arg(long, env = "SEQANNOT_TAXONOMY_URL", default_value = NCBI_EUTILS_URL)]
    taxonomy_url: String,

    /// Contact address sent with each service request
    #[arg(long, env = "SEQANNOT_EMAIL")]
    email: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[derive(Args)]
struct CombineArgs {
    first: PathBuf,
    second: PathBuf,

    /// 1AND2, 1OR2, 1LESS2 or 2LESS1
    #[arg(long)]
    operation: CombineOperation,

    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args)]
struct StatsArgs {
    /// Consolidated annotation file, grouped by sequence id
    input: PathBuf,

    /// Store tables used to describe ids and GO namespaces
    #[arg(long)]
    store_dir: Option<PathBuf>,

    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Suffix of every statistics file name (default: input name without extension)
    #[arg(long)]
    base_name: Option<String>,
}

fn spinner(color: &str, message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template(&format!("{{spinner:.{color}}} {{msg}}"))
            .expect("Invalid spinner template"),
    );
    spinner.set_message(message);
    spinner
}

fn load_store(dir: &Path) -> seqannot::Result<MemoryStore> {
    let spinner = spinner("blue", format!("Loading store tables from {}...", dir.display()));
    let store = MemoryStore::load_dir(dir)?;
    spinner.finish_with_message(format!("Store loaded ({} species known).", store.species_count()));
    Ok(store)
}

fn annotate(args: AnnotateArgs) -> seqannot::Result<()> {
    let mut store = load_store(&args.store_dir)?;

    let mut options = MergeOptions::new(
        &args.dataset,
        args.family,
        args.aligner,
        args.sequences,
        args.output,
        args.non_annotated,
    );
    options.contamination = args.contamination;
    options.transcript_map = args.transcript_map.map(parse_id_map).transpose()?;
    options.peptide_map = args.peptide_map.map(parse_id_map).transpose()?;

    let service: Box<dyn TaxonomyService> = if args.taxonomy.offline {
        Box::new(OfflineTaxonomy)
    } else {
        Box::new(NcbiTaxonomyClient::new(
            &args.taxonomy.taxonomy_url,
            args.taxonomy.email,
            args.taxonomy.timeout,
        )?)
    };
    let mut resolver = TaxonomyResolver::new(service);

    let spinner = spinner(
        "green",
        format!("Merging {} hits of {}...", options.family, options.dataset),
    );
    let summary = merge_annotations(&options, &mut store, &mut resolver)?;
    spinner.finish_with_message(format!(
        "Merged {} sequences: {} annotated, {} without annotation.",
        summary.sequences, summary.annotated, summary.non_annotated
    ));
    Ok(())
}

fn combine(args: CombineArgs) -> seqannot::Result<()> {
    let spinner = spinner("yellow", format!("Combining with {}...", args.operation));
    let summary = combine_annotations(&args.first, &args.second, args.operation, &args.output)?;
    spinner.finish_with_message(format!(
        "Combined {} sequences into {}.",
        summary.sequences,
        args.output.display()
    ));
    Ok(())
}

fn default_base_name(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "annotation".to_string());
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    name.strip_suffix(".csv").unwrap_or(name).to_string()
}

fn stats(args: StatsArgs) -> seqannot::Result<()> {
    let store = match &args.store_dir {
        Some(dir) => load_store(dir)?,
        None => MemoryStore::new(),
    };
    let base_name = args.base_name.unwrap_or_else(|| default_base_name(&args.input));
    let options = StatsOptions::new(args.output_dir, base_name);

    let spinner = spinner("cyan", format!("Computing statistics of {}...", args.input.display()));
    let summary = compute_statistics(&args.input, &store, &options)?;
    spinner.finish_with_message(format!(
        "{} sequences, {} hits, {} HSPs; {} files written.",
        summary.sequences,
        summary.hits,
        summary.hsps,
        summary.files.len()
    ));
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Annotate(args) => annotate(args),
        Command::Combine(args) => combine(args),
        Command::Stats(args) => stats(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
