use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use basepile_core_rs::parallelism;
use basepile_io_rs::bam::{BamFiles, FlagFilter};
use basepile_io_rs::fasta::IndexedReader;
use basepile_io_rs::positions::{Format, PositionFile};
use basepile_pileup_rs::format::VERSION;
use basepile_pileup_rs::{Config, Mode, Pipeline, Profile, Sample, Strategy, Variant};
use clap::Parser;
use env_logger::Env;
use eyre::{ensure, Result, WrapErr};
use log::info;

/// Count bases observed at a set of genomic positions across many alignment files.
#[derive(Parser, Debug)]
#[command(name = "basepile", version, about)]
struct Args {
    /// Position file
    #[arg(short = 'p', long)]
    positions: PathBuf,

    /// Reference FASTA, indexed with `samtools faidx`
    #[arg(short = 'r', long)]
    reference: PathBuf,

    /// Indexed BAM file, may be repeated
    #[arg(short = 'b', long = "bam")]
    bams: Vec<PathBuf>,

    /// File listing BAM files, one `path[<tab>name]` per line
    #[arg(long)]
    bam_list: Option<PathBuf>,

    /// Result file
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Layout of the position file: tab, dcc1, maf, vcf or columns
    #[arg(short = 'f', long, default_value = "tab")]
    format: Format,

    /// Layout of the result: default, columns, compound or indel-check
    #[arg(short = 'm', long, default_value = "default")]
    mode: Mode,

    /// Filter preset: standard, torrent, rna or dna. Explicit flags take precedence
    #[arg(long, default_value = "standard")]
    profile: Profile,

    /// Number of pileup workers; negative values are counted back from all available cores
    #[arg(short = 't', long, default_value_t = 1, allow_hyphen_values = true)]
    threads: isize,

    /// Minimum base quality of every base in the window
    #[arg(long)]
    bq: Option<u8>,

    /// Minimum mapping quality
    #[arg(long)]
    mq: Option<u8>,

    /// Count reads flagged as duplicates
    #[arg(long)]
    dup: bool,

    /// Count reads with insertions or deletions (y/n)
    #[arg(long, value_parser = parse_switch)]
    indel: Option<bool>,

    /// Count reads spanning introns (y/n)
    #[arg(long, value_parser = parse_switch)]
    intron: Option<bool>,

    /// Report counts for each strand (y/n)
    #[arg(long, value_parser = parse_switch)]
    strand: Option<bool>,

    /// Count distinct fragment starts instead of reads (y/n)
    #[arg(long, value_parser = parse_switch)]
    novel_starts: Option<bool>,

    /// How BAM files are traversed: auto, probe, scan or per-variant
    #[arg(long, default_value = "auto")]
    traversal: Strategy,

    /// Only count reads with all of these SAM flags set
    #[arg(long, default_value_t = 0)]
    require_flags: u16,

    /// Skip reads with any of these SAM flags set
    #[arg(long, default_value_t = 0)]
    exclude_flags: u16,

    /// Skip reads with a lower mapping quality before any base is inspected
    #[arg(long, default_value_t = 0)]
    minmapq: u8,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" => Ok(true),
        "n" | "no" | "false" => Ok(false),
        _ => Err(format!("expected y or n, got {}", value)),
    }
}

fn config(args: &Args) -> Result<Config> {
    let mut config = args
        .profile
        .apply(Config::new())
        .with_threads(parallelism::available(args.threads)?)
        .with_mode(args.mode)
        .with_strategy(args.traversal)
        .with_include_duplicates(args.dup);

    if args.bq.is_some() {
        config = config.with_min_base_quality(args.bq);
    }
    if args.mq.is_some() {
        config = config.with_min_mapping_quality(args.mq);
    }
    if let Some(indel) = args.indel {
        config = config.with_include_indels(indel);
    }
    if let Some(intron) = args.intron {
        config = config.with_include_introns(intron);
    }
    if let Some(strand) = args.strand {
        config = config.with_strand_specific(strand);
    }
    if let Some(novel) = args.novel_starts {
        config = config.with_novel_starts(novel);
    }
    Ok(config)
}

fn samples(args: &Args) -> Result<Vec<Arc<Sample>>> {
    let mut samples: Vec<Arc<Sample>> = Vec::new();
    for path in &args.bams {
        samples.push(Arc::new(Sample::new(samples.len(), path, None)));
    }
    if let Some(list) = &args.bam_list {
        let file = File::open(list)
            .wrap_err_with(|| format!("Failed to open BAM list: {}", list.display()))?;
        for sample in Sample::from_list(BufReader::new(file))? {
            let name = Some(sample.name().clone());
            samples.push(Arc::new(Sample::new(samples.len(), sample.path(), name)));
        }
    }
    ensure!(
        !samples.is_empty(),
        "No BAM files given, use --bam or --bam-list"
    );
    Ok(samples)
}

fn run(args: &Args) -> Result<()> {
    let config = config(args)?;
    let samples = samples(args)?;

    let positions = PositionFile::from_path(&args.positions, args.format)?;
    let mut reference = IndexedReader::from_path(&args.reference)
        .wrap_err_with(|| format!("Failed to open reference: {}", args.reference.display()))?;
    let variants = Variant::load(&positions, &mut reference)?;

    let filter = FlagFilter::new()
        .with_require(args.require_flags)
        .with_exclude(args.exclude_flags)
        .with_minmapq(args.minmapq);

    Pipeline::new(config, variants, samples, Arc::new(BamFiles))?
        .with_header(positions.header().clone())
        .with_filter(Arc::new(filter))
        .run(&args.output)
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_level.as_str())).init();
    info!("Running basepile version {}", VERSION);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::FAILURE
        }
    }
}
