use clap::{Parser, ValueEnum};
use debruijn_core::{dump, reads, AmbiguityPolicy, BuildConfig, GraphBuilder};
use log::info;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Ambiguity {
    /// Ignore k-mers covering a non-ACGT symbol
    Skip,
    /// Fail on the first non-ACGT symbol
    Reject,
    /// Read non-ACGT symbols as A
    Replace,
}

impl From<Ambiguity> for AmbiguityPolicy {
    fn from(value: Ambiguity) -> Self {
        match value {
            Ambiguity::Skip => AmbiguityPolicy::Skip,
            Ambiguity::Reject => AmbiguityPolicy::Reject,
            Ambiguity::Replace => AmbiguityPolicy::ReplaceWithA,
        }
    }
}

/// Builds the De Bruijn graph of a set of reads
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Opts {
    /// k-mer length (1 to 32)
    #[clap(short)]
    k: usize,
    /// Keep a k-mer and its reverse complement in distinct nodes
    #[clap(long)]
    no_fold: bool,
    #[clap(long, value_enum, default_value_t = Ambiguity::Skip)]
    ambiguity: Ambiguity,
    /// Number of worker threads (all cores by default)
    #[clap(long)]
    threads: Option<usize>,
    /// Write one line per node into this file
    #[clap(long)]
    text: Option<PathBuf>,
    /// Save a binary snapshot of the graph into this file
    #[clap(long)]
    snapshot: Option<PathBuf>,
    /// FASTA/FASTQ files, possibly compressed
    #[clap(required = true)]
    inputs: Vec<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts = Opts::parse();

    let sequences = reads::read_sequences(&opts.inputs)?;

    let mut config = BuildConfig::new(opts.k);
    config.fold_reverse_complement = !opts.no_fold;
    config.ambiguity = opts.ambiguity.into();
    config.threads = opts.threads;

    let start = Instant::now();
    let graph = GraphBuilder::new(config).build(&sequences)?;
    info!("graph built in {:.3}s", start.elapsed().as_secs_f64());

    if let Some(path) = &opts.text {
        dump::plain_text(&graph, path)?;
        info!("nodes written to {}", path.display());
    }
    if let Some(path) = &opts.snapshot {
        dump::save(&graph, path)?;
        info!("snapshot saved to {}", path.display());
    }
    Ok(())
}
