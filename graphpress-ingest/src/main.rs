use clap::Parser;
use mimalloc::MiMalloc;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};

use graphpress_builder::pipeline::{build, BuildConfig, BuildResult};
use graphpress_builder::remap::BucketConfig;
use graphpress_builder::sort::MergeConfig;
use graphpress_builder::text::line_source::{LineSourceConfig, LineTripleSource};
use graphpress_builder::text::mmap_source::{MmapSourceConfig, MmapTripleSource};
use graphpress_core::TripleOrder;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Build a compact binary RDF encoding from N-Triples/N-Quads input.
#[derive(Parser, Debug)]
#[command(name = "graphpress-ingest", version)]
struct Args {
    /// Input files (concatenated in order).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory for dictionary/remap/triples artifacts.
    #[arg(long, short)]
    out: PathBuf,

    /// Scratch directory (defaults to `<out>/tmp_build`).
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Sort permutation of the final triple chunk.
    #[arg(long, default_value = "spo")]
    order: TripleOrder,

    /// Treat input as N-Quads (extract graph labels).
    #[arg(long)]
    quads: bool,

    /// Memory-map the input instead of streaming it (single file only).
    #[arg(long)]
    mmap: bool,

    /// Chunk byte budget, in MiB.
    #[arg(long, default_value_t = 16)]
    chunk_mb: usize,

    /// Worker threads for the parse and merge phases (defaults to the
    /// available parallelism).
    #[arg(long)]
    workers: Option<usize>,

    /// K-way merge arity.
    #[arg(long, default_value_t = 8)]
    merge_arity: usize,

    /// Concurrent-merge cap per sort.
    #[arg(long, default_value_t = 2)]
    max_concurrent_merges: usize,

    /// Triple positions per remap bucket.
    #[arg(long, default_value_t = 1 << 20)]
    bucket_size: u64,
}

fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("graphpress_ingest=info,graphpress_builder=info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact());
    let _ = tracing::dispatcher::set_global_default(tracing::Dispatch::new(subscriber));
}

fn build_config(args: &Args) -> BuildConfig {
    let mut config = BuildConfig::new(
        args.scratch_dir
            .clone()
            .unwrap_or_else(|| args.out.join("tmp_build")),
        &args.out,
    );
    config.order = args.order;
    config.quads = args.quads;
    if let Some(workers) = args.workers {
        config.parse_workers = workers.max(1);
        config.merge.workers = workers.max(1);
    }
    config.merge = MergeConfig {
        arity: args.merge_arity,
        workers: config.merge.workers,
        max_concurrent_merges: args.max_concurrent_merges,
    };
    config.bucket = BucketConfig {
        bucket_size: args.bucket_size,
        ..BucketConfig::default()
    };
    config
}

fn run(args: &Args) -> graphpress_builder::Result<BuildResult> {
    let config = build_config(args);

    if args.mmap {
        if args.inputs.len() != 1 {
            return Err(graphpress_builder::BuildError::Malformed(
                "--mmap takes exactly one input file".into(),
            ));
        }
        let source = MmapTripleSource::open(
            &args.inputs[0],
            MmapSourceConfig {
                step_bytes: args.chunk_mb * 1024 * 1024,
                quads: args.quads,
            },
        )?;
        return build(&source, &config);
    }

    let mut reader: Box<dyn BufRead + Send> = {
        let first = File::open(&args.inputs[0])?;
        Box::new(BufReader::with_capacity(1 << 20, first))
    };
    for path in &args.inputs[1..] {
        let next = BufReader::with_capacity(1 << 20, File::open(path)?);
        reader = Box::new(Read::chain(reader, next));
    }
    let source = LineTripleSource::new(
        reader,
        LineSourceConfig {
            chunk_bytes: args.chunk_mb * 1024 * 1024,
            quads: args.quads,
            ..Default::default()
        },
    );
    build(&source, &config)
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let started = Instant::now();
    match run(&args) {
        Ok(result) => {
            info!(
                triples = result.triple_count,
                shared = result.counts.shared,
                subjects = result.counts.subjects,
                predicates = result.counts.predicates,
                objects = result.counts.objects,
                graphs = result.counts.graphs,
                triples_file = %result.triples_path.display(),
                elapsed_s = started.elapsed().as_secs_f64(),
                "build complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "build failed");
            ExitCode::FAILURE
        }
    }
}
