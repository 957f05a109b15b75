use std::{error::Error, fs::File, path::PathBuf, sync::Mutex};

use chrono::NaiveDateTime;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wikipanel::{
    language::Language,
    link::PostFilterConfig,
    pipeline::{self, CountJob, DumpJob},
    preprocess::{parse_date_threshold, DropOption, PreprocessConfig, RelativeThreshold},
    reducer::ReducerConfig,
};

#[derive(Debug, clap::Parser)]
#[command(version, about)]
struct CommandLine {
    #[command(subcommand)]
    command: Command,

    /// Log debug output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write the log to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Number of worker threads, defaults to one per core.
    #[arg(long, global = true)]
    workers: Option<usize>,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Reduce a page-history dump to an edit table.
    ProcessDump(ProcessDumpArgs),
    /// Concatenate edit tables.
    Combine(CombineArgs),
    /// Collapse archives and split edit tables into files by page id.
    Shard(ShardArgs),
    /// Aggregate an edit table into the half-yearly panel.
    CountEdits(CountEditsArgs),
}

#[derive(Debug, clap::Args)]
struct ProcessDumpArgs {
    /// Wikipedia language code, e.g. `en`.
    #[arg(short, long, value_parser = Language::from_code)]
    lang: Language,
    #[arg(short, long)]
    input: PathBuf,
    #[arg(short, long)]
    output: PathBuf,
    /// Only process this many article and talk pages.
    #[arg(long)]
    num_pages: Option<usize>,
    /// Stream the compressed dump instead of decompressing it next to the archive first.
    #[arg(long)]
    no_decompress: bool,
    /// Replace an existing decompressed dump.
    #[arg(long)]
    overwrite: bool,
    /// Only detect reverts to one of this many preceding revisions.
    #[arg(long)]
    revert_radius: Option<usize>,
    /// Re-read the edit table and check its row count.
    #[arg(long)]
    verify: bool,
}

#[derive(Debug, clap::Args)]
struct CombineArgs {
    /// Edit tables, or a single directory of them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[arg(short, long)]
    output: PathBuf,
    /// Continue if some tables can't be read.
    #[arg(long)]
    allow_partial: bool,
}

#[derive(Debug, clap::Args)]
struct ShardArgs {
    #[arg(short, long, value_parser = Language::from_code)]
    lang: Language,
    /// Edit tables, or a single directory of them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Directory for the `<lang>_<i>.csv` files.
    #[arg(short, long)]
    output_dir: PathBuf,
    /// Number of output files, defaults to the number of inputs.
    #[arg(long)]
    bins: Option<usize>,
    #[arg(long)]
    allow_partial: bool,
}

#[derive(Debug, clap::Args)]
struct CountEditsArgs {
    #[arg(short, long, value_parser = Language::from_code)]
    lang: Language,
    #[arg(short, long)]
    input: PathBuf,
    #[arg(short, long)]
    output: PathBuf,
    /// Only read this many rows of the edit table.
    #[arg(long)]
    num_rows: Option<usize>,
    /// Edits to drop before aggregating and panel rows to drop after linking.
    #[arg(long, value_enum, num_args = 0.., value_delimiter = ',')]
    drop: Vec<DropOption>,
    /// Bot names, one per line. Required with `--drop bots`.
    #[arg(long)]
    bot_list: Option<PathBuf>,
    /// Only keep edits up to this time, `YYYY-MM-DD HH:MM:SS`.
    #[arg(long, value_parser = parse_date_threshold)]
    date_threshold: Option<NaiveDateTime>,
    /// Only keep edits within this long after a page's first edit, e.g. `6m` or `2y`.
    #[arg(long)]
    relative_date_threshold: Option<RelativeThreshold>,
    /// Shift timestamps back by this many months.
    #[arg(long)]
    date_offset: Option<u32>,
}

fn init_logging(verbose: bool, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = File::create(path)?;
            subscriber
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => subscriber.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = CommandLine::parse();
    init_logging(args.verbose, args.log_file.as_ref())?;

    if let Some(workers) = args.workers {
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build_global()?;
    }

    match args.command {
        Command::ProcessDump(args) => {
            pipeline::process_dump(DumpJob {
                input: args.input,
                output: args.output,
                language: args.lang,
                reducer: ReducerConfig {
                    revert_radius: args.revert_radius,
                },
                num_pages: args.num_pages,
                decompress: !args.no_decompress,
                overwrite: args.overwrite,
                verify: args.verify,
            })?;
        }
        Command::Combine(args) => {
            pipeline::combine(&args.inputs, &args.output, args.allow_partial)?;
        }
        Command::Shard(args) => {
            pipeline::shard(
                &args.inputs,
                &args.output_dir,
                &args.lang,
                args.bins,
                args.allow_partial,
            )?;
        }
        Command::CountEdits(args) => {
            let drop = args.drop.into_iter().collect();
            let post_filter = PostFilterConfig::from_drop_options(&drop);
            pipeline::count_edits(CountJob {
                input: args.input,
                output: args.output,
                language: args.lang,
                preprocess: PreprocessConfig {
                    drop,
                    bot_list: args.bot_list,
                    date_threshold: args.date_threshold,
                    relative_date_threshold: args.relative_date_threshold,
                    date_offset: args.date_offset,
                },
                post_filter,
                num_rows: args.num_rows,
            })?;
        }
    }

    Ok(())
}
