//! Drivers behind the command line: dump processing, combining, sharding and edit counting.

use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use rayon::prelude::*;

use crate::{
    aggregate::aggregate,
    decompress::{open_dump, Compression, DecompressError, DumpDecompressor},
    dump_parser::{DumpParser, Page, ParsingError},
    language::{Language, LanguageError},
    link::{link_namespaces, post_filter, PostFilterConfig},
    preprocess::{collapse_archives, PreprocessConfig, PreprocessError, Preprocessor},
    quality::LabelExtractor,
    reducer::{reduce_page, ReducerConfig},
    table::{
        list_tables, load_shards, read_raw_edits, shard_by_page_id, write_panel, write_raw_edits,
        PanelRow, RawEditWriter, ShardLoad, TableError,
    },
    title::TALK_NAMESPACE,
};

/// Pages are reduced in parallel batches of this size.
const BATCH_SIZE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Language(#[from] LanguageError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Decompress(#[from] DecompressError),
    #[error("could not parse dump")]
    Parsing(#[from] ParsingError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("dump reader made no progress at byte {position}, giving up")]
    Stalled { position: u64 },
    #[error("`{}` has {found} rows, expected {expected}", path.display())]
    Integrity {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("{failed} of {total} edit tables could not be loaded")]
    PartialLoad { failed: usize, total: usize },
}

/// Counters of a dump processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Article and talk pages reduced.
    pub pages: usize,
    /// Pages of other namespaces.
    pub skipped_pages: usize,
    /// Rows written to the edit table.
    pub edits: usize,
    /// Pages lost to parse errors.
    pub page_errors: usize,
    /// Revisions whose assessments could not be read.
    pub quality_errors: usize,
}

impl RunSummary {
    pub fn log(&self) {
        tracing::info!(
            message = "run summary",
            pages = self.pages,
            skipped_pages = self.skipped_pages,
            edits = self.edits,
            page_errors = self.page_errors,
            quality_errors = self.quality_errors
        );
    }
}

/// Streams pages from a dump through the page reducer into an edit table.
pub struct DumpProcessor {
    language: Language,
    extractor: Option<&'static dyn LabelExtractor>,
    reducer: ReducerConfig,
    num_pages: Option<usize>,
}

impl DumpProcessor {
    pub fn new(language: Language, reducer: ReducerConfig) -> Self {
        let extractor = language.extractor();
        if extractor.is_none() {
            tracing::warn!(
                message = "no assessment extractor for this language, quality is not tracked",
                lang = language.code()
            );
        }
        Self {
            language,
            extractor,
            reducer,
            num_pages: None,
        }
    }

    /// Stop after this many article and talk pages.
    pub fn num_pages(mut self, num_pages: Option<usize>) -> Self {
        self.num_pages = num_pages;
        self
    }

    fn reduce_batch<W: Write>(
        &self,
        batch: &mut Vec<Page>,
        writer: &mut RawEditWriter<W>,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let reduced: Vec<_> = batch
            .par_iter()
            .map(|page| reduce_page(page, &self.language, self.extractor, &self.reducer))
            .collect();
        batch.clear();

        for page in reduced {
            for row in page.rows() {
                writer.write_row(&row)?;
            }
            summary.pages += 1;
            summary.edits += page.edit_count();
            summary.quality_errors += page.quality_errors;
        }
        Ok(())
    }

    /// Reduce every article and talk page of a dump and write the rows to `writer`.
    ///
    /// A page that fails to parse is skipped and counted. The run only fails if the dump is
    /// unreadable, the reader stops making progress or the output can't be written.
    pub fn run<R: BufRead, W: Write>(
        &self,
        reader: R,
        writer: &mut RawEditWriter<W>,
    ) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();
        self.run_counting(reader, writer, &mut summary)?;
        Ok(summary)
    }

    /// Like [`run`](Self::run), but counts into `summary` so that the work done before a
    /// failure is still known.
    pub fn run_counting<R: BufRead, W: Write>(
        &self,
        reader: R,
        writer: &mut RawEditWriter<W>,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let mut parser = DumpParser::new(reader)?;

        let dbname = &parser.site_info().dbname;
        if !dbname.is_empty() && *dbname != self.language.dbname() {
            tracing::warn!(
                message = "dump does not belong to the requested language",
                dbname = dbname.as_str(),
                lang = self.language.code()
            );
        }

        let mut batch = Vec::with_capacity(BATCH_SIZE);
        let mut last_error_position = None;

        loop {
            if self
                .num_pages
                .is_some_and(|limit| summary.pages + batch.len() >= limit)
            {
                tracing::info!(message = "page limit reached");
                break;
            }

            match parser.parse_page() {
                Ok(Some(page)) => {
                    last_error_position = None;
                    if page.namespace != 0 && page.namespace != TALK_NAMESPACE {
                        summary.skipped_pages += 1;
                        continue;
                    }
                    batch.push(page);
                    if batch.len() == BATCH_SIZE {
                        self.reduce_batch(&mut batch, writer, summary)?;
                    }
                }
                Ok(None) => break,
                Err(error) if error.is_recoverable() => {
                    let position = parser.position();
                    if last_error_position == Some(position) {
                        return Err(PipelineError::Stalled { position });
                    }
                    last_error_position = Some(position);
                    summary.page_errors += 1;
                    tracing::warn!(message = "skipping page after parse error", position, error = %error);
                }
                Err(ParsingError::Eof) => {
                    summary.page_errors += 1;
                    tracing::warn!(message = "dump ends in the middle of a page");
                    break;
                }
                Err(error) => return Err(error.into()),
            }
        }

        self.reduce_batch(&mut batch, writer, summary)?;
        writer.flush()?;
        Ok(())
    }
}

/// Settings of the `process-dump` command.
#[derive(Debug)]
pub struct DumpJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub language: Language,
    pub reducer: ReducerConfig,
    pub num_pages: Option<usize>,
    /// Decompress the archive next to it first, deleting the result afterwards. Otherwise
    /// compressed dumps are streamed.
    pub decompress: bool,
    pub overwrite: bool,
    pub verify: bool,
}

pub fn process_dump(job: DumpJob) -> Result<RunSummary, PipelineError> {
    let decompressor = match Compression::detect(&job.input) {
        Some(_) if job.decompress => Some(DumpDecompressor::new(&job.input)?.overwrite(job.overwrite)),
        _ => None,
    };
    let dump_path = match &decompressor {
        Some(decompressor) => decompressor.decompress()?,
        None => job.input.clone(),
    };

    let processor = DumpProcessor::new(job.language, job.reducer).num_pages(job.num_pages);
    let mut summary = RunSummary::default();
    let result = open_dump(&dump_path)
        .map_err(PipelineError::from)
        .and_then(|reader| {
            let mut writer = RawEditWriter::create(&job.output)?;
            processor.run_counting(reader, &mut writer, &mut summary)
        });
    summary.log();

    if let Some(decompressor) = &decompressor {
        if let Err(error) = decompressor.remove() {
            tracing::warn!(message = "could not remove decompressed dump", error = %error);
        }
    }

    if let Err(error) = result {
        tracing::error!(message = "dump processing failed", edits_written = summary.edits, error = %error);
        return Err(error);
    }

    if job.verify {
        verify_edit_table(&job.output, summary.edits)?;
    }
    Ok(summary)
}

/// Re-read a written edit table and compare its row count.
pub fn verify_edit_table(path: &Path, expected: usize) -> Result<(), PipelineError> {
    let found = read_raw_edits(path, None)?.len();
    if found != expected {
        return Err(PipelineError::Integrity {
            path: path.to_path_buf(),
            expected,
            found,
        });
    }
    tracing::info!(message = "verified edit table", path = %path.display(), rows = found);
    Ok(())
}

/// Expand a single directory argument to the `.csv` files inside it.
pub fn resolve_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, PipelineError> {
    let paths = match inputs {
        [dir] if dir.is_dir() => list_tables(dir)?,
        _ => inputs.to_vec(),
    };
    if paths.is_empty() {
        return Err(PipelineError::Config("no edit tables to read".into()));
    }
    if let Some(missing) = paths.iter().find(|path| !path.is_file()) {
        return Err(PipelineError::Config(format!(
            "`{}` is not a file",
            missing.display()
        )));
    }
    Ok(paths)
}

fn load_inputs(inputs: &[PathBuf], allow_partial: bool) -> Result<ShardLoad, PipelineError> {
    let load = load_shards(inputs, None);
    if !load.failed.is_empty() {
        if !allow_partial {
            return Err(PipelineError::PartialLoad {
                failed: load.failed.len(),
                total: inputs.len(),
            });
        }
        tracing::warn!(
            message = "continuing with a partial load",
            failed = load.failed.len(),
            total = inputs.len()
        );
    }
    tracing::info!(message = "loaded edit tables", tables = inputs.len(), rows = load.rows.len());
    Ok(load)
}

/// Concatenate edit tables into one. Returns the number of rows written.
pub fn combine(inputs: &[PathBuf], output: &Path, allow_partial: bool) -> Result<usize, PipelineError> {
    let inputs = resolve_inputs(inputs)?;
    let load = load_inputs(&inputs, allow_partial)?;
    write_raw_edits(output, &load.rows)?;
    tracing::info!(message = "combined edit tables", output = %output.display(), rows = load.rows.len());
    Ok(load.rows.len())
}

/// Collapse archives across all inputs and split the rows by page id into `<lang>_<i>.csv`
/// files. Defaults to one output file per input.
pub fn shard(
    inputs: &[PathBuf],
    output_dir: &Path,
    language: &Language,
    bins: Option<usize>,
    allow_partial: bool,
) -> Result<Vec<PathBuf>, PipelineError> {
    if !output_dir.is_dir() {
        return Err(PipelineError::Config(format!(
            "output directory `{}` does not exist",
            output_dir.display()
        )));
    }
    let inputs = resolve_inputs(inputs)?;
    let bins = bins.unwrap_or(inputs.len());
    if bins == 0 {
        return Err(PipelineError::Config("cannot shard into zero files".into()));
    }

    let load = load_inputs(&inputs, allow_partial)?;
    let rows = collapse_archives(load.rows);

    let mut written = Vec::with_capacity(bins);
    for (i, shard) in shard_by_page_id(rows, bins).into_iter().enumerate() {
        let path = output_dir.join(format!("{}_{}.csv", language.code(), i));
        write_raw_edits(&path, &shard)?;
        tracing::info!(message = "wrote shard", path = %path.display(), rows = shard.len());
        written.push(path);
    }
    Ok(written)
}

/// Settings of the `count-edits` command.
#[derive(Debug)]
pub struct CountJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub language: Language,
    pub preprocess: PreprocessConfig,
    pub post_filter: PostFilterConfig,
    pub num_rows: Option<usize>,
}

/// Turn an edit table into the linked half-year panel. Returns the panel rows written.
pub fn count_edits(job: CountJob) -> Result<usize, PipelineError> {
    // configuration problems surface before the table is read
    let preprocessor = Preprocessor::new(job.preprocess)?;

    let rows = read_raw_edits(&job.input, job.num_rows)?;
    tracing::info!(message = "loaded edit table", path = %job.input.display(), rows = rows.len());

    let rows = preprocessor.preprocess(rows);
    let linked = post_filter(link_namespaces(aggregate(&rows)), job.post_filter);

    let panel: Vec<PanelRow> = linked
        .iter()
        .map(|row| row.to_panel_row(job.language.code()))
        .collect();
    write_panel(&job.output, &panel)?;

    tracing::info!(message = "wrote panel", path = %job.output.display(), rows = panel.len());
    Ok(panel.len())
}
