//! The `batch` subcommand.

use std::fs;

use clap::Args;
use futures::{StreamExt as _, stream};
use indicatif::ProgressBar;

use super::{
    JobOpts, ModelOpts, OutputFormat, OutputOpts, PageTag, SegmenterOpts, page_items,
};
use crate::{
    async_utils::{BoxedStream, io::OutputWriter},
    batch::{BatchOptions, BatchResult, BatchRunner, BatchStreamInfo},
    ocr::predictor::{LineResult, PageResult},
    page_iter::PageIterOptions,
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// File extensions we pick up from a batch directory.
const SUPPORTED_EXTENSIONS: &[&str] =
    &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp", "pdf"];

/// Recognize every image and PDF in a directory.
#[derive(Debug, Args)]
pub struct BatchOpts {
    /// Directory of images and PDFs.
    pub dir: PathBuf,

    /// Stop at the first page that fails.
    #[clap(long)]
    pub fail_fast: bool,

    /// What portion of pages may fail before the whole run is reported as a
    /// failure? Specified as a number between 0.0 and 1.0.
    #[clap(long, default_value = "1.0", value_parser = parse_failure_rate)]
    pub allowed_failure_rate: f32,

    #[clap(flatten)]
    pub model: ModelOpts,

    #[clap(flatten)]
    pub segmenter: SegmenterOpts,

    #[clap(flatten)]
    pub page_iter: PageIterOptions,

    #[clap(flatten)]
    pub jobs: JobOpts,

    #[clap(flatten)]
    pub output: OutputOpts,
}

/// Parse `--allowed-failure-rate`, which must lie in `0.0..=1.0`.
fn parse_failure_rate(arg: &str) -> Result<f32> {
    let rate = arg
        .parse::<f32>()
        .with_context(|| format!("{:?} is not a number", arg))?;
    if !(0.0..=1.0).contains(&rate) {
        bail!("{} is not between 0.0 and 1.0", rate);
    }
    Ok(rate)
}

/// Did a page succeed?
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Recognized.
    Ok,
    /// Could not be read or recognized.
    Failed,
}

/// One JSON Lines record of batch output.
#[derive(Debug, Serialize)]
pub struct BatchRecord {
    /// The input file.
    pub path: PathBuf,

    /// Page number within a PDF. Omitted for plain images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,

    /// Whether the page was recognized.
    pub status: PageStatus,

    /// Why the page failed, outermost context first. Empty on success.
    pub errors: Vec<String>,

    /// Recognized lines, top to bottom.
    pub lines: Vec<LineResult>,

    /// All lines joined with newlines.
    pub full_text: String,
}

impl BatchRecord {
    fn new(tag: PageTag, result: &Result<PageResult>) -> Self {
        match result {
            Ok(page) => Self {
                path: tag.path,
                page: tag.page,
                status: PageStatus::Ok,
                errors: vec![],
                lines: page.lines.clone(),
                full_text: page.text(),
            },
            Err(err) => Self {
                path: tag.path,
                page: tag.page,
                status: PageStatus::Failed,
                errors: vec![format!("{:#}", err)],
                lines: vec![],
                full_text: String::new(),
            },
        }
    }
}

/// Success and failure counts for a run.
#[derive(Clone, Debug, Default)]
pub struct BatchCounters {
    /// Pages attempted.
    pub total_count: usize,

    /// Pages that failed.
    pub failure_count: usize,
}

impl BatchCounters {
    fn update(&mut self, status: PageStatus) {
        self.total_count += 1;
        if status == PageStatus::Failed {
            self.failure_count += 1;
        }
    }

    /// Report the counts, and fail if too many pages failed.
    fn finish(&self, ui: &Ui, allowed_failure_rate: f32) -> Result<()> {
        if self.total_count == 0 {
            return Ok(());
        }
        let failure_rate = self.failure_count as f32 / self.total_count as f32;
        if failure_rate > allowed_failure_rate {
            bail!(
                "{}/{} ({:.2}%) of pages failed, but only {:.2}% were allowed",
                self.failure_count,
                self.total_count,
                failure_rate * 100.0,
                allowed_failure_rate * 100.0
            );
        }
        if self.failure_count > 0 {
            ui.display_message(
                "❌",
                &format!(
                    "{}/{} pages could not be processed",
                    self.failure_count, self.total_count
                ),
            );
        } else {
            ui.display_message("✅", &format!("Processed {} pages", self.total_count));
        }
        Ok(())
    }
}

/// List the files in `dir` that we know how to process, sorted by name.
pub fn collect_input_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {:?}", dir.display()))?
        .map(|entry| {
            entry
                .map(|entry| entry.path())
                .with_context(|| format!("failed to read entry in {:?}", dir.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    files.retain(|path| path.is_file() && has_supported_extension(path));
    files.sort();
    Ok(files)
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
}

/// Run the `batch` subcommand.
#[instrument(level = "debug", skip_all, fields(dir = %opts.dir.display()))]
pub async fn cmd_batch(ui: Ui, opts: &BatchOpts) -> Result<()> {
    if !opts.dir.is_dir() {
        bail!("{:?} is not a directory", opts.dir.display());
    }
    let files = collect_input_files(&opts.dir)?;
    if files.is_empty() {
        warn!("no supported files found in {:?}", opts.dir.display());
        return Ok(());
    }
    info!(file_count = files.len(), "found input files");

    let predictor = opts.model.load_predictor(&ui, &opts.segmenter).await?;
    let runner = BatchRunner::new(
        predictor,
        BatchOptions {
            worker_count: opts.jobs.job_count,
            fail_fast: opts.fail_fast,
        },
    );

    let page_iter_opts = opts.page_iter.clone();
    let input = stream::iter(files)
        .map(move |path| page_items(path, page_iter_opts.clone()))
        .flatten()
        .boxed();
    let BatchStreamInfo { stream, worker } = runner.predict_stream(input)?;

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "📚",
        msg: "Recognizing pages",
        done_msg: "Recognized pages",
    });
    let counters = write_results(stream, &opts.output, opts.fail_fast, &spinner).await?;
    worker.join().await?;
    spinner.finish_using_style();

    counters.finish(&ui, opts.allowed_failure_rate)
}

/// Write every result in `stream` to the configured output.
///
/// The output is flushed even when we stop early, so pages finished before a
/// `--fail-fast` error are never lost.
async fn write_results(
    stream: BoxedStream<Result<BatchResult<PageTag>>>,
    output: &OutputOpts,
    fail_fast: bool,
    spinner: &ProgressBar,
) -> Result<BatchCounters> {
    let mut out = OutputWriter::create(output.output_path.as_deref()).await?;
    let mut counters = BatchCounters::default();
    let result =
        write_each_result(stream, &mut out, output.format, fail_fast, &mut counters, spinner)
            .await;
    out.finish().await?;
    result.map(|()| counters)
}

async fn write_each_result(
    mut stream: BoxedStream<Result<BatchResult<PageTag>>>,
    out: &mut OutputWriter,
    format: OutputFormat,
    fail_fast: bool,
    counters: &mut BatchCounters,
    spinner: &ProgressBar,
) -> Result<()> {
    while let Some(output) = stream.next().await {
        let BatchResult { tag, result } = output?;
        spinner.inc(1);
        let label = tag.label();
        if let Err(err) = &result {
            error!("failed to process {}: {:#}", label, err);
            if fail_fast {
                bail!("failed to process {}: {:#}", label, err);
            }
        }

        let record = BatchRecord::new(tag, &result);
        counters.update(record.status);
        match format {
            OutputFormat::Text => {
                if record.status == PageStatus::Ok {
                    out.write_str(&format!("--- {} ---\n{}\n\n", label, record.full_text))
                        .await?;
                }
            }
            OutputFormat::Json => out.write_json_line(&record).await?,
        }
    }
    Ok(())
}
