//! The `pdf` subcommand.

use clap::Args;
use futures::StreamExt as _;

use super::{
    DocumentOutput, JobOpts, ModelOpts, OutputFormat, OutputOpts, PageOutput,
    SegmenterOpts, page_items,
};
use crate::{
    async_utils::io::OutputWriter,
    batch::{BatchOptions, BatchRunner, BatchStreamInfo},
    page_iter::{PDF_MIME_TYPE, PageIterOptions, get_mime_type},
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// Recognize text on every page of a PDF.
#[derive(Debug, Args)]
pub struct PdfOpts {
    /// The PDF to recognize.
    pub path: PathBuf,

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

/// Run the `pdf` subcommand.
#[instrument(level = "debug", skip_all, fields(path = %opts.path.display()))]
pub async fn cmd_pdf(ui: Ui, opts: &PdfOpts) -> Result<()> {
    if !opts.path.is_file() {
        bail!("PDF not found at {:?}", opts.path.display());
    }
    let mime_type = get_mime_type(&opts.path)?;
    if mime_type != PDF_MIME_TYPE {
        bail!("{:?} is not a PDF (found {})", opts.path.display(), mime_type);
    }

    let predictor = opts.model.load_predictor(&ui, &opts.segmenter).await?;
    let runner = BatchRunner::new(
        predictor,
        BatchOptions {
            worker_count: opts.jobs.job_count,
            fail_fast: true,
        },
    );

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "📄",
        msg: "Recognizing pages",
        done_msg: "Recognized pages",
    });
    let input = page_items(opts.path.clone(), opts.page_iter.clone());
    let BatchStreamInfo { mut stream, worker } = runner.predict_stream(input)?;
    let mut pages = vec![];
    while let Some(output) = stream.next().await {
        let output = output?;
        let page_number = output.tag.page.unwrap_or(1);
        let page = output
            .result
            .with_context(|| format!("failed to recognize page {}", page_number))?;
        spinner.inc(1);
        pages.push(PageOutput::new(page_number, page));
    }
    drop(stream);
    worker.join().await?;
    spinner.finish_using_style();
    info!(page_count = pages.len(), "recognized PDF");

    let mut out = OutputWriter::create(opts.output.output_path.as_deref()).await?;
    match opts.output.format {
        OutputFormat::Text => {
            for page in &pages {
                out.write_str(&format!("--- Page {} ---\n{}\n\n", page.page, page.full_text))
                    .await?;
            }
        }
        OutputFormat::Json => {
            let document = DocumentOutput {
                path: opts.path.clone(),
                pages,
                accuracy: None,
            };
            out.write_json_pretty(&document).await?;
        }
    }
    out.finish().await
}
