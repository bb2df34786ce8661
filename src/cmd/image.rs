//! The `image` subcommand.

use clap::Args;

use super::{DocumentOutput, ModelOpts, OutputFormat, OutputOpts, PageOutput, SegmenterOpts};
use crate::{
    async_utils::{io::OutputWriter, spawn_blocking_checked},
    ocr::predictor::OcrResult,
    prelude::*,
    ui::Ui,
};

/// Recognize text in a single image.
#[derive(Debug, Args)]
pub struct ImageOpts {
    /// The image to recognize.
    pub path: PathBuf,

    /// A text file holding the expected transcription. Reports character
    /// accuracy against it.
    #[clap(long)]
    pub ground_truth: Option<PathBuf>,

    #[clap(flatten)]
    pub model: ModelOpts,

    #[clap(flatten)]
    pub segmenter: SegmenterOpts,

    #[clap(flatten)]
    pub output: OutputOpts,
}

/// Run the `image` subcommand.
#[instrument(level = "debug", skip_all, fields(path = %opts.path.display()))]
pub async fn cmd_image(ui: Ui, opts: &ImageOpts) -> Result<()> {
    if !opts.path.is_file() {
        bail!("image not found at {:?}", opts.path.display());
    }
    let ground_truth = match &opts.ground_truth {
        Some(path) => {
            let text = tokio::fs::read_to_string(path).await.with_context(|| {
                format!("failed to read ground truth {:?}", path.display())
            })?;
            Some(text.trim_end().to_owned())
        }
        None => None,
    };

    let predictor = opts.model.load_predictor(&ui, &opts.segmenter).await?;
    let path = opts.path.clone();
    let page = spawn_blocking_checked(move || predictor.predict_page(path)).await??;
    debug!(line_count = page.lines.len(), "recognized image");

    let OcrResult { text, accuracy } = page.score(ground_truth.as_deref());
    if let Some(accuracy) = accuracy {
        ui.display_message("🎯", &format!("Accuracy: {:.2}%", accuracy));
    }

    let mut out = OutputWriter::create(opts.output.output_path.as_deref()).await?;
    match opts.output.format {
        OutputFormat::Text => {
            out.write_str(&text).await?;
            out.write_str("\n").await?;
        }
        OutputFormat::Json => {
            let document = DocumentOutput {
                path: opts.path.clone(),
                pages: vec![PageOutput::new(1, page)],
                accuracy,
            };
            out.write_json_pretty(&document).await?;
        }
    }
    out.finish().await
}
