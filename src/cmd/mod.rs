//! Command-line entry points, and the option groups they share.

use clap::{Args, ValueEnum};
use futures::{FutureExt as _, StreamExt as _, future, stream};

use crate::{
    async_utils::{
        BoxedStream, blocking_iter_streams::BlockingIterStream, spawn_blocking_checked,
    },
    batch::BatchItem,
    models::{DEFAULT_BASE_URL, ModelStore, Resource},
    ocr::{
        ImageSource,
        decode::Charset,
        engine::{OnnxEngine, OnnxEngineOptions},
        predictor::{LineResult, PagePredictor, PageResult},
        segment::{LineSegmenter, SegmenterOptions},
    },
    page_iter::{PageIter, PageIterOptions},
    prelude::*,
    ui::Ui,
};

pub mod batch;
pub mod download;
pub mod image;
pub mod pdf;

/// Where models are cached and fetched from.
#[derive(Debug, Clone, Args)]
pub struct CacheOpts {
    /// Directory holding the cached model and charset. [default: the
    /// platform cache directory]
    #[clap(long, env = "MONOCR_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Base URL to download the model and charset from.
    #[clap(long, env = "MONOCR_MODEL_URL", default_value = DEFAULT_BASE_URL)]
    pub model_url: String,
}

impl CacheOpts {
    /// Open the model cache.
    pub fn model_store(&self, ui: &Ui) -> Result<ModelStore> {
        let cache_dir = match &self.cache_dir {
            Some(cache_dir) => cache_dir.clone(),
            None => ModelStore::default_cache_dir()?,
        };
        Ok(ModelStore::new(ui.clone(), cache_dir, &self.model_url))
    }
}

/// Which model to run.
#[derive(Debug, Clone, Args)]
pub struct ModelOpts {
    /// Use this ONNX model instead of the cached one.
    #[clap(short = 'm', long = "model")]
    pub model_path: Option<PathBuf>,

    /// Use this charset file instead of the cached one.
    #[clap(short = 'c', long = "charset")]
    pub charset_path: Option<PathBuf>,

    /// Threads ONNX Runtime may use for a single line.
    #[clap(long, default_value = "4")]
    pub intra_threads: usize,

    #[clap(flatten)]
    pub cache: CacheOpts,
}

impl ModelOpts {
    /// Find (downloading if needed) and load the model and charset.
    #[instrument(level = "debug", skip_all)]
    pub async fn load_predictor(
        &self,
        ui: &Ui,
        segmenter: &SegmenterOpts,
    ) -> Result<Arc<PagePredictor>> {
        let store = self.cache.model_store(ui)?;
        let model_path = store
            .resolve(Resource::Model, self.model_path.as_deref())
            .await?;
        let charset_path = store
            .resolve(Resource::Charset, self.charset_path.as_deref())
            .await?;

        let charset = Charset::from_file(&charset_path)?;
        debug!(charset_len = charset.len(), "loaded charset");
        let engine_options = OnnxEngineOptions {
            intra_threads: self.intra_threads,
        };
        let engine =
            spawn_blocking_checked(move || OnnxEngine::load(&model_path, &engine_options))
                .await??;

        Ok(Arc::new(PagePredictor::new(
            Arc::new(engine),
            Arc::new(charset),
            LineSegmenter::new(segmenter.to_options()),
        )))
    }
}

/// Line segmentation tuning.
#[derive(Debug, Clone, Args)]
pub struct SegmenterOpts {
    /// Ignore text bands shorter than this many pixels.
    #[clap(long, default_value = "10")]
    pub min_line_height: u32,

    /// Rows averaged together when looking for gaps between lines.
    #[clap(long, default_value = "3")]
    pub smooth_window: u32,
}

impl SegmenterOpts {
    fn to_options(&self) -> SegmenterOptions {
        SegmenterOptions {
            min_line_height: self.min_line_height,
            smooth_window: self.smooth_window,
            ..SegmenterOptions::default()
        }
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text.
    Text,
    /// JSON with per-line bounding boxes.
    Json,
}

/// Where and how to write results.
#[derive(Debug, Clone, Args)]
pub struct OutputOpts {
    /// Output format.
    #[clap(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Write results to this file instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// How many pages to work on at once.
#[derive(Debug, Clone, Args)]
pub struct JobOpts {
    /// Pages to recognize in parallel.
    #[clap(short = 'j', long = "jobs", default_value_t = num_cpus::get())]
    pub job_count: usize,
}

/// JSON output for one page.
#[derive(Debug, Serialize)]
pub struct PageOutput {
    /// 1-based page number.
    pub page: usize,
    /// Recognized lines.
    pub lines: Vec<LineResult>,
    /// All lines joined with newlines.
    pub full_text: String,
}

impl PageOutput {
    /// Build the output for page number `page`.
    pub fn new(page: usize, result: PageResult) -> Self {
        let full_text = result.text();
        Self {
            page,
            lines: result.lines,
            full_text,
        }
    }
}

/// JSON output for one input file.
#[derive(Debug, Serialize)]
pub struct DocumentOutput {
    /// The input file.
    pub path: PathBuf,

    /// Every recognized page, in order.
    pub pages: Vec<PageOutput>,

    /// Accuracy against `--ground-truth`, as a percentage. Omitted when no
    /// ground truth was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Identifies a page within a run.
#[derive(Clone, Debug)]
pub struct PageTag {
    /// The input file.
    pub path: PathBuf,
    /// Page number within a PDF. `None` for plain images, and for PDFs that
    /// failed before any page was produced.
    pub page: Option<usize>,
}

impl PageTag {
    /// A short human-readable name for this page.
    pub fn label(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        match self.page {
            Some(page) => format!("{} (page {})", name, page),
            None => name,
        }
    }
}

/// Split a file into batch items, one per page.
///
/// If the file can't be opened or rasterized, the stream holds a single
/// failed item, so the error is reported alongside everything else.
pub fn page_items(path: PathBuf, options: PageIterOptions) -> BoxedStream<BatchItem<PageTag>> {
    async move {
        let pages = match PageIter::from_path(&path, &options).await {
            Ok(pages) => pages,
            Err(err) => {
                let item = BatchItem {
                    tag: PageTag { path, page: None },
                    source: Err(err),
                };
                return stream::once(future::ready(item)).boxed();
            }
        };
        for warning in pages.warnings() {
            warn!(path = %path.display(), "{}", warning);
        }
        if pages.is_incomplete() {
            warn!(
                path = %path.display(),
                "only processing {}/{} pages because of --max-pages",
                pages.page_count(),
                pages.total_pages()
            );
        }
        let is_pdf = pages.is_pdf();
        BlockingIterStream::new(pages)
            .enumerate()
            .map(move |(idx, page)| {
                let (page_number, source) = match page {
                    Ok(page) => (page.page_number, Ok(ImageSource::Bitmap(page.bitmap))),
                    Err(err) => (idx + 1, Err(err)),
                };
                BatchItem {
                    tag: PageTag {
                        path: path.clone(),
                        page: is_pdf.then_some(page_number),
                    },
                    source,
                }
            })
            .boxed()
    }
    .flatten_stream()
    .boxed()
}

#[cfg(test)]
mod tests {
    use ::image::{GrayImage, Luma};

    use super::*;

    #[test]
    fn labels_name_the_file_and_page() {
        let tag = PageTag {
            path: PathBuf::from("/scans/book.pdf"),
            page: Some(3),
        };
        assert_eq!(tag.label(), "book.pdf (page 3)");
        let tag = PageTag {
            path: PathBuf::from("/scans/leaf.png"),
            page: None,
        };
        assert_eq!(tag.label(), "leaf.png");
    }

    #[test]
    fn page_output_includes_full_text() {
        let output = PageOutput::new(2, PageResult::default());
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["page"], 2);
        assert_eq!(json["full_text"], "");
        assert_eq!(json["lines"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn images_become_single_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.png");
        GrayImage::from_pixel(8, 8, Luma([255])).save(&path).unwrap();

        let items = page_items(path.clone(), PageIterOptions::default())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].tag.path, path);
        assert_eq!(items[0].tag.page, None);
        assert!(items[0].source.is_ok());
    }

    #[tokio::test]
    async fn unreadable_files_become_failed_items() {
        let path = PathBuf::from("/nonexistent/leaf.png");
        let items = page_items(path, PageIterOptions::default())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(items.len(), 1);
        assert!(items[0].source.is_err());
    }
}
