//! Iterate over the pages of an input file.
//!
//! Images are a single page. PDFs are rasterized with Poppler's `pdftocairo`
//! into a temporary directory, and each page is decoded as it is requested.

use std::{collections::BTreeMap, fs, process::Output, sync::LazyLock, vec};

use clap::Args;
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, prelude::*,
};

/// Image types we decode directly.
const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/bmp",
    "image/tiff",
    "image/webp",
];

/// The PDF MIME type.
pub const PDF_MIME_TYPE: &str = "application/pdf";

static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler complains about repairable cross-reference tables. Those PDFs
/// still render fine.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line of Poppler output report a real error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// One decoded page.
#[derive(Debug)]
pub struct Page {
    /// 1-based page number within the source file.
    pub page_number: usize,

    /// The page bitmap.
    pub bitmap: DynamicImage,
}

/// Options controlling how we split files into pages.
#[derive(Args, Clone, Debug)]
pub struct PageIterOptions {
    /// Resolution at which PDF pages are rasterized.
    #[clap(long, default_value = "300")]
    pub rasterize_dpi: u32,

    /// Only process the first N pages of each PDF.
    #[clap(long)]
    pub max_pages: Option<usize>,
}

impl Default for PageIterOptions {
    fn default() -> Self {
        Self {
            rasterize_dpi: 300,
            max_pages: None,
        }
    }
}

/// An iterator over the pages of an image or PDF.
pub struct PageIter {
    /// Rasterized pages, if any. Deleted when dropped.
    #[allow(dead_code)]
    tmpdir: Option<tempfile::TempDir>,

    /// Page files still to read, with their page numbers.
    paths: vec::IntoIter<(usize, PathBuf)>,

    /// Pages in the source file, including any skipped by `max_pages`.
    total_pages: usize,

    /// Pages we will produce.
    page_count: usize,

    /// Did this come from a PDF?
    is_pdf: bool,

    /// Non-fatal messages from rasterization.
    warnings: Vec<String>,
}

impl PageIter {
    /// Open a file, rasterizing it first if it's a PDF.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn from_path(path: &Path, options: &PageIterOptions) -> Result<Self> {
        let mime_type = get_mime_type(path)?;
        if SUPPORTED_IMAGE_TYPES.contains(&mime_type.as_str()) {
            Ok(Self {
                tmpdir: None,
                paths: vec![(1, path.to_owned())].into_iter(),
                total_pages: 1,
                page_count: 1,
                is_pdf: false,
                warnings: vec![],
            })
        } else if mime_type == PDF_MIME_TYPE {
            Self::from_rasterized_pdf(path, options).await
        } else {
            bail!(
                "unsupported MIME type {} for {:?} (supported: PNG, JPEG, BMP, TIFF, WebP, PDF)",
                mime_type,
                path.display()
            )
        }
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.display(), dpi = options.rasterize_dpi))]
    async fn from_rasterized_pdf(path: &Path, options: &PageIterOptions) -> Result<Self> {
        let total_pages = get_pdf_page_count(path).await?;

        let tmpdir = tempfile::TempDir::with_prefix("monocr-pages")
            .context("failed to create temporary directory")?;
        let out_prefix = tmpdir.path().join("page");

        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-png")
            .arg("-r")
            .arg(options.rasterize_dpi.to_string());
        add_last_page_arg_if_needed(options, total_pages, &mut cmd);
        let output = with_cpu_semaphore(|| async {
            cmd.arg(path).arg(out_prefix).output().await.with_context(|| {
                format!(
                    "failed to run pdftocairo on {:?} (is poppler-utils installed?)",
                    path.display()
                )
            })
        })
        .await?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        Self::from_tempdir(options, tmpdir, total_pages, &output)
    }

    fn from_tempdir(
        options: &PageIterOptions,
        tmpdir: tempfile::TempDir,
        total_pages: usize,
        output: &Output,
    ) -> Result<Self> {
        let tmpdir_path = tmpdir.path();
        let mut numbered = tmpdir_path
            .read_dir()
            .with_context(|| {
                format!(
                    "failed to read temporary directory {:?}",
                    tmpdir_path.display()
                )
            })?
            .map(|entry| {
                let path = entry
                    .with_context(|| {
                        format!(
                            "failed to read entry in temporary directory {:?}",
                            tmpdir_path.display()
                        )
                    })?
                    .path();
                let number = page_number_from_file_name(&path).ok_or_else(|| {
                    anyhow!("unexpected rasterized page file {:?}", path.display())
                })?;
                Ok((number, path))
            })
            .collect::<Result<Vec<_>>>()?;
        // pdftocairo pads page numbers, but only to the width of the last page
        // number it was asked for. Sort numerically to be safe.
        numbered.sort();

        let warnings = String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
            .map(|line| line.trim().to_owned())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>();

        let page_count = numbered.len();
        let expected = options.max_pages.map_or(total_pages, |max| max.min(total_pages));
        if page_count != expected {
            warn!(page_count, expected, "pdftocairo produced an unexpected number of pages");
        }

        Ok(Self {
            tmpdir: Some(tmpdir),
            paths: numbered.into_iter(),
            total_pages,
            page_count,
            is_pdf: true,
            warnings,
        })
    }

    /// Non-fatal messages produced while preparing pages.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Did this come from a PDF?
    pub fn is_pdf(&self) -> bool {
        self.is_pdf
    }

    /// How many pages will we produce?
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Were some pages skipped because of `--max-pages`?
    pub fn is_incomplete(&self) -> bool {
        self.page_count < self.total_pages
    }

    /// How many pages does the source file have?
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }
}

impl Iterator for PageIter {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        let (page_number, path) = self.paths.next()?;

        let result = image::open(&path)
            .with_context(|| format!("failed to decode page {}", page_number));
        // Rasterized pages are only read once.
        if self.tmpdir.is_some()
            && let Err(err) = fs::remove_file(&path)
        {
            warn!(path = %path.display(), "failed to delete page file: {}", err);
        }
        Some(result.map(|bitmap| Page {
            page_number,
            bitmap,
        }))
    }
}

/// Ask `pdfinfo` how many pages a PDF has.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .await
        .with_context(|| {
            format!(
                "failed to run pdfinfo on {:?} (is poppler-utils installed?)",
                path.display()
            )
        })?;
    check_for_command_failure("pdfinfo", &output, None)?;

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    let properties = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect::<BTreeMap<_, _>>();

    let page_count = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    page_count.parse::<usize>().with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

/// Stop `pdftocairo` early if we only want some of the pages.
fn add_last_page_arg_if_needed(
    options: &PageIterOptions,
    total_pages: usize,
    cmd: &mut Command,
) {
    if let Some(max_pages) = options.max_pages
        && total_pages > max_pages
    {
        cmd.arg("-l").arg(max_pages.to_string());
    }
}

/// Sniff the MIME type of a file from its contents.
pub fn get_mime_type(path: &Path) -> Result<String> {
    Ok(infer::get_from_path(path)
        .with_context(|| format!("failed to read {:?}", path.display()))?
        .ok_or_else(|| anyhow!("unknown file type for {:?}", path.display()))?
        .mime_type()
        .to_string())
}

/// Parse the page number out of a `pdftocairo` output name like
/// `page-07.png`.
fn page_number_from_file_name(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let (_, number) = stem.rsplit_once('-')?;
    number.parse().ok()
}
