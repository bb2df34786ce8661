//! Line-based text recognition.
//!
//! A page goes through [`segment`] (find the text lines), [`preprocess`] (turn
//! each line into a model tensor), an [`engine::InferenceEngine`] (run the
//! model), and [`decode`] (collapse the model output into text). The
//! [`predictor::PagePredictor`] ties these together.

use crate::prelude::*;

pub mod accuracy;
pub mod decode;
pub mod engine;
pub mod predictor;
pub mod preprocess;
pub mod segment;

/// Where a page bitmap comes from.
#[derive(Clone, Debug)]
pub enum ImageSource {
    /// An image file on disk, decoded on demand.
    Path(PathBuf),

    /// An already-decoded bitmap, such as a rasterized PDF page.
    Bitmap(DynamicImage),
}

impl ImageSource {
    /// Resolve this source to a bitmap, loading it from disk if needed.
    pub fn into_bitmap(self) -> Result<DynamicImage> {
        match self {
            ImageSource::Path(path) => image::open(&path)
                .with_context(|| format!("failed to open image {:?}", path.display())),
            ImageSource::Bitmap(bitmap) => Ok(bitmap),
        }
    }

    /// A short description for logs.
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Bitmap(bitmap) => {
                format!("<bitmap {}x{}>", bitmap.width(), bitmap.height())
            }
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_owned())
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(bitmap: DynamicImage) -> Self {
        ImageSource::Bitmap(bitmap)
    }
}

/// A rectangle in the pixel coordinates of the source page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BBox {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl BBox {
    /// A box covering a whole `width` x `height` page.
    pub fn full_page(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// One past the last row covered by this box.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// One past the last column covered by this box.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }
}
