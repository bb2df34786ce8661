//! Whole-page recognition.

use image::GrayImage;

use super::{
    BBox, ImageSource,
    accuracy::calculate_accuracy,
    decode::{Charset, decode},
    engine::InferenceEngine,
    preprocess::normalize_gray,
    segment::LineSegmenter,
};
use crate::prelude::*;

/// Text recognized from one line.
#[derive(Clone, Debug, Serialize)]
pub struct LineResult {
    /// Recognized text. May be empty.
    pub text: String,

    /// Where the line is on the page.
    pub bbox: BBox,
}

/// Text recognized from one page.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PageResult {
    /// Lines in reading order, top to bottom.
    pub lines: Vec<LineResult>,
}

impl PageResult {
    /// The page text, one line of output per detected line.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Summarize this page, scored against `ground_truth` if we have one.
    pub fn score(&self, ground_truth: Option<&str>) -> OcrResult {
        let text = self.text();
        let accuracy = ground_truth.map(|truth| calculate_accuracy(&text, truth));
        OcrResult { text, accuracy }
    }
}

/// A prediction scored against a reference transcription.
#[derive(Clone, Debug, Serialize)]
pub struct OcrResult {
    /// The predicted text.
    pub text: String,

    /// Similarity to the reference, as a percentage. `None` when there was no
    /// reference to compare against.
    pub accuracy: Option<f64>,
}

/// Recognizes the text on whole pages.
///
/// A predictor is immutable once built. Share it with an [`Arc`] to
/// recognize many pages at once.
pub struct PagePredictor {
    engine: Arc<dyn InferenceEngine>,
    charset: Arc<Charset>,
    segmenter: LineSegmenter,
}

impl PagePredictor {
    /// Build a predictor from a loaded engine and charset.
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        charset: Arc<Charset>,
        segmenter: LineSegmenter,
    ) -> Self {
        Self {
            engine,
            charset,
            segmenter,
        }
    }

    /// Recognize a page and return its text.
    pub fn predict(&self, source: impl Into<ImageSource>) -> Result<String> {
        Ok(self.predict_page(source)?.text())
    }

    /// Recognize a page, keeping per-line results.
    pub fn predict_page(&self, source: impl Into<ImageSource>) -> Result<PageResult> {
        let source = source.into();
        let description = source.describe();
        let bitmap = source.into_bitmap()?;
        self.predict_bitmap(&bitmap)
            .with_context(|| format!("failed to recognize {}", description))
    }

    /// Recognize a decoded page.
    ///
    /// If segmentation finds no lines, the whole page is recognized as a
    /// single line. If that also produces nothing, the result has no lines.
    #[instrument(level = "debug", skip_all, fields(width = bitmap.width(), height = bitmap.height()))]
    pub fn predict_bitmap(&self, bitmap: &DynamicImage) -> Result<PageResult> {
        let gray = bitmap.to_luma8();
        let regions = self.segmenter.segment_gray(&gray);

        if regions.is_empty() {
            debug!("no lines found, recognizing the whole page as one line");
            let text = self.predict_line(&gray)?;
            if text.is_empty() {
                return Ok(PageResult::default());
            }
            let (width, height) = gray.dimensions();
            return Ok(PageResult {
                lines: vec![LineResult {
                    text,
                    bbox: BBox::full_page(width, height),
                }],
            });
        }

        debug!(line_count = regions.len(), "segmented page");
        let lines = regions
            .into_iter()
            .enumerate()
            .map(|(idx, region)| {
                let text = self
                    .predict_line(&region.image)
                    .with_context(|| format!("failed to recognize line {}", idx + 1))?;
                Ok(LineResult {
                    text,
                    bbox: region.bbox,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PageResult { lines })
    }

    /// Recognize a single cropped line. An empty image has no text.
    pub fn predict_line(&self, line: &GrayImage) -> Result<String> {
        let Some(tensor) = normalize_gray(line) else {
            return Ok(String::new());
        };
        let classes = self.engine.infer(&tensor)?;
        Ok(decode(&classes, &self.charset))
    }

    /// Recognize a page and score it against `ground_truth`.
    pub fn predict_with_accuracy(
        &self,
        source: impl Into<ImageSource>,
        ground_truth: &str,
    ) -> Result<OcrResult> {
        Ok(self.predict_page(source)?.score(Some(ground_truth)))
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;
    use crate::ocr::{
        engine::testing::{FailingEngine, WidthEngine, digit_charset},
        preprocess::target_width,
    };

    fn predictor(engine: impl InferenceEngine) -> PagePredictor {
        PagePredictor::new(Arc::new(engine), digit_charset(), LineSegmenter::default())
    }

    fn two_line_page() -> DynamicImage {
        let mut page = GrayImage::from_pixel(300, 120, Luma([255]));
        for (xs, ys) in [(10..290, 20..40), (10..110, 70..90)] {
            for y in ys {
                for x in xs.clone() {
                    page.put_pixel(x, y, Luma([0]));
                }
            }
        }
        DynamicImage::ImageLuma8(page)
    }

    /// What [`WidthEngine`] says for each line the segmenter finds.
    fn expected_lines(page: &DynamicImage) -> Vec<String> {
        LineSegmenter::default()
            .segment(page)
            .iter()
            .map(|region| target_width(region.bbox.width, region.bbox.height).to_string())
            .collect()
    }

    #[test]
    fn joins_lines_top_to_bottom() {
        let page = two_line_page();
        let expected = expected_lines(&page);
        assert_eq!(expected.len(), 2);
        assert_ne!(expected[0], expected[1]);

        let predictor = predictor(WidthEngine);
        let result = predictor.predict_page(page.clone()).unwrap();
        assert_eq!(result.lines.len(), 2);
        assert!(result.lines[0].bbox.y < result.lines[1].bbox.y);
        assert_eq!(predictor.predict(page).unwrap(), expected.join("\n"));
    }

    #[test]
    fn blank_page_is_empty() {
        let page = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 100, Luma([255])));
        let result = predictor(WidthEngine).predict_page(page).unwrap();
        assert!(result.lines.is_empty());
        assert_eq!(result.text(), "");
    }

    #[test]
    fn unsegmentable_page_is_read_as_one_line() {
        // Too short to form a line band, but still has ink.
        let mut gray = GrayImage::from_pixel(120, 6, Luma([255]));
        for x in 10..110 {
            for y in 1..5 {
                gray.put_pixel(x, y, Luma([0]));
            }
        }
        let result = predictor(WidthEngine)
            .predict_page(DynamicImage::ImageLuma8(gray))
            .unwrap();
        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.lines[0].bbox, BBox::full_page(120, 6));
        assert_eq!(result.text(), target_width(120, 6).to_string());
    }

    #[test]
    fn engine_failures_fail_the_page() {
        let err = predictor(FailingEngine).predict(two_line_page()).unwrap_err();
        assert!(format!("{err:#}").contains("engine exploded"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = predictor(WidthEngine)
            .predict(Path::new("/nonexistent/page.png"))
            .unwrap_err();
        assert!(err.to_string().contains("failed to open image"));
    }

    #[test]
    fn reads_pages_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        let page = two_line_page();
        page.save(&path).unwrap();
        let text = predictor(WidthEngine).predict(path).unwrap();
        assert_eq!(text, expected_lines(&page).join("\n"));
    }

    #[test]
    fn scores_against_ground_truth() {
        let page = two_line_page();
        let truth = expected_lines(&page).join("\n");
        let result = predictor(WidthEngine)
            .predict_with_accuracy(page.clone(), &truth)
            .unwrap();
        assert_eq!(result.text, truth);
        assert_eq!(result.accuracy, Some(100.0));

        let result = predictor(WidthEngine)
            .predict_with_accuracy(page, "")
            .unwrap();
        assert_eq!(result.accuracy, Some(0.0));
    }

    #[test]
    fn scoring_without_ground_truth_has_no_accuracy() {
        let page = predictor(WidthEngine).predict_page(two_line_page()).unwrap();
        let result = page.score(None);
        assert_eq!(result.text, page.text());
        assert_eq!(result.accuracy, None);
    }
}
