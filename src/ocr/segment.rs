//! Split a page into horizontal text lines using a row ink profile.
//!
//! We binarize the page, count ink pixels per row, smooth that profile, and
//! treat every run of rows above a small fraction of the average inked-row
//! density as one line. This works well for clean scans with horizontal
//! lines. It makes no attempt to handle columns or skew.

use std::ops::Range;

use image::{GrayImage, imageops};

use super::BBox;
use crate::prelude::*;

/// Tuning knobs for [`LineSegmenter`].
#[derive(Clone, Debug)]
pub struct SegmenterOptions {
    /// Bands shorter than this many rows are discarded as noise.
    pub min_line_height: u32,

    /// Width of the moving average applied to the row profile. The window is
    /// centered, so even values behave like the next odd value.
    pub smooth_window: u32,

    /// Pixels darker than this are ink.
    pub ink_threshold: u8,

    /// A row is text if its smoothed ink count exceeds this fraction of the
    /// mean ink count over all rows that have any ink.
    pub gap_ratio: f32,

    /// Pixels of padding added around each line.
    pub padding: u32,
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self {
            min_line_height: 10,
            smooth_window: 3,
            ink_threshold: 128,
            gap_ratio: 0.05,
            padding: 4,
        }
    }
}

/// One detected line.
#[derive(Clone, Debug)]
pub struct LineRegion {
    /// The cropped line.
    pub image: GrayImage,

    /// Where the crop came from on the page.
    pub bbox: BBox,
}

/// Finds text lines on a page.
#[derive(Clone, Debug, Default)]
pub struct LineSegmenter {
    options: SegmenterOptions,
}

impl LineSegmenter {
    /// Create a segmenter with the given options.
    pub fn new(options: SegmenterOptions) -> Self {
        Self { options }
    }

    /// Our options.
    pub fn options(&self) -> &SegmenterOptions {
        &self.options
    }

    /// Find the lines on `page`, top to bottom.
    pub fn segment(&self, page: &DynamicImage) -> Vec<LineRegion> {
        self.segment_gray(&page.to_luma8())
    }

    /// Find the lines on a grayscale page, top to bottom.
    ///
    /// Returned regions never overlap vertically. A blank page yields no
    /// regions.
    #[instrument(level = "trace", skip_all, fields(width = page.width(), height = page.height()))]
    pub fn segment_gray(&self, page: &GrayImage) -> Vec<LineRegion> {
        let opts = &self.options;
        let ink = InkMap::new(page, opts.ink_threshold);
        let profile = smooth_profile(&ink.row_counts(), opts.smooth_window);
        let Some(threshold) = gap_threshold(&profile, opts.gap_ratio) else {
            return vec![];
        };

        let bands = text_bands(&profile, threshold)
            .into_iter()
            .filter(|rows| rows.end - rows.start >= opts.min_line_height)
            .filter_map(|rows| {
                let columns = ink.column_bounds(rows.clone())?;
                Some((rows, columns))
            })
            .collect::<Vec<_>>();
        trace!(band_count = bands.len(), threshold, "found text bands");

        let (width, height) = page.dimensions();
        let pad = opts.padding;
        let mut regions = Vec::with_capacity(bands.len());
        let mut floor = 0;
        for (idx, (rows, (x_min, x_max))) in bands.iter().enumerate() {
            // Padding may grow into the gap between lines, but never past the
            // start of the next band or the end of the previous crop.
            let ceiling = bands.get(idx + 1).map_or(height, |(next, _)| next.start);
            let y1 = rows.start.saturating_sub(pad).max(floor);
            let y2 = (rows.end + pad).min(ceiling);
            let x1 = x_min.saturating_sub(pad);
            let x2 = (x_max + 1 + pad).min(width);

            let bbox = BBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
            };
            let image = imageops::crop_imm(page, bbox.x, bbox.y, bbox.width, bbox.height)
                .to_image();
            regions.push(LineRegion { image, bbox });
            floor = y2;
        }
        regions
    }
}

/// Binarized page.
struct InkMap {
    width: u32,
    ink: Vec<bool>,
}

impl InkMap {
    fn new(page: &GrayImage, ink_threshold: u8) -> Self {
        Self {
            width: page.width(),
            ink: page.pixels().map(|p| p[0] < ink_threshold).collect(),
        }
    }

    fn rows(&self) -> impl Iterator<Item = &[bool]> {
        // `chunks` panics on a zero chunk size.
        self.ink.chunks(self.width.max(1) as usize)
    }

    /// Number of ink pixels in each row.
    fn row_counts(&self) -> Vec<f32> {
        self.rows()
            .map(|row| row.iter().filter(|&&is_ink| is_ink).count() as f32)
            .collect()
    }

    /// Leftmost and rightmost ink columns within `rows`, inclusive.
    fn column_bounds(&self, rows: Range<u32>) -> Option<(u32, u32)> {
        let mut bounds: Option<(u32, u32)> = None;
        for row in self.rows().skip(rows.start as usize).take(rows.len()) {
            let Some(first) = row.iter().position(|&is_ink| is_ink) else {
                continue;
            };
            let last = row.iter().rposition(|&is_ink| is_ink).unwrap_or(first);
            let (first, last) = (first as u32, last as u32);
            bounds = Some(match bounds {
                Some((lo, hi)) => (lo.min(first), hi.max(last)),
                None => (first, last),
            });
        }
        bounds
    }
}

/// Centered moving average, averaging only over the rows inside the page.
fn smooth_profile(profile: &[f32], window: u32) -> Vec<f32> {
    let half = (window / 2) as usize;
    if half == 0 {
        return profile.to_vec();
    }
    (0..profile.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(profile.len());
            let samples = &profile[lo..hi];
            samples.iter().sum::<f32>() / samples.len() as f32
        })
        .collect()
}

/// Rows above this value are text. `None` if the page has no ink at all.
fn gap_threshold(profile: &[f32], gap_ratio: f32) -> Option<f32> {
    let (sum, count) = profile
        .iter()
        .filter(|&&v| v > 0.0)
        .fold((0.0f32, 0usize), |(sum, count), &v| (sum + v, count + 1));
    if count == 0 {
        return None;
    }
    Some(sum / count as f32 * gap_ratio)
}

/// Maximal runs of rows whose value is above `threshold`. A run still open at
/// the bottom of the page is closed there.
fn text_bands(profile: &[f32], threshold: f32) -> Vec<Range<u32>> {
    let mut bands = vec![];
    let mut start = None;
    for (row, &value) in profile.iter().enumerate() {
        let row = row as u32;
        match (value > threshold, start) {
            (true, None) => start = Some(row),
            (false, Some(s)) => {
                bands.push(s..row);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        bands.push(s..profile.len() as u32);
    }
    bands
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    /// A white page with black rectangles at `(x0..x1, y0..y1)`.
    fn page(width: u32, height: u32, blocks: &[(Range<u32>, Range<u32>)]) -> GrayImage {
        let mut page = GrayImage::from_pixel(width, height, Luma([255]));
        for (xs, ys) in blocks {
            for y in ys.clone() {
                for x in xs.clone() {
                    page.put_pixel(x, y, Luma([0]));
                }
            }
        }
        page
    }

    fn assert_disjoint(regions: &[LineRegion]) {
        for pair in regions.windows(2) {
            assert!(
                pair[0].bbox.bottom() <= pair[1].bbox.y,
                "{:?} overlaps {:?}",
                pair[0].bbox,
                pair[1].bbox
            );
        }
    }

    #[test]
    fn blank_page_has_no_lines() {
        let segmenter = LineSegmenter::default();
        assert!(segmenter.segment_gray(&page(200, 100, &[])).is_empty());
        assert!(segmenter.segment_gray(&GrayImage::new(200, 0)).is_empty());
        assert!(segmenter.segment_gray(&GrayImage::new(0, 200)).is_empty());
    }

    #[test]
    fn finds_two_lines_in_order() {
        let page = page(200, 100, &[(10..190, 20..40), (30..120, 60..80)]);
        let regions = LineSegmenter::default().segment_gray(&page);
        assert_eq!(regions.len(), 2);
        assert_disjoint(&regions);

        let first = regions[0].bbox;
        assert!(first.y <= 20 && first.bottom() >= 40);
        assert_eq!(first.x, 6);
        assert_eq!(first.right(), 194);

        let second = regions[1].bbox;
        assert!(second.y <= 60 && second.bottom() >= 80);
        assert_eq!(second.x, 26);
        assert_eq!(second.right(), 124);

        for region in &regions {
            assert_eq!(region.image.width(), region.bbox.width);
            assert_eq!(region.image.height(), region.bbox.height);
        }
    }

    #[test]
    fn padding_does_not_overlap_close_lines() {
        let page = page(100, 80, &[(10..90, 10..30), (10..90, 36..56)]);
        let regions = LineSegmenter::default().segment_gray(&page);
        assert_eq!(regions.len(), 2);
        assert_disjoint(&regions);
        assert!(regions[0].bbox.bottom() >= 30);
        assert!(regions[1].bbox.y <= 36);
    }

    #[test]
    fn short_bands_are_dropped() {
        // Dots one pixel tall smooth into three-row bands.
        let dots = (0..5)
            .map(|i| (10 + i * 20..12 + i * 20, 10 + i * 20..11 + i * 20))
            .collect::<Vec<_>>();
        let regions = LineSegmenter::default().segment_gray(&page(120, 120, &dots));
        assert!(regions.is_empty());

        // A page shorter than the minimum line height.
        let tiny = page(50, 6, &[(0..50, 0..6)]);
        assert!(LineSegmenter::default().segment_gray(&tiny).is_empty());
    }

    #[test]
    fn line_at_bottom_edge_is_kept() {
        let page = page(100, 100, &[(20..80, 80..100)]);
        let regions = LineSegmenter::default().segment_gray(&page);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox.bottom(), 100);
        assert_eq!(regions[0].bbox.y, 75);
    }

    #[test]
    fn smoothing_averages_over_rows_inside_the_page() {
        let smoothed = smooth_profile(&[3.0, 0.0, 0.0, 6.0], 3);
        assert_eq!(smoothed, vec![1.5, 1.0, 2.0, 3.0]);
        assert_eq!(smooth_profile(&[1.0, 2.0], 1), vec![1.0, 2.0]);
    }

    #[test]
    fn threshold_uses_mean_of_inked_rows() {
        assert_eq!(gap_threshold(&[0.0, 10.0, 30.0, 0.0], 0.5), Some(10.0));
        assert_eq!(gap_threshold(&[0.0, 0.0], 0.5), None);
    }

    #[test]
    fn bands_are_closed_at_page_end() {
        let bands = text_bands(&[0.0, 5.0, 5.0, 0.0, 5.0], 1.0);
        assert_eq!(bands, vec![1..3, 4..5]);
    }
}
