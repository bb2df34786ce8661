//! Recognizing many pages at once.
//!
//! Pages are fed through a [`WorkQueue`] whose workers hand each page to a
//! blocking thread. Results come back in input order, and a failure on one
//! page never stops the others (unless fail-fast is requested).

use futures::{FutureExt as _, StreamExt as _, TryStreamExt as _, stream};

use crate::{
    async_utils::{BoxedStream, JoinWorker, spawn_blocking_checked},
    ocr::{
        ImageSource,
        predictor::{PagePredictor, PageResult},
    },
    prelude::*,
    work_queue::{WorkFn, WorkQueue},
};

/// Options for [`BatchRunner`].
#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// Pages recognized at once.
    pub worker_count: usize,

    /// Stop at the first failed page instead of recording the failure and
    /// moving on.
    pub fail_fast: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            fail_fast: false,
        }
    }
}

/// One page to recognize, plus a caller-defined tag that identifies it in the
/// output.
///
/// `source` may already be an error, such as a PDF that could not be
/// rasterized. That error is reported as the item's result.
pub struct BatchItem<Tag> {
    /// Identifies this item.
    pub tag: Tag,

    /// The page to recognize.
    pub source: Result<ImageSource>,
}

/// The outcome for one [`BatchItem`].
#[derive(Debug)]
pub struct BatchResult<Tag> {
    /// The item's tag.
    pub tag: Tag,

    /// The recognized page, or why recognition failed.
    pub result: Result<PageResult>,
}

/// Output of [`BatchRunner::predict_stream`].
pub struct BatchStreamInfo<Tag> {
    /// Results, in input order. An `Err` here means the queue itself broke,
    /// not that a page failed.
    pub stream: BoxedStream<Result<BatchResult<Tag>>>,

    /// The background worker. Join this after draining `stream`.
    pub worker: JoinWorker,
}

/// Runs a [`PagePredictor`] over many pages with a fixed number of workers.
pub struct BatchRunner {
    predictor: Arc<PagePredictor>,
    options: BatchOptions,
}

impl BatchRunner {
    /// Create a runner. A worker count of 0 is treated as 1.
    pub fn new(predictor: Arc<PagePredictor>, mut options: BatchOptions) -> Self {
        options.worker_count = options.worker_count.max(1);
        Self { predictor, options }
    }

    /// Our options.
    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Recognize a stream of pages.
    ///
    /// The input is pulled lazily, so at most a few pages per worker are in
    /// memory at once. Every input item produces exactly one result. Results
    /// are yielded in input order even though pages finish out of order.
    pub fn predict_stream<Tag>(
        &self,
        input: BoxedStream<BatchItem<Tag>>,
    ) -> Result<BatchStreamInfo<Tag>>
    where
        Tag: Send + 'static,
    {
        let predictor = self.predictor.clone();
        let work_fn: WorkFn<BatchItem<Tag>, BatchResult<Tag>> =
            Arc::new(move |item: BatchItem<Tag>| {
                let predictor = predictor.clone();
                async move {
                    let result = match item.source {
                        Ok(source) => spawn_blocking_checked(move || {
                            predictor.predict_page(source)
                        })
                        .await
                        .and_then(|result| result),
                        Err(err) => Err(err),
                    };
                    Ok(BatchResult {
                        tag: item.tag,
                        result,
                    })
                }
                .boxed()
            });

        let worker_count = self.options.worker_count;
        let (queue, worker) = WorkQueue::new(worker_count, work_fn)?;
        let stream = queue
            .handle()
            .process_stream(input)
            .buffered(worker_count)
            .boxed();
        Ok(BatchStreamInfo { stream, worker })
    }

    /// Recognize every page in `sources`. The returned results line up with
    /// `sources`.
    ///
    /// With `fail_fast` set, the first failure is returned as the overall
    /// error instead.
    pub async fn predict_many(
        &self,
        sources: Vec<ImageSource>,
    ) -> Result<Vec<Result<PageResult>>> {
        let input = stream::iter(sources.into_iter().enumerate().map(|(idx, source)| {
            BatchItem {
                tag: idx,
                source: Ok(source),
            }
        }))
        .boxed();
        let BatchStreamInfo { stream, worker } = self.predict_stream(input)?;
        let results = if self.options.fail_fast {
            stream
                .map(|output| output.and_then(|output| output.result).map(Ok))
                .try_collect::<Vec<_>>()
                .await
        } else {
            stream
                .map(|output| output.map(|output| output.result))
                .try_collect::<Vec<_>>()
                .await
        };
        worker.join().await?;
        results
    }
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use std::{sync::Mutex, time::Duration};

    use super::*;
    use crate::ocr::{
        engine::{
            InferenceEngine,
            testing::{FailingEngine, WidthEngine, digit_charset},
        },
        preprocess::NormalizedTensor,
        segment::LineSegmenter,
    };

    /// A [`WidthEngine`] which takes longer on narrow lines, so the pages
    /// built by [`page`] finish in roughly reverse order. Records the widths
    /// it has seen, in completion order.
    #[derive(Default)]
    struct NarrowIsSlowEngine {
        finished: Mutex<Vec<usize>>,
    }

    impl InferenceEngine for NarrowIsSlowEngine {
        fn infer(&self, input: &NormalizedTensor) -> Result<Vec<usize>> {
            let delay = 200u64.saturating_sub(input.width() as u64 / 4);
            std::thread::sleep(Duration::from_millis(delay));
            let classes = WidthEngine.infer(input)?;
            self.finished.lock().unwrap().push(input.width());
            Ok(classes)
        }
    }

    fn runner(engine: impl InferenceEngine, worker_count: usize, fail_fast: bool) -> BatchRunner {
        let predictor = PagePredictor::new(
            Arc::new(engine),
            digit_charset(),
            LineSegmenter::default(),
        );
        BatchRunner::new(
            Arc::new(predictor),
            BatchOptions {
                worker_count,
                fail_fast,
            },
        )
    }

    /// A page with a single line whose width depends on `n`.
    fn page(n: u32) -> ImageSource {
        let mut gray = GrayImage::from_pixel(400, 60, Luma([255]));
        for y in 20..40 {
            for x in 10..(50 + n * 30) {
                gray.put_pixel(x, y, Luma([0]));
            }
        }
        ImageSource::Bitmap(DynamicImage::ImageLuma8(gray))
    }

    #[tokio::test]
    async fn results_match_sequential_predictions() {
        let sources = (0..8).map(page).collect::<Vec<_>>();
        let runner = runner(WidthEngine, 3, false);
        let expected = sources
            .iter()
            .map(|source| runner.predictor.predict(source.clone()).unwrap())
            .collect::<Vec<_>>();

        let results = runner.predict_many(sources).await.unwrap();
        let texts = results
            .into_iter()
            .map(|result| result.unwrap().text())
            .collect::<Vec<_>>();
        assert_eq!(texts, expected);
    }

    #[tokio::test]
    async fn results_keep_input_order_when_pages_finish_out_of_order() {
        let engine = Arc::new(NarrowIsSlowEngine::default());
        let predictor = PagePredictor::new(
            engine.clone(),
            digit_charset(),
            LineSegmenter::default(),
        );
        let runner = BatchRunner::new(
            Arc::new(predictor),
            BatchOptions {
                worker_count: 4,
                fail_fast: false,
            },
        );
        let sources = (0..8).map(page).collect::<Vec<_>>();
        let sequential = PagePredictor::new(
            Arc::new(WidthEngine),
            digit_charset(),
            LineSegmenter::default(),
        );
        let expected = sources
            .iter()
            .map(|source| sequential.predict(source.clone()).unwrap())
            .collect::<Vec<_>>();

        let texts = runner
            .predict_many(sources)
            .await
            .unwrap()
            .into_iter()
            .map(|result| result.unwrap().text())
            .collect::<Vec<_>>();
        assert_eq!(texts, expected);

        let finished = engine.finished.lock().unwrap().clone();
        let mut sorted = finished.clone();
        sorted.sort();
        assert_eq!(finished.len(), 8);
        assert_ne!(finished, sorted, "pages should not finish in input order");
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let results = runner(WidthEngine, 4, false)
            .predict_many(vec![])
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let sources = vec![
            page(1),
            ImageSource::Path(PathBuf::from("/nonexistent/page.png")),
            page(2),
        ];
        let results = runner(WidthEngine, 2, false)
            .predict_many(sources)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn fail_fast_returns_first_error() {
        let sources = (0..4).map(page).collect::<Vec<_>>();
        let err = runner(FailingEngine, 2, true)
            .predict_many(sources)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("engine exploded"));
    }

    #[tokio::test]
    async fn streams_keep_tags_and_upstream_errors() {
        let input = stream::iter(vec![
            BatchItem {
                tag: "a",
                source: Ok(page(1)),
            },
            BatchItem {
                tag: "b",
                source: Err(anyhow!("could not rasterize")),
            },
        ])
        .boxed();
        let BatchStreamInfo { stream, worker } =
            runner(WidthEngine, 0, false).predict_stream(input).unwrap();
        let outputs = stream
            .map(|output| output.unwrap())
            .collect::<Vec<_>>()
            .await;
        worker.join().await.unwrap();

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].tag, "a");
        assert!(outputs[0].result.is_ok());
        assert_eq!(outputs[1].tag, "b");
        assert!(
            outputs[1]
                .result
                .as_ref()
                .unwrap_err()
                .to_string()
                .contains("rasterize")
        );
    }
}
