//! Running the line recognizer.

use std::sync::Mutex;

use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::Value,
};

use super::{decode::argmax_sequence, preprocess::NormalizedTensor};
use crate::prelude::*;

/// Something which can turn a normalized line into per-frame class indices.
///
/// The real implementation is [`OnnxEngine`]. Tests substitute their own.
pub trait InferenceEngine: Send + Sync + 'static {
    /// Run the recognizer and return the best class for each output frame.
    fn infer(&self, input: &NormalizedTensor) -> Result<Vec<usize>>;
}

/// Options for [`OnnxEngine::load`].
#[derive(Clone, Debug)]
pub struct OnnxEngineOptions {
    /// Threads used inside a single inference call.
    pub intra_threads: usize,
}

impl Default for OnnxEngineOptions {
    fn default() -> Self {
        Self { intra_threads: 4 }
    }
}

/// A recognizer backed by an ONNX Runtime session.
///
/// `Session::run` needs exclusive access, so concurrent callers take turns.
/// Preprocessing and decoding still run in parallel.
pub struct OnnxEngine {
    session: Mutex<Session>,
    input_name: String,
}

impl OnnxEngine {
    /// Load a model from disk. This is slow, so call it once and share the
    /// result.
    #[instrument(level = "debug", skip_all, fields(model = %model_path.display()))]
    pub fn load(model_path: &Path, options: &OnnxEngineOptions) -> Result<Self> {
        if !model_path.is_file() {
            bail!("recognition model not found at {:?}", model_path.display());
        }

        let session = Session::builder()
            .context("failed to create ONNX session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to set optimization level")?
            .with_intra_threads(options.intra_threads.max(1))
            .context("failed to set thread count")?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load ONNX model {:?}", model_path.display())
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| anyhow!("model {:?} has no inputs", model_path.display()))?;
        if session.outputs.is_empty() {
            bail!("model {:?} has no outputs", model_path.display());
        }
        info!(input = %input_name, "loaded recognition model");

        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn infer(&self, input: &NormalizedTensor) -> Result<Vec<usize>> {
        let input_value = Value::from_array(input.as_array().to_owned())
            .context("failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("recognition session is poisoned"))?;
        let outputs = session
            .run(ort::inputs![&self.input_name => input_value])
            .context("recognition inference failed")?;
        let scores = outputs[0]
            .try_extract_array::<f32>()
            .context("failed to extract recognizer output")?;
        trace!(shape = ?scores.shape(), "recognizer output");
        argmax_sequence(&scores)
    }
}

/// Fake engines for tests.
#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::ocr::decode::Charset;

    /// The charset [`WidthEngine`] expects.
    pub fn digit_charset() -> Arc<Charset> {
        Arc::new("0123456789".parse().unwrap())
    }

    /// Reads out the tensor width in decimal, or nothing for a blank line.
    ///
    /// Each line of a page gets a predictable transcription, no matter which
    /// order lines are recognized in.
    pub struct WidthEngine;

    impl InferenceEngine for WidthEngine {
        fn infer(&self, input: &NormalizedTensor) -> Result<Vec<usize>> {
            if input.as_array().iter().all(|&v| v >= 0.5) {
                return Ok(vec![0; 8]);
            }
            let mut classes = vec![];
            for digit in input.width().to_string().chars() {
                let digit = digit.to_digit(10).unwrap() as usize;
                classes.extend([digit + 1, digit + 1, 0]);
            }
            Ok(classes)
        }
    }

    /// Always fails.
    pub struct FailingEngine;

    impl InferenceEngine for FailingEngine {
        fn infer(&self, _input: &NormalizedTensor) -> Result<Vec<usize>> {
            bail!("engine exploded")
        }
    }
}
