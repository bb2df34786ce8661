//! Optical character recognition for traditional Mongolian script.
//!
//! Pages are split into text lines by horizontal projection, each line is
//! recognized by an ONNX CTC model, and pages can be processed in parallel
//! with [`batch::BatchRunner`].

pub mod async_utils;
pub mod batch;
pub mod cmd;
pub mod cpu_limit;
pub mod models;
pub mod ocr;
pub mod page_iter;
pub mod prelude;
pub mod ui;
pub mod work_queue;
