//! Character sets and greedy CTC decoding.

use std::{fs, str::FromStr};

use ndarray::{ArrayViewD, Axis};

use crate::prelude::*;

/// Class 0 of the recognizer output is the CTC blank.
pub const BLANK: usize = 0;

/// The characters the recognizer can emit. Character `i` of the charset is
/// output class `i + 1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Charset {
    chars: Vec<char>,
}

impl Charset {
    /// Load a charset file. The file holds every character in class order,
    /// on a single line.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read charset {:?}", path.display()))?;
        text.parse()
            .with_context(|| format!("invalid charset {:?}", path.display()))
    }

    /// Number of characters, not counting the blank.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// Is this charset empty? Never true for a successfully parsed charset.
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// The character for an output class, if there is one.
    pub fn char_for_class(&self, class: usize) -> Option<char> {
        class
            .checked_sub(1)
            .and_then(|idx| self.chars.get(idx).copied())
    }
}

impl FromStr for Charset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // Only trailing whitespace is dropped. A leading space may be a real
        // class.
        let chars = s.trim_end().chars().collect::<Vec<_>>();
        if chars.is_empty() {
            bail!("charset is empty");
        }
        Ok(Self { chars })
    }
}

/// Collapse a per-frame class sequence into text.
///
/// Repeated classes collapse into one character unless a blank separates
/// them, blanks are dropped, and classes with no character in `charset` are
/// skipped.
pub fn decode(sequence: &[usize], charset: &Charset) -> String {
    let mut text = String::with_capacity(sequence.len());
    let mut prev = None;
    for &class in sequence {
        if class != BLANK && prev != Some(class) {
            if let Some(c) = charset.char_for_class(class) {
                text.push(c);
            }
        }
        prev = Some(class);
    }
    text
}

/// Pick the best class for each frame of a `[1, T, C]` score array.
///
/// Ties go to the lowest class index.
pub fn argmax_sequence(scores: &ArrayViewD<'_, f32>) -> Result<Vec<usize>> {
    let shape = scores.shape();
    if shape.len() != 3 || shape[0] != 1 {
        bail!(
            "unexpected recognizer output shape {:?}, expected [1, frames, classes]",
            shape
        );
    }
    if shape[2] == 0 {
        bail!("recognizer output has no classes");
    }

    let frames = scores.index_axis(Axis(0), 0);
    Ok(frames
        .outer_iter()
        .map(|frame| {
            let mut best = 0;
            let mut best_score = f32::NEG_INFINITY;
            for (class, &score) in frame.iter().enumerate() {
                if score > best_score {
                    best = class;
                    best_score = score;
                }
            }
            best
        })
        .collect())
}
