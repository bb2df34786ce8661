//! Character-level accuracy against a reference transcription.

/// Similarity between `predicted` and `ground_truth` as a percentage, based
/// on Levenshtein distance over Unicode scalar values and rounded to two
/// decimal places.
///
/// Either string being empty scores 0, even when both are.
pub fn calculate_accuracy(predicted: &str, ground_truth: &str) -> f64 {
    if predicted.is_empty() || ground_truth.is_empty() {
        return 0.0;
    }
    let distance = strsim::levenshtein(predicted, ground_truth);
    let longest = predicted.chars().count().max(ground_truth.chars().count());
    let accuracy = (1.0 - distance as f64 / longest as f64) * 100.0;
    (accuracy * 100.0).round() / 100.0
}
