//! Token budget estimation.
//!
//! Approximates the backend tokenizer without shipping a vocabulary: ASCII
//! text runs roughly four characters per token, while CJK and other wide
//! characters are counted one token each. The estimate is deliberately
//! conservative (it over-counts rather than under-counts) so a prompt that
//! passes the budget check here also fits the backend's real window.

/// Estimate the token cost of `text` in backend token units.
///
/// Pure and deterministic; monotonic in input length.
pub fn estimate(text: &str) -> usize {
    let mut ascii = 0usize;
    let mut wide = 0usize;
    for ch in text.chars() {
        if ch.is_ascii() {
            ascii += 1;
        } else {
            wide += 1;
        }
    }
    (ascii + 3) / 4 + wide
}
