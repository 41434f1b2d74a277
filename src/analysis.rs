//! Text analysis executed by pool workers.
//!
//! For a line of text this finds the last character, counts how many times
//! it appears in the line (exact, case-sensitive) and checks whether that
//! count is prime. The computation is pure: the same input always yields the
//! same [`AnalysisResult`].

use crate::error::WorkError;

/// A single line submitted for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub text: String,
}

impl AnalysisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Outcome of analyzing one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    /// The analyzed text, as received
    pub text: String,
    /// Final character of `text` (by code point)
    pub last_char: char,
    /// Occurrences of `last_char` in `text`
    pub count: usize,
    /// Whether `count` is a prime number
    pub is_count_prime: bool,
}

/// Result delivered back to the dispatcher for every request.
pub type WorkResponse = Result<AnalysisResult, WorkError>;

/// Signature of the function a worker runs for each request.
///
/// Plain function pointers are `Send + Sync + Copy`, so every worker thread
/// gets its own copy without any shared state.
pub type Analyzer = fn(&str) -> WorkResponse;

/// Analyze a line of text.
pub fn analyze(text: &str) -> WorkResponse {
    let last_char = text.chars().next_back().ok_or(WorkError::EmptyInput)?;
    let count = text.chars().filter(|&c| c == last_char).count();

    Ok(AnalysisResult {
        text: text.to_string(),
        last_char,
        count,
        is_count_prime: is_prime(count),
    })
}

/// Trial-division primality test.
pub fn is_prime(n: usize) -> bool {
    if n <= 1 {
        return false;
    }
    if n == 2 {
        return true;
    }
    if n % 2 == 0 {
        return false;
    }

    let mut divisor = 3;
    while divisor <= n / divisor {
        if n % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}
