//! Ordered fallback over candidate configurations.

use std::future::Future;

use thiserror::Error;

use crate::error::VoiceError;

/// Every candidate was tried without producing a result.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no result after {attempts} attempts ({failures} failed)")]
pub struct NoResult {
    pub attempts: usize,
    pub failures: usize,
}

/// A list of candidates tried in order; the first one that yields a value wins.
#[derive(Debug, Clone)]
pub struct OrderedFallback<C> {
    candidates: Vec<C>,
}

impl<C> OrderedFallback<C> {
    pub fn new(candidates: Vec<C>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[C] {
        &self.candidates
    }

    /// Calls `attempt` for each candidate until one returns `Ok(Some(_))`.
    ///
    /// `Ok(None)` and `Err(_)` both move on to the next candidate; errors are
    /// logged at `warn`.
    pub async fn first_success<'a, T, F, Fut>(&'a self, mut attempt: F) -> Result<(&'a C, T), NoResult>
    where
        C: std::fmt::Debug,
        F: FnMut(&'a C) -> Fut,
        Fut: Future<Output = Result<Option<T>, VoiceError>>,
    {
        let mut failures = 0;
        for candidate in &self.candidates {
            match attempt(candidate).await {
                Ok(Some(value)) => return Ok((candidate, value)),
                Ok(None) => {
                    tracing::debug!(?candidate, "candidate produced no result");
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(?candidate, error = %e, "candidate failed");
                }
            }
        }
        Err(NoResult {
            attempts: self.candidates.len(),
            failures,
        })
    }
}
