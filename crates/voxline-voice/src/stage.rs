//! Uniform timeout and fallback handling for remote calls.
//!
//! Each remote call in a turn (transcription, reply generation, synthesis)
//! runs as a [`Stage`]: the future is spawned onto the runtime, awaited for
//! at most the stage's timeout, and cancelled on expiry. Failures never
//! propagate; they resolve to the stage's declared [`Fallback`].

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::VoiceError;

/// What a stage yields when its operation fails or times out.
#[derive(Debug, Clone, PartialEq)]
pub enum Fallback<T> {
    /// Give up on the turn.
    Abort,
    /// Continue with this value instead.
    Substitute(T),
}

/// Result of running a stage.
#[derive(Debug, PartialEq)]
pub enum StageOutcome<T> {
    Completed(T),
    /// The operation failed or timed out and the fallback value was used.
    Recovered(T),
    /// The operation failed or timed out and the fallback is [`Fallback::Abort`].
    Aborted,
}

impl<T> StageOutcome<T> {
    /// The value to continue with, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Completed(v) | Self::Recovered(v) => Some(v),
            Self::Aborted => None,
        }
    }
}

/// A named remote operation with a deadline.
#[derive(Debug, Clone)]
pub struct Stage<T> {
    name: &'static str,
    timeout: Duration,
    fallback: Fallback<T>,
}

impl<T> Stage<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(name: &'static str, timeout: Duration) -> Self {
        Self {
            name,
            timeout,
            fallback: Fallback::Abort,
        }
    }

    pub fn with_fallback(mut self, value: T) -> Self {
        self.fallback = Fallback::Substitute(value);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs `operation` on a separate task and waits at most the timeout.
    pub async fn run<F>(&self, call_sid: &str, operation: F) -> StageOutcome<T>
    where
        F: Future<Output = Result<T, VoiceError>> + Send + 'static,
    {
        let started = Instant::now();
        let mut handle = tokio::spawn(operation);

        let failure = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(value))) => {
                tracing::debug!(
                    call_sid,
                    stage = self.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "stage completed"
                );
                return StageOutcome::Completed(value);
            }
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(join_err)) => VoiceError::Task(join_err.to_string()).to_string(),
            Err(_) => {
                handle.abort();
                format!("timed out after {} ms", self.timeout.as_millis())
            }
        };

        match &self.fallback {
            Fallback::Abort => {
                tracing::warn!(call_sid, stage = self.name, error = %failure, "stage failed, aborting turn");
                StageOutcome::Aborted
            }
            Fallback::Substitute(value) => {
                tracing::warn!(call_sid, stage = self.name, error = %failure, "stage failed, using fallback");
                StageOutcome::Recovered(value.clone())
            }
        }
    }
}
