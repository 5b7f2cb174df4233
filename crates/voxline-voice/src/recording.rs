//! Optional WAV capture of a call's inbound audio.
//!
//! Frames are handed to a blocking writer task over a channel so the call's
//! turn loop never touches the filesystem per frame.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::{ulaw_to_linear, NARROWBAND_RATE};
use crate::error::VoiceError;

/// Writes inbound μ-law frames as 8 kHz mono 16-bit PCM.
pub struct CallRecorder {
    path: PathBuf,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    writer: JoinHandle<Result<u64, VoiceError>>,
}

impl std::fmt::Debug for CallRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRecorder")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CallRecorder {
    /// Creates `{dir}/{call_sid}_{YYYYmmdd_HHMMSS}.wav` and starts its writer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(dir: &Path, call_sid: &str, started_at: DateTime<Utc>) -> Result<Self, VoiceError> {
        std::fs::create_dir_all(dir).map_err(|e| {
            VoiceError::Recording(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let safe_sid: String = call_sid
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let path = dir.join(format!(
            "{}_{}.wav",
            safe_sid,
            started_at.format("%Y%m%d_%H%M%S")
        ));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: NARROWBAND_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut wav = hound::WavWriter::create(&path, spec)
            .map_err(|e| VoiceError::Recording(format!("cannot open {}: {}", path.display(), e)))?;

        let (frames, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let writer = tokio::task::spawn_blocking(move || -> Result<u64, VoiceError> {
            let mut samples = 0u64;
            while let Some(frame) = rx.blocking_recv() {
                for &byte in &frame {
                    wav.write_sample(ulaw_to_linear(byte))
                        .map_err(|e| VoiceError::Recording(e.to_string()))?;
                }
                samples += frame.len() as u64;
            }
            wav.finalize()
                .map_err(|e| VoiceError::Recording(e.to_string()))?;
            Ok(samples)
        });

        Ok(Self {
            path,
            frames,
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues a frame for the writer. Fails once the writer has stopped.
    pub fn write_frame(&self, ulaw: &[u8]) -> Result<(), VoiceError> {
        self.frames
            .send(ulaw.to_vec())
            .map_err(|_| VoiceError::Recording("recording writer stopped".to_string()))
    }

    /// Waits for queued frames, finalizes the WAV header and returns the file path.
    pub async fn finish(self) -> Result<PathBuf, VoiceError> {
        let Self {
            path,
            frames,
            writer,
        } = self;
        drop(frames);

        let samples = writer
            .await
            .map_err(|e| VoiceError::Task(e.to_string()))??;
        tracing::info!(path = %path.display(), samples, "recording saved");
        Ok(path)
    }
}
