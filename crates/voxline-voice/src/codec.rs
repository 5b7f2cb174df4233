//! Conversion between telephony μ-law audio and linear PCM.
//!
//! Inbound audio arrives as 8 kHz μ-law. The speech-to-text service wants
//! 16-bit little-endian PCM at 16 kHz, so [`decode_inbound`] expands,
//! upsamples and (for quiet callers) amplifies it. Synthesized replies come
//! back as WAV at whatever rate the voice uses; [`encode_outbound`] mixes them
//! to mono, downsamples to 8 kHz through a band-limited FFT resampler and
//! compresses back to μ-law.
//!
//! Everything here is a pure function over byte buffers.

use std::collections::HashSet;
use std::io::Cursor;
use std::time::Duration;

use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

/// Sample rate of the telephony transport.
pub const NARROWBAND_RATE: u32 = 8_000;

/// Sample rate sent to the speech-to-text service.
pub const RECOGNITION_RATE: u32 = 16_000;

/// Bytes in one 20 ms narrowband frame.
pub const FRAME_BYTES: usize = 160;

/// Inputs with fewer distinct byte values are treated as silence.
pub const MIN_DISTINCT_BYTES: usize = 10;

/// RMS below which inbound audio is amplified.
pub const GAIN_FLOOR_RMS: f64 = 2_000.0;

/// Upper bound on the normalization gain.
pub const MAX_GAIN: f64 = 4.0;

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32_635;

#[derive(Error, Debug)]
pub enum CodecError {
    /// The input is degenerate (too few distinct values to hold speech).
    #[error("audio is silent ({distinct} distinct byte values)")]
    Silence { distinct: usize },

    #[error("PCM buffer has odd length {0}")]
    OddLength(usize),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("invalid WAV container: {0}")]
    Wav(#[from] hound::Error),
}

/// Interleaved 16-bit PCM with its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmAudio {
    /// Parses little-endian 16-bit PCM bytes.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<Self, CodecError> {
        if bytes.len() % 2 != 0 {
            return Err(CodecError::OddLength(bytes.len()));
        }
        check_format(sample_rate, channels)?;
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Reads a WAV container holding 16-bit integer PCM.
    ///
    /// Streaming WAV headers may overstate the data length, so reading stops
    /// at the end of the actual bytes once at least one sample was decoded.
    pub fn from_wav(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(CodecError::UnsupportedFormat(format!(
                "{:?} {}-bit WAV",
                spec.sample_format, spec.bits_per_sample
            )));
        }
        check_format(spec.sample_rate, spec.channels)?;

        let mut samples = Vec::with_capacity(reader.len() as usize);
        for sample in reader.samples::<i16>() {
            match sample {
                Ok(s) => samples.push(s),
                Err(hound::Error::IoError(_)) if !samples.is_empty() => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Playback length.
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() as u64 / u64::from(self.channels.max(1));
        Duration::from_micros(frames * 1_000_000 / u64::from(self.sample_rate.max(1)))
    }

    /// Averages interleaved channels into one.
    pub fn into_mono(self) -> Self {
        if self.channels <= 1 {
            return self;
        }
        let channels = usize::from(self.channels);
        let samples = self
            .samples
            .chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
                (sum / frame.len() as i32) as i16
            })
            .collect();
        Self {
            samples,
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }
}

fn check_format(sample_rate: u32, channels: u16) -> Result<(), CodecError> {
    if sample_rate == 0 || channels == 0 {
        return Err(CodecError::UnsupportedFormat(format!(
            "{sample_rate} Hz, {channels} channels"
        )));
    }
    Ok(())
}

/// Decodes one μ-law byte to a linear sample (ITU-T G.711).
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = (u >> 4) & 0x07;
    let mantissa = i32::from(u & 0x0F);
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encodes one linear sample to μ-law (ITU-T G.711).
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = i32::from(sample);
    let sign: u8 = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    pcm = pcm.min(ULAW_CLIP) + ULAW_BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

pub fn decode_ulaw(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| ulaw_to_linear(b)).collect()
}

pub fn encode_ulaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| linear_to_ulaw(s)).collect()
}

/// Number of distinct byte values in `bytes`.
pub fn distinct_bytes(bytes: &[u8]) -> usize {
    bytes.iter().collect::<HashSet<_>>().len()
}

/// True when every byte of a non-empty frame is the same value.
pub fn is_degenerate(frame: &[u8]) -> bool {
    match frame.split_first() {
        Some((first, rest)) => rest.iter().all(|b| b == first),
        None => true,
    }
}

/// Root-mean-square amplitude of 16-bit samples.
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Inputs shorter than this are resampled by linear interpolation.
const MIN_FILTERED_SAMPLES: usize = 64;

/// Frames fed to the FFT resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Band-limited resampling of mono samples.
///
/// The output holds exactly `len * to_rate / from_rate` samples with the
/// filter delay removed.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>, CodecError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    check_format(from_rate, 1)?;
    check_format(to_rate, 1)?;
    if samples.len() < MIN_FILTERED_SAMPLES {
        return Ok(resample_linear(samples, from_rate, to_rate));
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        2,
        1,
    )
    .map_err(|e| CodecError::Resample(e.to_string()))?;

    let expected = output_len(samples.len(), from_rate, to_rate);
    let delay = resampler.output_delay();
    let input: Vec<f32> = samples.iter().map(|&s| f32::from(s) / 32_768.0).collect();
    let mut output: Vec<f32> = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut chunks = input.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let block = vec![chunk.to_vec()];
        let frames = resampler
            .process(&block, None)
            .map_err(|e| CodecError::Resample(e.to_string()))?;
        output.extend_from_slice(&frames[0]);
    }

    let rest = chunks.remainder();
    if !rest.is_empty() {
        let block = vec![rest.to_vec()];
        let frames = resampler
            .process_partial(Some(block.as_slice()), None)
            .map_err(|e| CodecError::Resample(e.to_string()))?;
        output.extend_from_slice(&frames[0]);
    }

    // Flush the filter tail.
    while output.len() < expected + delay {
        let frames = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| CodecError::Resample(e.to_string()))?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| (s * 32_768.0).round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16)
        .collect())
}

fn output_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    (len as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize
}

fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    let out_len = output_len(samples.len(), from_rate, to_rate);
    let step = f64::from(from_rate) / f64::from(to_rate);
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f64;
            let a = f64::from(samples[idx]);
            let b = f64::from(samples[next]);
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}

/// Scales quiet audio up toward [`GAIN_FLOOR_RMS`], never by more than [`MAX_GAIN`].
pub fn normalize_gain(samples: &mut [i16]) {
    let level = rms(samples);
    if level <= 0.0 || level >= GAIN_FLOOR_RMS {
        return;
    }
    let gain = (GAIN_FLOOR_RMS / level).min(MAX_GAIN);
    for s in samples.iter_mut() {
        *s = (f64::from(*s) * gain).clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
    }
}

/// Turns inbound μ-law at `source_rate` into 16 kHz little-endian PCM.
///
/// # Errors
///
/// Returns [`CodecError::Silence`] for degenerate input. Callers treat that
/// as "no utterance".
pub fn decode_inbound(bytes: &[u8], source_rate: u32) -> Result<Vec<u8>, CodecError> {
    let distinct = distinct_bytes(bytes);
    if distinct < MIN_DISTINCT_BYTES {
        return Err(CodecError::Silence { distinct });
    }
    check_format(source_rate, 1)?;

    let pcm = decode_ulaw(bytes);
    let mut upsampled = resample(&pcm, source_rate, RECOGNITION_RATE)?;
    normalize_gain(&mut upsampled);
    Ok(upsampled.iter().flat_map(|s| s.to_le_bytes()).collect())
}

/// Turns little-endian PCM at `source_rate` into 8 kHz mono μ-law.
pub fn encode_outbound(
    pcm_bytes: &[u8],
    source_rate: u32,
    channels: u16,
) -> Result<Vec<u8>, CodecError> {
    let audio = PcmAudio::from_le_bytes(pcm_bytes, source_rate, channels)?;
    encode_audio(audio)
}

/// [`encode_outbound`] for already parsed audio.
pub fn encode_audio(audio: PcmAudio) -> Result<Vec<u8>, CodecError> {
    let mono = audio.into_mono();
    let narrow = resample(&mono.samples, mono.sample_rate, NARROWBAND_RATE)?;
    Ok(encode_ulaw(&narrow))
}

#[cfg(test)]
pub(crate) fn tone(samples: usize, rate: u32, amplitude: f64) -> Vec<i16> {
    (0..samples)
        .map(|i| {
            let t = i as f64 / f64::from(rate);
            (amplitude * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as i16
        })
        .collect()
}
