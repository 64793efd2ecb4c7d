use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Canonical WAV header size.
const WAV_HEADER_BYTES: usize = 44;
/// 16 kHz, 16-bit, mono.
const WAV_BYTES_PER_SECOND: f64 = 32_000.0;

/// How a request's size sample is turned into a number.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayloadMetric {
    /// Base64 WAV audio, measured in seconds of playback.
    AudioSeconds,
    /// Base64 content, measured in decoded bytes.
    Base64Bytes,
    /// Plain text, measured in characters.
    TextChars,
}

impl PayloadMetric {
    pub fn unit(self) -> &'static str {
        match self {
            Self::AudioSeconds => "seconds",
            Self::Base64Bytes => "bytes",
            Self::TextChars => "chars",
        }
    }

    pub fn measure(self, raw: &str) -> Result<f64> {
        match self {
            Self::AudioSeconds => {
                let bytes = decode(raw)?;
                let data = if bytes.len() > WAV_HEADER_BYTES {
                    bytes.len() - WAV_HEADER_BYTES
                } else {
                    bytes.len()
                };
                Ok(data as f64 / WAV_BYTES_PER_SECOND)
            }
            Self::Base64Bytes => Ok(decode(raw)?.len() as f64),
            Self::TextChars => {
                if raw.is_empty() {
                    return Err(Error::EmptyPayload);
                }
                Ok(raw.chars().count() as f64)
            }
        }
    }
}

fn decode(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::EmptyPayload);
    }
    Ok(STANDARD.decode(trimmed)?)
}

/// Raw samples collected for one bucket (a stage or the whole run).
#[derive(Debug, Clone, Default)]
pub struct PayloadSamples {
    values: Vec<f64>,
    skipped: u64,
}

impl PayloadSamples {
    pub fn push(&mut self, value: f64) {
        if value.is_finite() && value > 0.0 {
            self.values.push(value);
        } else {
            self.skipped = self.skipped.saturating_add(1);
        }
    }

    pub fn skip(&mut self) {
        self.skipped = self.skipped.saturating_add(1);
    }

    pub fn merge(&mut self, other: &PayloadSamples) {
        self.values.extend_from_slice(&other.values);
        self.skipped = self.skipped.saturating_add(other.skipped);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.skipped == 0
    }

    pub fn summarize(&self, metric: PayloadMetric) -> PayloadStat {
        let mut sorted = self.values.clone();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let total: f64 = sorted.iter().sum();
        let (min, max, avg, median) = if count == 0 {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            (
                sorted[0],
                sorted[count - 1],
                total / count as f64,
                sorted[count / 2],
            )
        };

        PayloadStat {
            metric,
            unit: metric.unit(),
            count: count as u64,
            skipped: self.skipped,
            total,
            min,
            max,
            avg,
            median,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadStat {
    pub metric: PayloadMetric,
    pub unit: &'static str,
    pub count: u64,
    pub skipped: u64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_seconds_strips_wav_header() {
        // 44 header bytes + 32000 data bytes = one second.
        let raw = STANDARD.encode(vec![0u8; 44 + 32_000]);
        let secs = PayloadMetric::AudioSeconds
            .measure(&raw)
            .unwrap_or_else(|e| panic!("{e}"));
        assert!((secs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tiny_audio_keeps_all_bytes() {
        let raw = STANDARD.encode(vec![0u8; 16]);
        let secs = PayloadMetric::AudioSeconds
            .measure(&raw)
            .unwrap_or_else(|e| panic!("{e}"));
        assert!((secs - 16.0 / 32_000.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(PayloadMetric::AudioSeconds.measure("not base64!!").is_err());
        assert!(PayloadMetric::Base64Bytes.measure("   ").is_err());
    }

    #[test]
    fn text_chars_counts_scalars() {
        let n = PayloadMetric::TextChars
            .measure("नमस्ते")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(n, 6.0);
    }

    #[test]
    fn summary_uses_upper_median_and_counts_skips() {
        let mut s = PayloadSamples::default();
        for v in [4.0, 1.0, 3.0, 2.0] {
            s.push(v);
        }
        s.push(0.0);
        s.skip();

        let stat = s.summarize(PayloadMetric::TextChars);
        assert_eq!(stat.count, 4);
        assert_eq!(stat.skipped, 2);
        assert_eq!(stat.min, 1.0);
        assert_eq!(stat.max, 4.0);
        assert_eq!(stat.median, 3.0);
        assert!((stat.avg - 2.5).abs() < 1e-9);
        assert_eq!(stat.total, 10.0);
    }

    #[test]
    fn empty_summary_is_zeroed() {
        let stat = PayloadSamples::default().summarize(PayloadMetric::AudioSeconds);
        assert_eq!(stat.count, 0);
        assert_eq!(stat.median, 0.0);
        assert_eq!(stat.unit, "seconds");
    }
}
