//! Energy metrics and an energy-only speech scorer.

use super::SpeechScorer;
use crate::error::ScorerError;

/// Root-mean-square of a chunk of normalized samples.
pub fn rms(chunk: &[f32]) -> f32 {
    if chunk.is_empty() {
        return 0.0;
    }
    // f64 accumulator keeps long frames from losing precision.
    let sum: f64 = chunk.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / chunk.len() as f64).sqrt() as f32
}

/// Mean absolute amplitude, a cheaper energy proxy.
pub fn mean_abs(chunk: &[f32]) -> f32 {
    if chunk.is_empty() {
        return 0.0;
    }
    let sum: f32 = chunk.iter().map(|s| s.abs()).sum();
    sum / chunk.len() as f32
}

/// Scores frames by loudness alone.
///
/// Maps RMS linearly onto [0, 1], saturating at `full_scale_rms`. Only used
/// when a host explicitly opts into energy-only interrupts; the detector
/// stays disabled by default when no neural scorer is available.
#[derive(Debug, Clone)]
pub struct EnergyScorer {
    full_scale_rms: f32,
}

impl EnergyScorer {
    pub fn new(full_scale_rms: f32) -> Self {
        Self {
            full_scale_rms: full_scale_rms.max(f32::EPSILON),
        }
    }
}

impl Default for EnergyScorer {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl SpeechScorer for EnergyScorer {
    fn score(&mut self, frame: &[f32]) -> Result<f32, ScorerError> {
        Ok((rms(frame) / self.full_scale_rms).clamp(0.0, 1.0))
    }

    fn name(&self) -> String {
        "energy".to_string()
    }
}
