//! Speech scoring for the interrupt detector.
//!
//! A scorer turns one frame into a speech probability in [0, 1]. The
//! detector combines that with frame energy; neither alone decides.

pub mod energy;
pub mod silero;

use std::path::Path;

use tracing::{info, warn};

use crate::config::InterruptConfig;
use crate::error::ScorerError;

pub use energy::{rms, EnergyScorer};
pub use silero::SileroScorer;

/// Scores a frame for speech probability.
pub trait SpeechScorer: Send {
    fn score(&mut self, frame: &[f32]) -> Result<f32, ScorerError>;

    /// Clear any recurrent state. Called at the start of each phase.
    fn reset(&mut self) {}

    fn name(&self) -> String;
}

/// Load the neural scorer, if a model and the runtime are available.
pub fn load_neural_scorer(model_dir: &Path) -> Option<Box<dyn SpeechScorer>> {
    SileroScorer::load(model_dir).map(|s| Box::new(s) as Box<dyn SpeechScorer>)
}

/// Pick the scorer for the interrupt detector.
///
/// Returns `None` when no neural model loads and energy fallback is off; the
/// detector then runs disabled.
pub fn load_scorer(config: &InterruptConfig, default_model_dir: &Path) -> Option<Box<dyn SpeechScorer>> {
    let model_dir = config.model_dir.as_deref().unwrap_or(default_model_dir);
    if let Some(scorer) = load_neural_scorer(model_dir) {
        info!("Interrupt scorer: {}", scorer.name());
        return Some(scorer);
    }
    if config.energy_fallback {
        info!("Speech model unavailable, using energy-only interrupt scorer");
        return Some(Box::new(EnergyScorer::default()));
    }
    warn!(
        "Speech model not found in {}, interrupts disabled",
        model_dir.display()
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_disables_without_fallback() {
        let cfg = InterruptConfig::default();
        assert!(load_scorer(&cfg, Path::new("/nonexistent/models")).is_none());
    }

    #[test]
    fn test_energy_fallback_when_opted_in() {
        let cfg = InterruptConfig {
            energy_fallback: true,
            ..Default::default()
        };
        let scorer = load_scorer(&cfg, Path::new("/nonexistent/models")).unwrap();
        assert_eq!(scorer.name(), "energy");
    }
}
